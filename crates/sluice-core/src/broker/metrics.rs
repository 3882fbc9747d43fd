use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

/// OTel instruments for the queue. Created once per service and used to
/// record counters on each operation and gauges on each stats snapshot.
/// Clones share the same instruments.
#[derive(Clone)]
pub struct Metrics {
    pub messages_enqueued: Counter<u64>,
    pub messages_leased: Counter<u64>,
    pub messages_acked: Counter<u64>,
    pub messages_nacked: Counter<u64>,
    pub messages_reclaimed: Counter<u64>,
    pub messages_dead_lettered: Counter<u64>,
    pub messages_replayed: Counter<u64>,
    pub topic_ready: Gauge<u64>,
    pub topic_leased: Gauge<u64>,
    pub topic_dead_letters: Gauge<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn topic_attr(topic: &str) -> [KeyValue; 1] {
    [KeyValue::new("topic", topic.to_string())]
}

impl Metrics {
    /// Create metrics from the global meter provider. If no meter provider
    /// is configured, the instruments are no-op.
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("sluice");
        Self::from_meter(&meter)
    }

    /// Create metrics from a specific meter (used in tests with in-memory exporter).
    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            messages_enqueued: meter
                .u64_counter("sluice.messages.enqueued")
                .with_description("Total messages enqueued")
                .build(),
            messages_leased: meter
                .u64_counter("sluice.messages.leased")
                .with_description("Total messages leased to consumers")
                .build(),
            messages_acked: meter
                .u64_counter("sluice.messages.acked")
                .with_description("Total messages acknowledged")
                .build(),
            messages_nacked: meter
                .u64_counter("sluice.messages.nacked")
                .with_description("Total messages negatively acknowledged")
                .build(),
            messages_reclaimed: meter
                .u64_counter("sluice.messages.reclaimed")
                .with_description("Expired leases returned to ready")
                .build(),
            messages_dead_lettered: meter
                .u64_counter("sluice.messages.dead_lettered")
                .with_description("Messages moved to the dead-letter store")
                .build(),
            messages_replayed: meter
                .u64_counter("sluice.messages.replayed")
                .with_description("Dead letters replayed into the live queue")
                .build(),
            topic_ready: meter
                .u64_gauge("sluice.topic.ready")
                .with_description("Ready messages per topic")
                .build(),
            topic_leased: meter
                .u64_gauge("sluice.topic.leased")
                .with_description("Leased messages per topic")
                .build(),
            topic_dead_letters: meter
                .u64_gauge("sluice.topic.dead_letters")
                .with_description("Live dead letters per topic")
                .build(),
        }
    }

    pub fn record_enqueue(&self, topic: &str) {
        self.messages_enqueued.add(1, &topic_attr(topic));
    }

    pub fn record_leased(&self, topic: &str, count: u64) {
        if count > 0 {
            self.messages_leased.add(count, &topic_attr(topic));
        }
    }

    /// Ack, nack and reject work on bare ids, so their counters carry no
    /// topic label.
    pub fn record_acked(&self, count: u64) {
        if count > 0 {
            self.messages_acked.add(count, &[]);
        }
    }

    pub fn record_nacked(&self, count: u64) {
        if count > 0 {
            self.messages_nacked.add(count, &[]);
        }
    }

    pub fn record_reclaimed(&self, count: u64) {
        if count > 0 {
            self.messages_reclaimed.add(count, &[]);
        }
    }

    pub fn record_dead_lettered(&self, count: u64) {
        if count > 0 {
            self.messages_dead_lettered.add(count, &[]);
        }
    }

    pub fn record_replayed(&self, topic: &str, count: u64) {
        if count > 0 {
            self.messages_replayed.add(count, &topic_attr(topic));
        }
    }

    pub fn set_topic_depths(&self, topic: &str, ready: u64, leased: u64, dead_letters: u64) {
        let attrs = topic_attr(topic);
        self.topic_ready.record(ready, &attrs);
        self.topic_leased.record(leased, &attrs);
        self.topic_dead_letters.record(dead_letters, &attrs);
    }
}
