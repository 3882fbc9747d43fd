use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use tracing::debug;

use crate::broker::config::QueueSettings;
use crate::broker::metrics::Metrics;
use crate::error::{EnqueueError, LeaseError, StorageResult};
use crate::message::{Message, NewMessage};
use crate::storage::keys::MAX_KEY_STRING_LEN;
use crate::storage::MessageStore;

/// Producer request. Unset optional fields fall back to the queue defaults.
#[derive(Debug, Clone, Default)]
pub struct SendMessage {
    pub topic: String,
    pub partition_key: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub priority: i32,
    /// Earliest lease time in unix nanos. `None` means immediately visible.
    pub visible_at: Option<u64>,
    pub idempotency_key: Option<String>,
    pub max_attempts: Option<u32>,
    /// Must be the same for every producer of a topic, or same-key messages
    /// land on different partitions.
    pub num_partitions: Option<u32>,
}

impl SendMessage {
    pub fn new(topic: impl Into<String>, partition_key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition_key: partition_key.into(),
            payload,
            ..Default::default()
        }
    }
}

/// Consumer poll request.
#[derive(Debug, Clone, Default)]
pub struct LeaseMessages {
    pub topic: String,
    /// Partitions to poll. Empty means every partition of the topic.
    pub partitions: Vec<u32>,
    /// Caller-unique consumer id, see [`crate::message::new_owner_id`].
    pub owner: String,
    pub lease_seconds: Option<u64>,
    pub limit: usize,
}

/// Producer and consumer API over a [`MessageStore`]. Holds no state of its
/// own; every call is one or two store operations and store errors are
/// returned unchanged.
pub struct QueueService {
    store: Arc<dyn MessageStore>,
    settings: QueueSettings,
    metrics: Metrics,
}

impl QueueService {
    pub fn new(store: Arc<dyn MessageStore>, settings: QueueSettings) -> Self {
        Self::with_metrics(store, settings, Metrics::new())
    }

    pub fn with_metrics(store: Arc<dyn MessageStore>, settings: QueueSettings, metrics: Metrics) -> Self {
        Self {
            store,
            settings,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Persist a message and return its id. A repeated idempotency key
    /// returns the id of the message already stored.
    #[tracing::instrument(skip_all, fields(topic = %request.topic))]
    pub fn enqueue(&self, request: SendMessage) -> Result<u64, EnqueueError> {
        if request.topic.is_empty() {
            return Err(EnqueueError::InvalidConfig("topic must not be empty".to_string()));
        }
        if request.topic.len() > MAX_KEY_STRING_LEN
            || request
                .idempotency_key
                .as_ref()
                .is_some_and(|k| k.len() > MAX_KEY_STRING_LEN)
        {
            return Err(EnqueueError::InvalidConfig(format!(
                "topic and idempotency key must be at most {MAX_KEY_STRING_LEN} bytes"
            )));
        }
        let num_partitions = request
            .num_partitions
            .unwrap_or(self.settings.num_partitions);
        let num_partitions = NonZeroU32::new(num_partitions).ok_or_else(|| {
            EnqueueError::InvalidConfig("num_partitions must be at least 1".to_string())
        })?;
        let max_attempts = request
            .max_attempts
            .unwrap_or(self.settings.default_max_attempts);
        if max_attempts == 0 {
            return Err(EnqueueError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let topic = request.topic.clone();
        let id = self.store.save_message(NewMessage {
            topic: request.topic,
            partition_key: request.partition_key,
            payload: request.payload,
            headers: request.headers,
            priority: request.priority,
            visible_at: request.visible_at,
            idempotency_key: request.idempotency_key,
            max_attempts,
            num_partitions,
        })?;

        self.metrics.record_enqueue(&topic);
        debug!(msg_id = id, "message enqueued");
        Ok(id)
    }

    /// Lease a batch and return exactly the messages this call granted.
    /// Leases the owner still holds from earlier calls are not repeated;
    /// `find_leased_by_owner` on the store lists those.
    #[tracing::instrument(skip_all, fields(topic = %request.topic, owner = %request.owner))]
    pub fn lease(&self, request: LeaseMessages) -> Result<Vec<Message>, LeaseError> {
        if request.owner.is_empty() {
            return Err(LeaseError::InvalidRequest("owner must not be empty".to_string()));
        }
        if request.owner.len() > MAX_KEY_STRING_LEN || request.topic.len() > MAX_KEY_STRING_LEN {
            return Err(LeaseError::InvalidRequest(format!(
                "topic and owner must be at most {MAX_KEY_STRING_LEN} bytes"
            )));
        }
        let lease_seconds = request
            .lease_seconds
            .unwrap_or(self.settings.default_lease_seconds);
        if lease_seconds == 0 {
            return Err(LeaseError::InvalidRequest(
                "lease_seconds must be at least 1".to_string(),
            ));
        }
        if request.limit == 0 {
            return Ok(Vec::new());
        }

        let messages = self.store.lease_messages(
            &request.topic,
            &request.partitions,
            &request.owner,
            lease_seconds,
            request.limit,
        )?;
        self.metrics
            .record_leased(&request.topic, messages.len() as u64);
        debug!(leased = messages.len(), "lease complete");
        Ok(messages)
    }

    #[tracing::instrument(skip_all, fields(count = ids.len()))]
    pub fn ack(&self, ids: &[u64]) -> StorageResult<usize> {
        let acked = self.store.ack_batch(ids)?;
        self.metrics.record_acked(acked as u64);
        Ok(acked)
    }

    #[tracing::instrument(skip_all, fields(count = ids.len(), backoff_seconds = backoff_seconds))]
    pub fn nack(&self, ids: &[u64], backoff_seconds: u64) -> StorageResult<usize> {
        let nacked = self.store.nack_batch(ids, backoff_seconds)?;
        self.metrics.record_nacked(nacked as u64);
        Ok(nacked)
    }

    /// Dead-letter poison messages without waiting for the retry budget.
    #[tracing::instrument(skip_all, fields(count = ids.len(), reason = %reason))]
    pub fn reject(&self, ids: &[u64], reason: &str) -> StorageResult<usize> {
        let moved = self.store.dead_letter_batch(ids, reason)?;
        self.metrics.record_dead_lettered(moved as u64);
        Ok(moved)
    }

    /// Heartbeat: push the deadline of leases this owner still holds.
    /// `None` uses the default lease duration.
    #[tracing::instrument(skip_all, fields(owner = %owner, count = ids.len()))]
    pub fn extend(&self, owner: &str, ids: &[u64], lease_seconds: Option<u64>) -> StorageResult<usize> {
        let lease_seconds = lease_seconds.unwrap_or(self.settings.default_lease_seconds);
        self.store.extend_leases(owner, ids, lease_seconds)
    }

    #[tracing::instrument(skip_all, fields(limit = limit))]
    pub fn move_exceeded_attempts_to_dead_letter(&self, limit: usize) -> StorageResult<usize> {
        let moved = self.store.move_exceeded_to_dead_letter(limit)?;
        self.metrics.record_dead_lettered(moved as u64);
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::metrics::test_harness::MetricTestHarness;
    use crate::clock::{ManualClock, NANOS_PER_SEC};
    use crate::message::MessageStatus;
    use crate::storage::RocksDbStorage;
    use std::time::Duration;

    fn test_service() -> (QueueService, Arc<ManualClock>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000 * NANOS_PER_SEC));
        let store = RocksDbStorage::open(dir.path())
            .unwrap()
            .with_clock(clock.clone());
        let service = QueueService::new(Arc::new(store), QueueSettings::default());
        (service, clock, dir)
    }

    fn lease_request(owner: &str, limit: usize) -> LeaseMessages {
        LeaseMessages {
            topic: "orders".to_string(),
            owner: owner.to_string(),
            lease_seconds: Some(30),
            limit,
            ..Default::default()
        }
    }

    #[test]
    fn enqueue_applies_defaults() {
        let (service, _clock, _dir) = test_service();
        let id = service
            .enqueue(SendMessage::new("orders", "A", b"hello".to_vec()))
            .unwrap();
        let msg = service.store().get_message(id).unwrap().unwrap();
        assert_eq!(msg.max_attempts, 5);
        assert!(msg.partition_id < 16);
        assert_eq!(msg.visible_at, service.store().now());
        assert_eq!(msg.status, MessageStatus::Ready);
    }

    #[test]
    fn enqueue_rejects_invalid_requests() {
        let (service, _clock, _dir) = test_service();

        let empty_topic = SendMessage::new("", "A", vec![]);
        assert!(matches!(
            service.enqueue(empty_topic),
            Err(EnqueueError::InvalidConfig(_))
        ));

        let mut zero_partitions = SendMessage::new("orders", "A", vec![]);
        zero_partitions.num_partitions = Some(0);
        assert!(matches!(
            service.enqueue(zero_partitions),
            Err(EnqueueError::InvalidConfig(_))
        ));

        let mut zero_attempts = SendMessage::new("orders", "A", vec![]);
        zero_attempts.max_attempts = Some(0);
        assert!(matches!(
            service.enqueue(zero_attempts),
            Err(EnqueueError::InvalidConfig(_))
        ));

        let mut huge_key = SendMessage::new("orders", "A", vec![]);
        huge_key.idempotency_key = Some("k".repeat(MAX_KEY_STRING_LEN + 1));
        assert!(matches!(
            service.enqueue(huge_key),
            Err(EnqueueError::InvalidConfig(_))
        ));
    }

    #[test]
    fn same_key_lands_on_same_partition() {
        let (service, _clock, _dir) = test_service();
        let mut partitions = Vec::new();
        for _ in 0..5 {
            let id = service
                .enqueue(SendMessage::new("orders", "customer-42", vec![]))
                .unwrap();
            partitions.push(service.store().get_message(id).unwrap().unwrap().partition_id);
        }
        assert!(partitions.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(partitions[0], 15);
    }

    #[test]
    fn lease_rejects_missing_owner() {
        let (service, _clock, _dir) = test_service();
        assert!(matches!(
            service.lease(lease_request("", 1)),
            Err(LeaseError::InvalidRequest(_))
        ));

        let mut zero_lease = lease_request("w1", 1);
        zero_lease.lease_seconds = Some(0);
        assert!(matches!(
            service.lease(zero_lease),
            Err(LeaseError::InvalidRequest(_))
        ));
    }

    #[test]
    fn lease_returns_leased_records() {
        let (service, _clock, _dir) = test_service();
        for i in 0..3 {
            service
                .enqueue(SendMessage::new("orders", "A", vec![i]))
                .unwrap();
        }
        let leased = service.lease(lease_request("w1", 2)).unwrap();
        assert_eq!(leased.len(), 2);
        assert!(leased.iter().all(|m| m.lease_owner.as_deref() == Some("w1")));
        assert_eq!(leased[0].payload, vec![0]);
        assert_eq!(leased[1].payload, vec![1]);

        assert!(service.lease(lease_request("w1", 0)).unwrap().is_empty());
    }

    #[test]
    fn repeat_lease_by_same_owner_returns_only_new_grant() {
        let (service, _clock, _dir) = test_service();
        let mut urgent = SendMessage::new("orders", "A", b"urgent".to_vec());
        urgent.priority = 5;
        let urgent_id = service.enqueue(urgent).unwrap();
        let normal_id = service
            .enqueue(SendMessage::new("orders", "A", b"normal".to_vec()))
            .unwrap();

        let first = service.lease(lease_request("w1", 1)).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, urgent_id);

        // w1 still holds the urgent lease; the next poll must hand out the
        // other message instead of repeating it.
        let second = service.lease(lease_request("w1", 1)).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, normal_id);
        assert_eq!(second[0].status, MessageStatus::Leased);

        assert!(service.lease(lease_request("w1", 1)).unwrap().is_empty());
        let held = service
            .store()
            .find_leased_by_owner("w1", service.store().now(), 10)
            .unwrap();
        assert_eq!(held.len(), 2);
    }

    #[test]
    fn delayed_message_is_not_leased_early() {
        let (service, clock, _dir) = test_service();
        let mut delayed = SendMessage::new("orders", "A", vec![]);
        delayed.visible_at = Some(service.store().now() + 10 * NANOS_PER_SEC);
        service.enqueue(delayed).unwrap();

        assert!(service.lease(lease_request("w1", 1)).unwrap().is_empty());
        clock.advance(Duration::from_secs(10));
        assert_eq!(service.lease(lease_request("w1", 1)).unwrap().len(), 1);
    }

    #[test]
    fn ack_twice_is_a_noop() {
        let (service, _clock, _dir) = test_service();
        let id = service
            .enqueue(SendMessage::new("orders", "A", vec![]))
            .unwrap();
        service.lease(lease_request("w1", 1)).unwrap();
        assert_eq!(service.ack(&[id]).unwrap(), 1);
        assert_eq!(service.ack(&[id]).unwrap(), 0);
    }

    #[test]
    fn ack_after_reclaim_is_a_noop() {
        let (service, clock, _dir) = test_service();
        let id = service
            .enqueue(SendMessage::new("orders", "A", vec![]))
            .unwrap();
        let mut short = lease_request("w1", 1);
        short.lease_seconds = Some(1);
        service.lease(short).unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(service.store().reclaim_expired_leases(10).unwrap(), 1);
        assert_eq!(service.ack(&[id]).unwrap(), 0);
        assert_eq!(
            service.store().get_message(id).unwrap().unwrap().status,
            MessageStatus::Ready
        );
    }

    #[test]
    fn reject_dead_letters_immediately() {
        let (service, _clock, _dir) = test_service();
        let id = service
            .enqueue(SendMessage::new("orders", "A", vec![]))
            .unwrap();
        service.lease(lease_request("w1", 1)).unwrap();
        assert_eq!(service.reject(&[id], "schema mismatch").unwrap(), 1);
        assert!(service.store().get_message(id).unwrap().is_none());
        assert_eq!(service.store().dead_letter_count_by_topic("orders").unwrap(), 1);
    }

    #[test]
    fn extend_uses_default_lease() {
        let (service, clock, _dir) = test_service();
        let id = service
            .enqueue(SendMessage::new("orders", "A", vec![]))
            .unwrap();
        let mut short = lease_request("w1", 1);
        short.lease_seconds = Some(1);
        service.lease(short).unwrap();

        assert_eq!(service.extend("w1", &[id], None).unwrap(), 1);
        clock.advance(Duration::from_secs(5));
        assert_eq!(service.store().reclaim_expired_leases(10).unwrap(), 0);
    }

    #[test]
    fn operations_record_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RocksDbStorage::open(dir.path()).unwrap());
        let h = MetricTestHarness::new();
        let service =
            QueueService::with_metrics(store, QueueSettings::default(), h.metrics.clone());

        let a = service.enqueue(SendMessage::new("orders", "A", vec![])).unwrap();
        let b = service.enqueue(SendMessage::new("orders", "A", vec![])).unwrap();
        service.lease(lease_request("w1", 10)).unwrap();
        service.ack(&[a]).unwrap();
        service.nack(&[b], 0).unwrap();

        h.assert_counter("sluice.messages.enqueued", Some("orders"), 2);
        h.assert_counter("sluice.messages.leased", Some("orders"), 2);
        h.assert_counter("sluice.messages.acked", None, 1);
        h.assert_counter("sluice.messages.nacked", None, 1);
    }
}
