use tracing::info;

/// Administrative actions that destroy or resurrect data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    SoftDeleteDeadLetters { topic: String, count: usize },
    PurgeDeadLetters { topic: String, count: usize },
    PurgeDone { topic: String, before: u64, count: usize },
    PurgeTombstones { before: u64, count: usize },
    ReplayDeadLetters { topic: String, count: usize },
    DeleteDeadLetter { id: u64 },
}

impl AuditEvent {
    pub fn action(&self) -> &'static str {
        match self {
            AuditEvent::SoftDeleteDeadLetters { .. } => "dlq.soft_delete",
            AuditEvent::PurgeDeadLetters { .. } => "dlq.purge",
            AuditEvent::PurgeDone { .. } => "done.purge",
            AuditEvent::PurgeTombstones { .. } => "dlq.purge_tombstones",
            AuditEvent::ReplayDeadLetters { .. } => "dlq.replay",
            AuditEvent::DeleteDeadLetter { .. } => "dlq.delete",
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Writes audit events to the `sluice::audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        let action = event.action();
        match event {
            AuditEvent::SoftDeleteDeadLetters { topic, count }
            | AuditEvent::PurgeDeadLetters { topic, count }
            | AuditEvent::ReplayDeadLetters { topic, count } => {
                info!(target: "sluice::audit", action, %topic, count, "admin action");
            }
            AuditEvent::PurgeDone {
                topic,
                before,
                count,
            } => {
                info!(target: "sluice::audit", action, %topic, before, count, "admin action");
            }
            AuditEvent::PurgeTombstones { before, count } => {
                info!(target: "sluice::audit", action, before, count, "admin action");
            }
            AuditEvent::DeleteDeadLetter { id } => {
                info!(target: "sluice::audit", action, dead_letter_id = id, "admin action");
            }
        }
    }
}

/// Collects events in memory so tests can assert on them.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: std::sync::Mutex<Vec<AuditEvent>>,
}

#[cfg(test)]
impl RecordingAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl AuditSink for RecordingAuditSink {
    fn record(&self, event: &AuditEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
