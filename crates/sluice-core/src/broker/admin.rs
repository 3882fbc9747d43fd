use std::sync::Arc;

use tracing::{debug, info};

use crate::broker::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::broker::config::{DeadLetterSettings, QueueSettings};
use crate::broker::metrics::Metrics;
use crate::broker::stats::TopicStats;
use crate::clock::{secs_to_nanos, NANOS_PER_SEC};
use crate::error::{AdminError, StorageResult};
use crate::message::DeadLetter;
use crate::storage::keys::MAX_KEY_STRING_LEN;
use crate::storage::MessageStore;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Topics longer than the key encoding allows cannot exist in the store.
fn check_topic(topic: &str) -> Result<(), AdminError> {
    if topic.len() > MAX_KEY_STRING_LEN {
        return Err(AdminError::InvalidRequest(format!(
            "topic must be at most {MAX_KEY_STRING_LEN} bytes"
        )));
    }
    Ok(())
}

/// Operator API: inspection, manual maintenance and dead-letter handling.
pub struct AdminService {
    store: Arc<dyn MessageStore>,
    queue: QueueSettings,
    dead_letter: DeadLetterSettings,
    audit: Arc<dyn AuditSink>,
    metrics: Metrics,
}

impl AdminService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        queue: QueueSettings,
        dead_letter: DeadLetterSettings,
    ) -> Self {
        Self {
            store,
            queue,
            dead_letter,
            audit: Arc::new(TracingAuditSink),
            metrics: Metrics::new(),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn dead_letter_settings(&self) -> &DeadLetterSettings {
        &self.dead_letter
    }

    /// Counts per status, ready per partition, and live dead letters.
    #[tracing::instrument(skip(self))]
    pub fn topic_stats(&self, topic: &str) -> Result<TopicStats, AdminError> {
        check_topic(topic)?;
        let counts = self.store.count_by_status(topic)?;
        let ready_per_partition = self.store.ready_count_per_partition(topic)?;
        let dead_letters = self.store.dead_letter_count_by_topic(topic)?;

        self.metrics
            .set_topic_depths(topic, counts.ready, counts.leased, dead_letters);

        Ok(TopicStats {
            topic: topic.to_string(),
            ready: counts.ready,
            leased: counts.leased,
            done: counts.done,
            dead_letters,
            ready_per_partition,
        })
    }

    /// Return expired leases to ready. Same work as one lease reaper tick.
    #[tracing::instrument(skip(self))]
    pub fn reclaim_expired(&self, limit: usize) -> StorageResult<usize> {
        let reclaimed = self.store.reclaim_expired_leases(limit)?;
        self.metrics.record_reclaimed(reclaimed as u64);
        if reclaimed > 0 {
            info!(reclaimed, "reclaimed expired leases");
        }
        Ok(reclaimed)
    }

    /// Hard-delete done messages completed before `before` (unix nanos).
    #[tracing::instrument(skip(self))]
    pub fn purge_done(&self, topic: &str, before: u64) -> Result<usize, AdminError> {
        check_topic(topic)?;
        let count = self.store.purge_done_before(topic, before)?;
        self.audit.record(&AuditEvent::PurgeDone {
            topic: topic.to_string(),
            before,
            count,
        });
        Ok(count)
    }

    /// Remove every dead letter of `topic`. Tombstones them instead when soft
    /// delete is configured and the store supports it.
    #[tracing::instrument(skip(self))]
    pub fn purge_dead_letters(&self, topic: &str) -> Result<usize, AdminError> {
        check_topic(topic)?;
        let soft = if self.dead_letter.soft_delete {
            self.store.soft_delete_support()
        } else {
            None
        };

        let topic_name = topic.to_string();
        let (count, event) = match soft {
            Some(soft) => {
                let count = soft.soft_delete_dead_letters_by_topic(topic)?;
                (count, AuditEvent::SoftDeleteDeadLetters { topic: topic_name, count })
            }
            None => {
                let count = self.store.purge_dead_letters_by_topic(topic)?;
                (count, AuditEvent::PurgeDeadLetters { topic: topic_name, count })
            }
        };
        self.audit.record(&event);
        Ok(count)
    }

    /// Replay up to `limit` dead letters of `topic` as fresh ready messages,
    /// oldest first. Each record is saved then deleted on its own, so a
    /// failure stops the loop with earlier records already replayed, and a
    /// crash between the two writes leaves a duplicate rather than a loss.
    #[tracing::instrument(skip(self))]
    pub fn replay_from_dead_letter(&self, topic: &str, limit: usize) -> Result<usize, AdminError> {
        check_topic(topic)?;
        let dead_letters = self.store.find_dead_letters_by_topic(topic, limit)?;
        let mut replayed = 0usize;
        let result = dead_letters
            .iter()
            .try_for_each(|dead_letter| -> StorageResult<()> {
                self.replay_one(dead_letter)?;
                replayed += 1;
                Ok(())
            });

        self.metrics.record_replayed(topic, replayed as u64);
        self.audit.record(&AuditEvent::ReplayDeadLetters {
            topic: topic.to_string(),
            count: replayed,
        });
        result?;
        Ok(replayed)
    }

    /// Replay a single dead letter by id.
    #[tracing::instrument(skip(self))]
    pub fn replay_dead_letter(&self, id: u64) -> Result<u64, AdminError> {
        let dead_letter = self
            .store
            .get_dead_letter(id)?
            .ok_or(AdminError::DeadLetterNotFound(id))?;
        let msg_id = self.replay_one(&dead_letter)?;

        self.metrics.record_replayed(&dead_letter.topic, 1);
        self.audit.record(&AuditEvent::ReplayDeadLetters {
            topic: dead_letter.topic.clone(),
            count: 1,
        });
        Ok(msg_id)
    }

    fn replay_one(&self, dead_letter: &DeadLetter) -> StorageResult<u64> {
        let msg_id = self
            .store
            .save_recovered_message(dead_letter, self.queue.default_max_attempts)?;
        self.store.delete_dead_letter_by_id(dead_letter.id)?;
        debug!(
            dead_letter_id = dead_letter.id,
            msg_id,
            topic = %dead_letter.topic,
            "dead letter replayed"
        );
        Ok(msg_id)
    }

    /// Hard-delete one dead letter.
    #[tracing::instrument(skip(self))]
    pub fn delete_dead_letter(&self, id: u64) -> Result<(), AdminError> {
        if !self.store.delete_dead_letter_by_id(id)? {
            return Err(AdminError::DeadLetterNotFound(id));
        }
        self.audit.record(&AuditEvent::DeleteDeadLetter { id });
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn list_dead_letters(
        &self,
        topic: &str,
        limit: usize,
    ) -> Result<Vec<DeadLetter>, AdminError> {
        check_topic(topic)?;
        Ok(self.store.find_dead_letters_by_topic(topic, limit)?)
    }

    /// Drop tombstones older than `retention_days`. Returns 0 when the store
    /// cannot soft-delete.
    #[tracing::instrument(skip(self))]
    pub fn purge_soft_deleted(&self, retention_days: u64) -> StorageResult<usize> {
        let Some(soft) = self.store.soft_delete_support() else {
            return Ok(0);
        };
        let retention = secs_to_nanos(retention_days.saturating_mul(SECS_PER_DAY));
        let before = self.store.now().saturating_sub(retention);
        let count = soft.purge_soft_deleted_before(before)?;
        if count > 0 {
            self.audit
                .record(&AuditEvent::PurgeTombstones { before, count });
        }
        debug!(count, before_secs = before / NANOS_PER_SEC, "tombstone purge");
        Ok(count)
    }
}
