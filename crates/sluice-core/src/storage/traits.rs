use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::StorageResult;
use crate::message::{DeadLetter, Message, NewMessage};

/// Per-status message counts for one topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub ready: u64,
    pub leased: u64,
    pub done: u64,
}

/// Whether reclaiming an expired lease counts as a failed delivery attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReclaimPolicy {
    /// A crashed or stalled consumer does not consume the retry budget.
    #[default]
    Free,
    /// Every reclaim increments `attempts`, so a message that keeps crashing
    /// its consumer is eventually dead-lettered.
    CountAsAttempt,
}

/// The persistence contract the queue core is built on. Implementations
/// must be thread-safe, and every batch mutation must select and update its
/// rows as one atomic step: two concurrent callers can never both observe
/// and then both modify the same message.
pub trait MessageStore: Send + Sync {
    /// The store's current time in unix nanos. Lease deadlines and
    /// visibility are evaluated against this clock.
    fn now(&self) -> u64;

    // --- Producer / consumer ---

    /// Persist a new READY message and return its id. An idempotency key
    /// that still maps to a live message of the same topic returns that
    /// message's id without writing anything.
    fn save_message(&self, message: NewMessage) -> StorageResult<u64>;

    /// Lease up to `limit` visible READY messages from the given partitions
    /// (all partitions when empty) in `priority DESC, visible_at ASC, id ASC`
    /// order. Returns exactly the messages this call granted, in that order,
    /// as they were written.
    fn lease_messages(
        &self,
        topic: &str,
        partitions: &[u32],
        owner: &str,
        lease_seconds: u64,
        limit: usize,
    ) -> StorageResult<Vec<Message>>;

    /// Same as `lease_messages`, returning only the number leased.
    fn lease_batch(
        &self,
        topic: &str,
        partitions: &[u32],
        owner: &str,
        lease_seconds: u64,
        limit: usize,
    ) -> StorageResult<usize> {
        Ok(self
            .lease_messages(topic, partitions, owner, lease_seconds, limit)?
            .len())
    }

    /// Unexpired leases held by `owner`, in lease order.
    fn find_leased_by_owner(&self, owner: &str, now: u64, limit: usize)
        -> StorageResult<Vec<Message>>;

    /// Mark leased messages DONE. Unknown or non-leased ids are skipped.
    fn ack_batch(&self, ids: &[u64]) -> StorageResult<usize>;

    /// Return leased messages to READY after `backoff_seconds`, counting an
    /// attempt. Unknown or non-leased ids are skipped.
    fn nack_batch(&self, ids: &[u64], backoff_seconds: u64) -> StorageResult<usize>;

    /// Push the deadline of unexpired leases held by `owner` to
    /// `now + lease_seconds`.
    fn extend_leases(&self, owner: &str, ids: &[u64], lease_seconds: u64) -> StorageResult<usize>;

    /// Move READY or LEASED messages straight to the dead-letter store.
    fn dead_letter_batch(&self, ids: &[u64], reason: &str) -> StorageResult<usize>;

    // --- Maintenance ---

    /// Return up to `limit` expired leases to READY, oldest deadline first.
    fn reclaim_expired_leases(&self, limit: usize) -> StorageResult<usize>;

    /// Move up to `limit` messages with `attempts >= max_attempts` to the
    /// dead-letter store.
    fn move_exceeded_to_dead_letter(&self, limit: usize) -> StorageResult<usize>;

    /// Hard-delete DONE messages of `topic` completed before `before`.
    fn purge_done_before(&self, topic: &str, before: u64) -> StorageResult<usize>;

    // --- Observability ---

    fn get_message(&self, id: u64) -> StorageResult<Option<Message>>;

    fn count_by_status(&self, topic: &str) -> StorageResult<StatusCounts>;

    fn ready_count_per_partition(&self, topic: &str) -> StorageResult<BTreeMap<u32, u64>>;

    // --- Dead letters ---

    fn dead_letter_count_by_topic(&self, topic: &str) -> StorageResult<u64>;

    /// Live dead letters of `topic`, oldest first.
    fn find_dead_letters_by_topic(&self, topic: &str, limit: usize)
        -> StorageResult<Vec<DeadLetter>>;

    /// A live (not soft-deleted) dead letter by id.
    fn get_dead_letter(&self, id: u64) -> StorageResult<Option<DeadLetter>>;

    /// Re-create a dead letter as a fresh READY message with zero attempts.
    fn save_recovered_message(&self, dead_letter: &DeadLetter, max_attempts: u32)
        -> StorageResult<u64>;

    /// Hard-delete one live dead letter. Returns false, without writing, for
    /// unknown ids and for tombstoned records, which only the retention
    /// purge removes.
    fn delete_dead_letter_by_id(&self, id: u64) -> StorageResult<bool>;

    /// Hard-delete every dead letter of `topic`, tombstones included.
    fn purge_dead_letters_by_topic(&self, topic: &str) -> StorageResult<usize>;

    /// Optional tombstoning capability.
    fn soft_delete_support(&self) -> Option<&dyn SoftDeleteDlqSupport> {
        None
    }
}

/// Stores that can tombstone dead letters instead of deleting them outright.
pub trait SoftDeleteDlqSupport: Send + Sync {
    /// Tombstone every live dead letter of `topic`.
    fn soft_delete_dead_letters_by_topic(&self, topic: &str) -> StorageResult<usize>;

    /// Physically remove tombstones created before `before`.
    fn purge_soft_deleted_before(&self, before: u64) -> StorageResult<usize>;
}
