use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a live message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    Ready,
    Leased,
    Done,
}

impl MessageStatus {
    /// Single-byte tag used in the per-topic status index.
    pub(crate) fn as_byte(self) -> u8 {
        match self {
            MessageStatus::Ready => b'R',
            MessageStatus::Leased => b'L',
            MessageStatus::Done => b'D',
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'R' => Some(MessageStatus::Ready),
            b'L' => Some(MessageStatus::Leased),
            b'D' => Some(MessageStatus::Done),
            _ => None,
        }
    }
}

/// Core message domain type as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: u64,
    pub topic: String,
    pub partition_id: u32,
    pub priority: i32,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub status: MessageStatus,
    pub visible_at: u64,
    pub lease_owner: Option<String>,
    pub lease_until: Option<u64>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub idempotency_key: Option<String>,
    pub version: u64,
    pub created_at: u64,
    /// Time of the last mutation. For a `Done` message this is the ack time.
    pub updated_at: u64,
}

impl Message {
    /// A ready message whose retry budget is spent. It is parked until the
    /// dead-letter mover picks it up and is never handed out by a lease.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Record a mutation: bump the optimistic version and the update time.
    pub(crate) fn touch(&mut self, now: u64) {
        self.version += 1;
        self.updated_at = now;
    }

    pub(crate) fn clear_lease(&mut self) {
        self.lease_owner = None;
        self.lease_until = None;
    }
}

/// Input to `MessageStore::save_message`. All defaults have been resolved by
/// the caller except `visible_at`, which the store fills with its own clock.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub topic: String,
    pub partition_key: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub priority: i32,
    pub visible_at: Option<u64>,
    pub idempotency_key: Option<String>,
    pub max_attempts: u32,
    pub num_partitions: std::num::NonZeroU32,
}

/// A message removed from the live queue after exhausting its retries or
/// being rejected as poison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetter {
    pub id: u64,
    pub original_id: u64,
    pub topic: String,
    pub partition_id: u32,
    pub priority: i32,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub attempts: u32,
    pub reason: String,
    pub created_at: u64,
    /// Tombstone time. Soft-deleted records are invisible to every read.
    pub deleted_at: Option<u64>,
}

/// Generate a unique lease owner id for a consumer instance.
pub fn new_owner_id() -> String {
    Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_byte_roundtrip() {
        for status in [
            MessageStatus::Ready,
            MessageStatus::Leased,
            MessageStatus::Done,
        ] {
            assert_eq!(MessageStatus::from_byte(status.as_byte()), Some(status));
        }
        assert_eq!(MessageStatus::from_byte(b'x'), None);
    }

    #[test]
    fn owner_ids_are_unique() {
        let a = new_owner_id();
        let b = new_owner_id();
        assert_ne!(a, b);
    }
}
