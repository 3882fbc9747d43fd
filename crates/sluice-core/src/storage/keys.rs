//! Key encoding for RocksDB column families.
//!
//! All numeric values use big-endian encoding for correct lexicographic ordering.
//! Composite keys use `:` (0x3A) as separator.
//! Variable-length strings are length-prefixed with a big-endian u16.

const SEPARATOR: u8 = b':';

/// Fixed-width tail of a ready key after the topic prefix:
/// `partition(4) : priority(4) : visible_at(8) : id(8)`.
const READY_TAIL_LEN: usize = 4 + 1 + 4 + 1 + 8 + 1 + 8;

/// Sequence names stored in the state CF.
pub const MESSAGE_SEQUENCE: &str = "seq.message";
pub const DEAD_LETTER_SEQUENCE: &str = "seq.dead_letter";

/// Encode a u64 as 8 big-endian bytes.
fn encode_u64(val: u64) -> [u8; 8] {
    val.to_be_bytes()
}

fn decode_u64(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

fn decode_u32(bytes: &[u8]) -> Option<u32> {
    let arr: [u8; 4] = bytes.try_into().ok()?;
    Some(u32::from_be_bytes(arr))
}

/// Encode a variable-length string with a 2-byte big-endian length prefix.
///
/// Callers validate string lengths at the service boundary.
fn encode_string(s: &str) -> Vec<u8> {
    let len = u16::try_from(s.len()).expect("key string exceeds 64 KiB");
    let mut buf = Vec::with_capacity(2 + s.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    buf
}

/// Largest string that can appear inside a key.
pub const MAX_KEY_STRING_LEN: usize = u16::MAX as usize;

/// Map a priority so that higher priorities sort first.
fn encode_priority_desc(priority: i32) -> [u8; 4] {
    // Flip the sign bit for an order-preserving unsigned mapping, then invert.
    (!((priority as u32) ^ 0x8000_0000)).to_be_bytes()
}

fn decode_priority_desc(bytes: &[u8]) -> Option<i32> {
    let raw = decode_u32(bytes)?;
    Some(((!raw) ^ 0x8000_0000) as i32)
}

fn topic_prefix(topic: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(32);
    prefix.extend_from_slice(&encode_string(topic));
    prefix.push(SEPARATOR);
    prefix
}

/// Primary key of a message or dead letter: its numeric id.
pub fn id_key(id: u64) -> [u8; 8] {
    encode_u64(id)
}

pub fn parse_id_key(key: &[u8]) -> Option<u64> {
    decode_u64(key)
}

/// Build a ready index key:
/// `{topic}:{partition}:{priority_desc}:{visible_at_ns}:{id}`
///
/// Within one partition, iteration order is exactly the lease order:
/// priority descending, then visibility time, then id.
pub fn ready_key(topic: &str, partition: u32, priority: i32, visible_at: u64, id: u64) -> Vec<u8> {
    let mut key = ready_partition_prefix(topic, partition);
    key.extend_from_slice(&encode_priority_desc(priority));
    key.push(SEPARATOR);
    key.extend_from_slice(&encode_u64(visible_at));
    key.push(SEPARATOR);
    key.extend_from_slice(&encode_u64(id));
    key
}

/// Prefix for all ready entries of a topic.
pub fn ready_topic_prefix(topic: &str) -> Vec<u8> {
    topic_prefix(topic)
}

/// Prefix for the ready entries of one partition.
pub fn ready_partition_prefix(topic: &str, partition: u32) -> Vec<u8> {
    let mut prefix = topic_prefix(topic);
    prefix.extend_from_slice(&partition.to_be_bytes());
    prefix.push(SEPARATOR);
    prefix
}

/// Seek target just past every ready entry of one priority band in a
/// partition. It sorts before the first entry of the next lower priority.
pub fn ready_band_end(topic: &str, partition: u32, priority: i32) -> Vec<u8> {
    let mut key = ready_partition_prefix(topic, partition);
    key.extend_from_slice(&encode_priority_desc(priority));
    key.push(SEPARATOR + 1);
    key
}

/// Decoded form of a ready index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEntry {
    pub partition: u32,
    pub priority: i32,
    pub visible_at: u64,
    pub id: u64,
}

impl ReadyEntry {
    /// Sort key matching the lease order across partitions.
    pub fn order_key(&self) -> (std::cmp::Reverse<i32>, u64, u64) {
        (std::cmp::Reverse(self.priority), self.visible_at, self.id)
    }
}

/// Parse the fixed-width tail of a ready key.
pub fn parse_ready_key(key: &[u8]) -> Option<ReadyEntry> {
    if key.len() < READY_TAIL_LEN {
        return None;
    }
    let tail = &key[key.len() - READY_TAIL_LEN..];
    Some(ReadyEntry {
        partition: decode_u32(&tail[0..4])?,
        priority: decode_priority_desc(&tail[5..9])?,
        visible_at: decode_u64(&tail[10..18])?,
        id: decode_u64(&tail[19..27])?,
    })
}

/// Build a lease key: `{owner}:{id}`. The value is the lease deadline.
pub fn lease_key(owner: &str, id: u64) -> Vec<u8> {
    let mut key = lease_owner_prefix(owner);
    key.extend_from_slice(&encode_u64(id));
    key
}

pub fn lease_owner_prefix(owner: &str) -> Vec<u8> {
    topic_prefix(owner)
}

/// Extract the id stored in the last 8 bytes of a lease, status or
/// dead-letter topic key.
pub fn parse_trailing_id(key: &[u8]) -> Option<u64> {
    if key.len() < 8 {
        return None;
    }
    decode_u64(&key[key.len() - 8..])
}

/// Encode a lease value: the deadline in nanos.
pub fn lease_value(lease_until: u64) -> [u8; 8] {
    encode_u64(lease_until)
}

pub fn parse_lease_value(value: &[u8]) -> Option<u64> {
    decode_u64(value)
}

/// Build a lease expiry key: `{lease_until_ns}:{id}`
///
/// Timestamp-first layout enables efficient "scan from earliest expiry" iteration
/// in `lease_until ASC, id ASC` order.
pub fn lease_expiry_key(lease_until: u64, id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    key.extend_from_slice(&encode_u64(lease_until));
    key.push(SEPARATOR);
    key.extend_from_slice(&encode_u64(id));
    key
}

pub fn parse_lease_expiry_key(key: &[u8]) -> Option<(u64, u64)> {
    if key.len() != 17 || key[8] != SEPARATOR {
        return None;
    }
    Some((decode_u64(&key[0..8])?, decode_u64(&key[9..17])?))
}

/// Build a per-topic status index key: `{topic}:{id}`.
pub fn topic_key(topic: &str, id: u64) -> Vec<u8> {
    let mut key = topic_prefix(topic);
    key.extend_from_slice(&encode_u64(id));
    key
}

pub fn topic_index_prefix(topic: &str) -> Vec<u8> {
    topic_prefix(topic)
}

/// Status index value: `{status_byte}{partition}`.
pub fn topic_value(status: crate::message::MessageStatus, partition: u32) -> [u8; 5] {
    let mut value = [0u8; 5];
    value[0] = status.as_byte();
    value[1..].copy_from_slice(&partition.to_be_bytes());
    value
}

pub fn parse_topic_value(value: &[u8]) -> Option<(crate::message::MessageStatus, u32)> {
    if value.len() != 5 {
        return None;
    }
    let status = crate::message::MessageStatus::from_byte(value[0])?;
    Some((status, decode_u32(&value[1..])?))
}

/// Build a completed-message key: `{topic}:{done_at_ns}:{id}`.
pub fn done_key(topic: &str, done_at: u64, id: u64) -> Vec<u8> {
    let mut key = topic_prefix(topic);
    key.extend_from_slice(&encode_u64(done_at));
    key.push(SEPARATOR);
    key.extend_from_slice(&encode_u64(id));
    key
}

pub fn done_topic_prefix(topic: &str) -> Vec<u8> {
    topic_prefix(topic)
}

/// Extract `(done_at, id)` from the fixed-width tail of a done key.
pub fn parse_done_key(key: &[u8]) -> Option<(u64, u64)> {
    if key.len() < 17 {
        return None;
    }
    let tail = &key[key.len() - 17..];
    Some((decode_u64(&tail[0..8])?, decode_u64(&tail[9..17])?))
}

/// Build an idempotency key: `{topic}:{idempotency_key}`. The value is the
/// id of the message that claimed it.
pub fn idempotency_key(topic: &str, key: &str) -> Vec<u8> {
    let mut buf = topic_prefix(topic);
    buf.extend_from_slice(&encode_string(key));
    buf
}

/// Build a dead-letter topic index key: `{topic}:{dead_letter_id}`.
pub fn dead_letter_topic_key(topic: &str, id: u64) -> Vec<u8> {
    topic_key(topic, id)
}

/// Build a tombstone key: `{deleted_at_ns}:{dead_letter_id}`.
pub fn tombstone_key(deleted_at: u64, id: u64) -> Vec<u8> {
    lease_expiry_key(deleted_at, id)
}

pub fn parse_tombstone_key(key: &[u8]) -> Option<(u64, u64)> {
    parse_lease_expiry_key(key)
}
