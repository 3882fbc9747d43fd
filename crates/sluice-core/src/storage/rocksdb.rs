use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::clock::{secs_to_nanos, Clock, SystemClock};
use crate::error::{StorageError, StorageResult};
use crate::message::{DeadLetter, Message, MessageStatus, NewMessage};
use crate::partition::partition;
use crate::storage::keys::{self, ReadyEntry};
use crate::storage::traits::{MessageStore, ReclaimPolicy, SoftDeleteDlqSupport, StatusCounts};

const CF_MESSAGES: &str = "messages";
const CF_READY: &str = "ready";
const CF_EXHAUSTED: &str = "exhausted";
const CF_LEASES: &str = "leases";
const CF_LEASE_EXPIRY: &str = "lease_expiry";
const CF_DONE: &str = "done";
const CF_TOPICS: &str = "topics";
const CF_IDEMPOTENCY: &str = "idempotency";
const CF_DEAD_LETTERS: &str = "dead_letters";
const CF_DEAD_LETTER_TOPICS: &str = "dead_letter_topics";
const CF_TOMBSTONES: &str = "tombstones";
const CF_STATE: &str = "state";

/// All column family names (excluding `default` which RocksDB creates automatically).
const COLUMN_FAMILIES: &[&str] = &[
    CF_MESSAGES,
    CF_READY,
    CF_EXHAUSTED,
    CF_LEASES,
    CF_LEASE_EXPIRY,
    CF_DONE,
    CF_TOPICS,
    CF_IDEMPOTENCY,
    CF_DEAD_LETTERS,
    CF_DEAD_LETTER_TOPICS,
    CF_TOMBSTONES,
    CF_STATE,
];

type DB = DBWithThreadMode<MultiThreaded>;

/// RocksDB-backed message store.
///
/// Messages live in `messages` keyed by id. Every status has its own index CF
/// (`ready`, `exhausted`, `leases` + `lease_expiry`, `done`) and `topics`
/// mirrors each message's status for counting. Every mutation selects its
/// rows while holding `write_lock` and commits one `WriteBatch`, so index and
/// record always change together and two writers never claim the same row.
pub struct RocksDbStorage {
    db: DB,
    clock: Arc<dyn Clock>,
    reclaim_policy: ReclaimPolicy,
    write_lock: Mutex<()>,
}

impl RocksDbStorage {
    /// Open or create a RocksDB database at the given path with all column families.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let cf_opts = Options::default();
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        Ok(Self {
            db,
            clock: Arc::new(SystemClock),
            reclaim_policy: ReclaimPolicy::default(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_reclaim_policy(mut self, policy: ReclaimPolicy) -> Self {
        self.reclaim_policy = policy;
        self
    }

    fn cf(&self, name: &str) -> StorageResult<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::RocksDb(format!("column family not found: {name}")))
    }

    /// The lock guards no data, only the select-then-write critical section,
    /// so a poisoned lock is still safe to take.
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn get_raw(&self, cf_name: &str, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let cf = self.cf(cf_name)?;
        Ok(self.db.get_cf(&cf, key)?)
    }

    fn get_json<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> StorageResult<Option<T>> {
        match self.get_raw(cf_name, key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn load_message(&self, id: u64) -> StorageResult<Option<Message>> {
        self.get_json(CF_MESSAGES, &keys::id_key(id))
    }

    fn load_dead_letter(&self, id: u64) -> StorageResult<Option<DeadLetter>> {
        self.get_json(CF_DEAD_LETTERS, &keys::id_key(id))
    }

    /// Iterate keys starting with `prefix` in order. The visitor returns
    /// `false` to stop early. An empty prefix scans the whole CF.
    fn scan_prefix<F>(&self, cf_name: &str, prefix: &[u8], visit: F) -> StorageResult<()>
    where
        F: FnMut(&[u8], &[u8]) -> StorageResult<bool>,
    {
        self.scan_from(cf_name, prefix, prefix, visit)
    }

    /// Like `scan_prefix`, but starts at `from`, which must sort at or after
    /// `prefix`.
    fn scan_from<F>(
        &self,
        cf_name: &str,
        from: &[u8],
        prefix: &[u8],
        mut visit: F,
    ) -> StorageResult<()>
    where
        F: FnMut(&[u8], &[u8]) -> StorageResult<bool>,
    {
        let cf = self.cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(from, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            if !visit(&key, &value)? {
                break;
            }
        }
        Ok(())
    }

    fn read_sequence(&self, name: &str) -> StorageResult<u64> {
        match self.get_raw(CF_STATE, name.as_bytes())? {
            Some(value) => keys::parse_id_key(&value)
                .ok_or_else(|| StorageError::CorruptData(format!("sequence {name}"))),
            None => Ok(0),
        }
    }

    /// Collect up to `limit` visible ready entries of one partition in lease
    /// order. Inside a priority band entries are ordered by `visible_at`, so
    /// the first invisible entry ends the band and the scan seeks past it.
    /// Work is bounded by `limit` plus the number of priority bands.
    fn collect_partition_ready(
        &self,
        topic: &str,
        partition: u32,
        now: u64,
        limit: usize,
        out: &mut Vec<ReadyEntry>,
    ) -> StorageResult<()> {
        let prefix = keys::ready_partition_prefix(topic, partition);
        let mut from = prefix.clone();
        let mut taken = 0usize;
        while taken < limit {
            let mut next_band = None;
            self.scan_from(CF_READY, &from, &prefix, |key, _| {
                let entry = keys::parse_ready_key(key)
                    .ok_or_else(|| StorageError::CorruptData("ready index key".into()))?;
                if entry.visible_at > now {
                    next_band = Some(keys::ready_band_end(topic, partition, entry.priority));
                    return Ok(false);
                }
                out.push(entry);
                taken += 1;
                Ok(taken < limit)
            })?;
            match next_band {
                Some(key) => from = key,
                None => break,
            }
        }
        Ok(())
    }

    /// Partitions of `topic` with at least one ready entry. Each partition
    /// costs one seek, not a walk over its entries.
    fn ready_partitions(&self, topic: &str) -> StorageResult<Vec<u32>> {
        let prefix = keys::ready_topic_prefix(topic);
        let mut from = prefix.clone();
        let mut partitions = Vec::new();
        loop {
            let mut found = None;
            self.scan_from(CF_READY, &from, &prefix, |key, _| {
                let entry = keys::parse_ready_key(key)
                    .ok_or_else(|| StorageError::CorruptData("ready index key".into()))?;
                found = Some(entry.partition);
                Ok(false)
            })?;
            let Some(partition) = found else {
                break;
            };
            partitions.push(partition);
            match partition.checked_add(1) {
                Some(next) => from = keys::ready_partition_prefix(topic, next),
                None => break,
            }
        }
        Ok(partitions)
    }

    fn dead_letter_from(message: &Message, id: u64, reason: &str, now: u64) -> DeadLetter {
        DeadLetter {
            id,
            original_id: message.id,
            topic: message.topic.clone(),
            partition_id: message.partition_id,
            priority: message.priority,
            payload: message.payload.clone(),
            headers: message.headers.clone(),
            attempts: message.attempts,
            reason: reason.to_string(),
            created_at: now,
            deleted_at: None,
        }
    }

    /// Move each listed message that passes `eligible` to the dead-letter
    /// store. Runs inside the caller's critical section.
    fn stage_dead_letters<F>(
        &self,
        batch: &mut Batch<'_>,
        ids: impl IntoIterator<Item = u64>,
        now: u64,
        mut reason_for: F,
    ) -> StorageResult<usize>
    where
        F: FnMut(&Message) -> Option<String>,
    {
        let mut next_id = self.read_sequence(keys::DEAD_LETTER_SEQUENCE)?;
        let mut moved = 0usize;
        for id in ids {
            let Some(message) = self.load_message(id)? else {
                continue;
            };
            let Some(reason) = reason_for(&message) else {
                continue;
            };
            next_id += 1;
            let dead_letter = Self::dead_letter_from(&message, next_id, &reason, now);
            batch.delete_message(&message)?;
            batch.put_dead_letter(&dead_letter)?;
            debug!(
                topic = %message.topic,
                msg_id = message.id,
                dead_letter_id = dead_letter.id,
                attempts = message.attempts,
                %reason,
                "message moved to dead-letter store"
            );
            moved += 1;
        }
        if moved > 0 {
            batch.put(CF_STATE, keys::DEAD_LETTER_SEQUENCE, keys::id_key(next_id))?;
        }
        Ok(moved)
    }
}

/// A write batch bound to the store's column families, with helpers that
/// keep the status indexes in step with the message record.
struct Batch<'a> {
    store: &'a RocksDbStorage,
    inner: WriteBatch,
}

impl<'a> Batch<'a> {
    fn new(store: &'a RocksDbStorage) -> Self {
        Self {
            store,
            inner: WriteBatch::default(),
        }
    }

    fn put(&mut self, cf_name: &str, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StorageResult<()> {
        let cf = self.store.cf(cf_name)?;
        self.inner.put_cf(&cf, key, value);
        Ok(())
    }

    fn delete(&mut self, cf_name: &str, key: impl AsRef<[u8]>) -> StorageResult<()> {
        let cf = self.store.cf(cf_name)?;
        self.inner.delete_cf(&cf, key);
        Ok(())
    }

    fn put_message(&mut self, message: &Message) -> StorageResult<()> {
        let value = serde_json::to_vec(message)?;
        self.put(CF_MESSAGES, keys::id_key(message.id), value)?;
        self.put(
            CF_TOPICS,
            keys::topic_key(&message.topic, message.id),
            keys::topic_value(message.status, message.partition_id),
        )
    }

    fn index_message(&mut self, message: &Message) -> StorageResult<()> {
        match message.status {
            MessageStatus::Ready if message.is_exhausted() => {
                self.put(CF_EXHAUSTED, keys::id_key(message.id), b"")
            }
            MessageStatus::Ready => self.put(
                CF_READY,
                keys::ready_key(
                    &message.topic,
                    message.partition_id,
                    message.priority,
                    message.visible_at,
                    message.id,
                ),
                b"",
            ),
            MessageStatus::Leased => {
                let (Some(owner), Some(until)) = (message.lease_owner.as_deref(), message.lease_until)
                else {
                    return Err(StorageError::CorruptData(format!(
                        "leased message {} without owner or deadline",
                        message.id
                    )));
                };
                self.put(CF_LEASES, keys::lease_key(owner, message.id), keys::lease_value(until))?;
                self.put(CF_LEASE_EXPIRY, keys::lease_expiry_key(until, message.id), b"")
            }
            MessageStatus::Done => self.put(
                CF_DONE,
                keys::done_key(&message.topic, message.updated_at, message.id),
                b"",
            ),
        }
    }

    fn unindex_message(&mut self, message: &Message) -> StorageResult<()> {
        match message.status {
            MessageStatus::Ready => {
                self.delete(CF_EXHAUSTED, keys::id_key(message.id))?;
                self.delete(
                    CF_READY,
                    keys::ready_key(
                        &message.topic,
                        message.partition_id,
                        message.priority,
                        message.visible_at,
                        message.id,
                    ),
                )
            }
            MessageStatus::Leased => {
                if let Some(owner) = message.lease_owner.as_deref() {
                    self.delete(CF_LEASES, keys::lease_key(owner, message.id))?;
                }
                if let Some(until) = message.lease_until {
                    self.delete(CF_LEASE_EXPIRY, keys::lease_expiry_key(until, message.id))?;
                }
                Ok(())
            }
            MessageStatus::Done => self.delete(
                CF_DONE,
                keys::done_key(&message.topic, message.updated_at, message.id),
            ),
        }
    }

    /// Swap a stored message for its updated form, moving index entries.
    fn replace_message(&mut self, old: &Message, new: &Message) -> StorageResult<()> {
        self.unindex_message(old)?;
        self.index_message(new)?;
        self.put_message(new)
    }

    fn delete_message(&mut self, message: &Message) -> StorageResult<()> {
        self.unindex_message(message)?;
        self.delete(CF_TOPICS, keys::topic_key(&message.topic, message.id))?;
        self.delete(CF_MESSAGES, keys::id_key(message.id))?;

        // Release the idempotency key only if this message still owns it.
        if let Some(ref key) = message.idempotency_key {
            let idem_key = keys::idempotency_key(&message.topic, key);
            let owner = self
                .store
                .get_raw(CF_IDEMPOTENCY, &idem_key)?
                .and_then(|v| keys::parse_id_key(&v));
            if owner == Some(message.id) {
                self.delete(CF_IDEMPOTENCY, idem_key)?;
            }
        }
        Ok(())
    }

    fn put_dead_letter(&mut self, dead_letter: &DeadLetter) -> StorageResult<()> {
        let value = serde_json::to_vec(dead_letter)?;
        self.put(CF_DEAD_LETTERS, keys::id_key(dead_letter.id), value)?;
        match dead_letter.deleted_at {
            None => self.put(
                CF_DEAD_LETTER_TOPICS,
                keys::dead_letter_topic_key(&dead_letter.topic, dead_letter.id),
                b"",
            ),
            Some(deleted_at) => {
                self.put(CF_TOMBSTONES, keys::tombstone_key(deleted_at, dead_letter.id), b"")
            }
        }
    }

    fn delete_dead_letter(&mut self, dead_letter: &DeadLetter) -> StorageResult<()> {
        self.delete(CF_DEAD_LETTERS, keys::id_key(dead_letter.id))?;
        match dead_letter.deleted_at {
            None => self.delete(
                CF_DEAD_LETTER_TOPICS,
                keys::dead_letter_topic_key(&dead_letter.topic, dead_letter.id),
            ),
            Some(deleted_at) => {
                self.delete(CF_TOMBSTONES, keys::tombstone_key(deleted_at, dead_letter.id))
            }
        }
    }

    fn commit(self) -> StorageResult<()> {
        self.store.db.write(self.inner)?;
        Ok(())
    }
}

fn unique_ids(ids: &[u64]) -> BTreeSet<u64> {
    ids.iter().copied().collect()
}

fn sort_in_lease_order(messages: &mut [Message]) {
    messages.sort_by_key(|m| (std::cmp::Reverse(m.priority), m.visible_at, m.id));
}

impl MessageStore for RocksDbStorage {
    fn now(&self) -> u64 {
        self.clock.now_ns()
    }

    fn save_message(&self, new: NewMessage) -> StorageResult<u64> {
        let _guard = self.lock();
        let now = self.now();

        let idem_key = new
            .idempotency_key
            .as_deref()
            .map(|key| keys::idempotency_key(&new.topic, key));
        if let Some(ref idem_key) = idem_key {
            if let Some(raw) = self.get_raw(CF_IDEMPOTENCY, idem_key)? {
                let existing = keys::parse_id_key(&raw)
                    .ok_or_else(|| StorageError::CorruptData("idempotency value".into()))?;
                if self.load_message(existing)?.is_some() {
                    debug!(topic = %new.topic, msg_id = existing, "duplicate enqueue ignored");
                    return Ok(existing);
                }
            }
        }

        let id = self.read_sequence(keys::MESSAGE_SEQUENCE)? + 1;
        let message = Message {
            id,
            partition_id: partition(&new.topic, &new.partition_key, new.num_partitions),
            topic: new.topic,
            priority: new.priority,
            payload: new.payload,
            headers: new.headers,
            status: MessageStatus::Ready,
            visible_at: new.visible_at.unwrap_or(now),
            lease_owner: None,
            lease_until: None,
            attempts: 0,
            max_attempts: new.max_attempts,
            idempotency_key: new.idempotency_key,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let mut batch = Batch::new(self);
        batch.put(CF_STATE, keys::MESSAGE_SEQUENCE, keys::id_key(id))?;
        batch.index_message(&message)?;
        batch.put_message(&message)?;
        if let Some(idem_key) = idem_key {
            batch.put(CF_IDEMPOTENCY, idem_key, keys::id_key(id))?;
        }
        batch.commit()?;

        debug!(topic = %message.topic, msg_id = id, partition = message.partition_id, "message saved");
        Ok(id)
    }

    fn lease_messages(
        &self,
        topic: &str,
        partitions: &[u32],
        owner: &str,
        lease_seconds: u64,
        limit: usize,
    ) -> StorageResult<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let _guard = self.lock();
        let now = self.now();

        let partitions: BTreeSet<u32> = if partitions.is_empty() {
            self.ready_partitions(topic)?.into_iter().collect()
        } else {
            partitions.iter().copied().collect()
        };
        let mut candidates = Vec::new();
        for p in partitions {
            self.collect_partition_ready(topic, p, now, limit, &mut candidates)?;
            candidates.sort_by_key(ReadyEntry::order_key);
            candidates.truncate(limit);
        }

        let lease_until = now.saturating_add(secs_to_nanos(lease_seconds));
        let mut batch = Batch::new(self);
        let mut granted = Vec::with_capacity(candidates.len());
        for entry in candidates {
            let message = match self.load_message(entry.id)? {
                Some(m) if m.status == MessageStatus::Ready => m,
                _ => {
                    warn!(%topic, msg_id = entry.id, "stale ready index entry, removing");
                    batch.delete(
                        CF_READY,
                        keys::ready_key(topic, entry.partition, entry.priority, entry.visible_at, entry.id),
                    )?;
                    continue;
                }
            };
            let mut updated = message.clone();
            updated.status = MessageStatus::Leased;
            updated.lease_owner = Some(owner.to_string());
            updated.lease_until = Some(lease_until);
            updated.touch(now);
            batch.replace_message(&message, &updated)?;
            granted.push(updated);
        }
        batch.commit()?;

        debug!(%topic, %owner, leased = granted.len(), "lease batch");
        Ok(granted)
    }

    fn find_leased_by_owner(
        &self,
        owner: &str,
        now: u64,
        limit: usize,
    ) -> StorageResult<Vec<Message>> {
        let mut ids = Vec::new();
        self.scan_prefix(CF_LEASES, &keys::lease_owner_prefix(owner), |key, value| {
            let until = keys::parse_lease_value(value)
                .ok_or_else(|| StorageError::CorruptData("lease value".into()))?;
            if until >= now {
                let id = keys::parse_trailing_id(key)
                    .ok_or_else(|| StorageError::CorruptData("lease key".into()))?;
                ids.push(id);
            }
            Ok(true)
        })?;

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(message) = self.load_message(id)? {
                if message.status == MessageStatus::Leased
                    && message.lease_owner.as_deref() == Some(owner)
                {
                    messages.push(message);
                }
            }
        }
        sort_in_lease_order(&mut messages);
        messages.truncate(limit);
        Ok(messages)
    }

    fn ack_batch(&self, ids: &[u64]) -> StorageResult<usize> {
        let _guard = self.lock();
        let now = self.now();
        let mut batch = Batch::new(self);
        let mut acked = 0usize;
        for id in unique_ids(ids) {
            let Some(message) = self.load_message(id)? else {
                continue;
            };
            if message.status != MessageStatus::Leased {
                continue;
            }
            let mut updated = message.clone();
            updated.status = MessageStatus::Done;
            updated.clear_lease();
            updated.touch(now);
            batch.replace_message(&message, &updated)?;
            acked += 1;
        }
        batch.commit()?;
        Ok(acked)
    }

    fn nack_batch(&self, ids: &[u64], backoff_seconds: u64) -> StorageResult<usize> {
        let _guard = self.lock();
        let now = self.now();
        let visible_at = now.saturating_add(secs_to_nanos(backoff_seconds));
        let mut batch = Batch::new(self);
        let mut nacked = 0usize;
        for id in unique_ids(ids) {
            let Some(message) = self.load_message(id)? else {
                continue;
            };
            if message.status != MessageStatus::Leased {
                continue;
            }
            let mut updated = message.clone();
            updated.status = MessageStatus::Ready;
            updated.clear_lease();
            updated.attempts = updated.attempts.saturating_add(1);
            updated.visible_at = visible_at;
            updated.touch(now);
            batch.replace_message(&message, &updated)?;
            debug!(
                topic = %updated.topic,
                msg_id = id,
                attempts = updated.attempts,
                exhausted = updated.is_exhausted(),
                "nack processed"
            );
            nacked += 1;
        }
        batch.commit()?;
        Ok(nacked)
    }

    fn extend_leases(&self, owner: &str, ids: &[u64], lease_seconds: u64) -> StorageResult<usize> {
        let _guard = self.lock();
        let now = self.now();
        let lease_until = now.saturating_add(secs_to_nanos(lease_seconds));
        let mut batch = Batch::new(self);
        let mut extended = 0usize;
        for id in unique_ids(ids) {
            let Some(message) = self.load_message(id)? else {
                continue;
            };
            let held = message.status == MessageStatus::Leased
                && message.lease_owner.as_deref() == Some(owner)
                && message.lease_until.is_some_and(|until| until >= now);
            if !held {
                continue;
            }
            let mut updated = message.clone();
            updated.lease_until = Some(lease_until);
            updated.touch(now);
            batch.replace_message(&message, &updated)?;
            extended += 1;
        }
        batch.commit()?;
        Ok(extended)
    }

    fn dead_letter_batch(&self, ids: &[u64], reason: &str) -> StorageResult<usize> {
        let _guard = self.lock();
        let now = self.now();
        let mut batch = Batch::new(self);
        let moved = self.stage_dead_letters(&mut batch, unique_ids(ids), now, |message| {
            (message.status != MessageStatus::Done).then(|| reason.to_string())
        })?;
        batch.commit()?;
        Ok(moved)
    }

    fn reclaim_expired_leases(&self, limit: usize) -> StorageResult<usize> {
        if limit == 0 {
            return Ok(0);
        }
        let _guard = self.lock();
        let now = self.now();

        let mut expired = Vec::new();
        self.scan_prefix(CF_LEASE_EXPIRY, &[], |key, _| {
            let (until, id) = keys::parse_lease_expiry_key(key)
                .ok_or_else(|| StorageError::CorruptData("lease expiry key".into()))?;
            if until >= now {
                return Ok(false);
            }
            expired.push((until, id));
            Ok(expired.len() < limit)
        })?;

        let mut batch = Batch::new(self);
        let mut reclaimed = 0usize;
        for (until, id) in expired {
            let message = match self.load_message(id)? {
                Some(m) if m.status == MessageStatus::Leased && m.lease_until == Some(until) => m,
                _ => {
                    warn!(msg_id = id, "orphaned lease_expiry entry, removing");
                    batch.delete(CF_LEASE_EXPIRY, keys::lease_expiry_key(until, id))?;
                    continue;
                }
            };
            let mut updated = message.clone();
            updated.status = MessageStatus::Ready;
            updated.clear_lease();
            if self.reclaim_policy == ReclaimPolicy::CountAsAttempt {
                updated.attempts = updated.attempts.saturating_add(1);
            }
            updated.touch(now);
            batch.replace_message(&message, &updated)?;
            debug!(
                topic = %updated.topic,
                msg_id = id,
                attempts = updated.attempts,
                "reclaimed expired lease"
            );
            reclaimed += 1;
        }
        batch.commit()?;
        Ok(reclaimed)
    }

    fn move_exceeded_to_dead_letter(&self, limit: usize) -> StorageResult<usize> {
        if limit == 0 {
            return Ok(0);
        }
        let _guard = self.lock();
        let now = self.now();

        let mut ids = Vec::new();
        self.scan_prefix(CF_EXHAUSTED, &[], |key, _| {
            let id = keys::parse_id_key(key)
                .ok_or_else(|| StorageError::CorruptData("exhausted index key".into()))?;
            ids.push(id);
            Ok(ids.len() < limit)
        })?;

        let mut batch = Batch::new(self);
        for id in &ids {
            // Entries are rewritten or dropped below; clear stale ones up front.
            batch.delete(CF_EXHAUSTED, keys::id_key(*id))?;
        }
        let moved = self.stage_dead_letters(&mut batch, ids, now, |message| {
            (message.status != MessageStatus::Done && message.is_exhausted()).then(|| {
                format!(
                    "max attempts exceeded ({}/{})",
                    message.attempts, message.max_attempts
                )
            })
        })?;
        batch.commit()?;
        Ok(moved)
    }

    fn purge_done_before(&self, topic: &str, before: u64) -> StorageResult<usize> {
        let _guard = self.lock();

        let mut done = Vec::new();
        self.scan_prefix(CF_DONE, &keys::done_topic_prefix(topic), |key, _| {
            let (done_at, id) = keys::parse_done_key(key)
                .ok_or_else(|| StorageError::CorruptData("done index key".into()))?;
            if done_at >= before {
                return Ok(false);
            }
            done.push((done_at, id));
            Ok(true)
        })?;

        let mut batch = Batch::new(self);
        let mut purged = 0usize;
        for (done_at, id) in done {
            match self.load_message(id)? {
                Some(message) if message.status == MessageStatus::Done => {
                    batch.delete_message(&message)?;
                    purged += 1;
                }
                _ => batch.delete(CF_DONE, keys::done_key(topic, done_at, id))?,
            }
        }
        batch.commit()?;
        Ok(purged)
    }

    fn get_message(&self, id: u64) -> StorageResult<Option<Message>> {
        self.load_message(id)
    }

    fn count_by_status(&self, topic: &str) -> StorageResult<StatusCounts> {
        let mut counts = StatusCounts::default();
        self.scan_prefix(CF_TOPICS, &keys::topic_index_prefix(topic), |_, value| {
            let (status, _) = keys::parse_topic_value(value)
                .ok_or_else(|| StorageError::CorruptData("topic index value".into()))?;
            match status {
                MessageStatus::Ready => counts.ready += 1,
                MessageStatus::Leased => counts.leased += 1,
                MessageStatus::Done => counts.done += 1,
            }
            Ok(true)
        })?;
        Ok(counts)
    }

    fn ready_count_per_partition(&self, topic: &str) -> StorageResult<BTreeMap<u32, u64>> {
        let mut per_partition = BTreeMap::new();
        self.scan_prefix(CF_TOPICS, &keys::topic_index_prefix(topic), |_, value| {
            let (status, partition) = keys::parse_topic_value(value)
                .ok_or_else(|| StorageError::CorruptData("topic index value".into()))?;
            if status == MessageStatus::Ready {
                *per_partition.entry(partition).or_insert(0u64) += 1;
            }
            Ok(true)
        })?;
        Ok(per_partition)
    }

    fn dead_letter_count_by_topic(&self, topic: &str) -> StorageResult<u64> {
        let mut count = 0u64;
        self.scan_prefix(CF_DEAD_LETTER_TOPICS, &keys::topic_index_prefix(topic), |_, _| {
            count += 1;
            Ok(true)
        })?;
        Ok(count)
    }

    fn find_dead_letters_by_topic(&self, topic: &str, limit: usize) -> StorageResult<Vec<DeadLetter>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        self.scan_prefix(CF_DEAD_LETTER_TOPICS, &keys::topic_index_prefix(topic), |key, _| {
            let id = keys::parse_trailing_id(key)
                .ok_or_else(|| StorageError::CorruptData("dead letter topic key".into()))?;
            ids.push(id);
            Ok(ids.len() < limit)
        })?;

        let mut dead_letters = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(dl) = self.load_dead_letter(id)? {
                if dl.deleted_at.is_none() {
                    dead_letters.push(dl);
                }
            }
        }
        Ok(dead_letters)
    }

    fn get_dead_letter(&self, id: u64) -> StorageResult<Option<DeadLetter>> {
        Ok(self.load_dead_letter(id)?.filter(|dl| dl.deleted_at.is_none()))
    }

    fn save_recovered_message(&self, dead_letter: &DeadLetter, max_attempts: u32) -> StorageResult<u64> {
        let _guard = self.lock();
        let now = self.now();
        let id = self.read_sequence(keys::MESSAGE_SEQUENCE)? + 1;
        let message = Message {
            id,
            topic: dead_letter.topic.clone(),
            partition_id: dead_letter.partition_id,
            priority: dead_letter.priority,
            payload: dead_letter.payload.clone(),
            headers: dead_letter.headers.clone(),
            status: MessageStatus::Ready,
            visible_at: now,
            lease_owner: None,
            lease_until: None,
            attempts: 0,
            max_attempts,
            idempotency_key: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let mut batch = Batch::new(self);
        batch.put(CF_STATE, keys::MESSAGE_SEQUENCE, keys::id_key(id))?;
        batch.index_message(&message)?;
        batch.put_message(&message)?;
        batch.commit()?;

        debug!(
            topic = %message.topic,
            msg_id = id,
            dead_letter_id = dead_letter.id,
            "recovered message saved"
        );
        Ok(id)
    }

    fn delete_dead_letter_by_id(&self, id: u64) -> StorageResult<bool> {
        let _guard = self.lock();
        // A tombstoned dead letter is already gone for callers; only the
        // retention purge removes it.
        let dead_letter = match self.load_dead_letter(id)? {
            Some(dl) if dl.deleted_at.is_none() => dl,
            _ => return Ok(false),
        };
        let mut batch = Batch::new(self);
        batch.delete_dead_letter(&dead_letter)?;
        batch.commit()?;
        Ok(true)
    }

    fn purge_dead_letters_by_topic(&self, topic: &str) -> StorageResult<usize> {
        let _guard = self.lock();

        let mut ids = Vec::new();
        self.scan_prefix(CF_DEAD_LETTER_TOPICS, &keys::topic_index_prefix(topic), |key, _| {
            let id = keys::parse_trailing_id(key)
                .ok_or_else(|| StorageError::CorruptData("dead letter topic key".into()))?;
            ids.push(id);
            Ok(true)
        })?;
        // Tombstones are not indexed by topic.
        self.scan_prefix(CF_TOMBSTONES, &[], |key, _| {
            let (_, id) = keys::parse_tombstone_key(key)
                .ok_or_else(|| StorageError::CorruptData("tombstone key".into()))?;
            ids.push(id);
            Ok(true)
        })?;

        let mut batch = Batch::new(self);
        let mut purged = 0usize;
        for id in ids {
            if let Some(dead_letter) = self.load_dead_letter(id)? {
                if dead_letter.topic == topic {
                    batch.delete_dead_letter(&dead_letter)?;
                    purged += 1;
                }
            }
        }
        batch.commit()?;
        Ok(purged)
    }

    fn soft_delete_support(&self) -> Option<&dyn SoftDeleteDlqSupport> {
        Some(self)
    }
}

impl SoftDeleteDlqSupport for RocksDbStorage {
    fn soft_delete_dead_letters_by_topic(&self, topic: &str) -> StorageResult<usize> {
        let _guard = self.lock();
        let now = self.now();

        let mut ids = Vec::new();
        self.scan_prefix(CF_DEAD_LETTER_TOPICS, &keys::topic_index_prefix(topic), |key, _| {
            let id = keys::parse_trailing_id(key)
                .ok_or_else(|| StorageError::CorruptData("dead letter topic key".into()))?;
            ids.push(id);
            Ok(true)
        })?;

        let mut batch = Batch::new(self);
        let mut deleted = 0usize;
        for id in ids {
            let Some(dead_letter) = self.load_dead_letter(id)? else {
                batch.delete(CF_DEAD_LETTER_TOPICS, keys::dead_letter_topic_key(topic, id))?;
                continue;
            };
            if dead_letter.deleted_at.is_some() {
                continue;
            }
            let mut tombstoned = dead_letter.clone();
            tombstoned.deleted_at = Some(now);
            batch.delete_dead_letter(&dead_letter)?;
            batch.put_dead_letter(&tombstoned)?;
            deleted += 1;
        }
        batch.commit()?;
        Ok(deleted)
    }

    fn purge_soft_deleted_before(&self, before: u64) -> StorageResult<usize> {
        let _guard = self.lock();

        let mut tombstones = Vec::new();
        self.scan_prefix(CF_TOMBSTONES, &[], |key, _| {
            let (deleted_at, id) = keys::parse_tombstone_key(key)
                .ok_or_else(|| StorageError::CorruptData("tombstone key".into()))?;
            if deleted_at >= before {
                return Ok(false);
            }
            tombstones.push((deleted_at, id));
            Ok(true)
        })?;

        let mut batch = Batch::new(self);
        let mut purged = 0usize;
        for (deleted_at, id) in tombstones {
            match self.load_dead_letter(id)? {
                Some(dead_letter) if dead_letter.deleted_at == Some(deleted_at) => {
                    batch.delete_dead_letter(&dead_letter)?;
                    purged += 1;
                }
                _ => batch.delete(CF_TOMBSTONES, keys::tombstone_key(deleted_at, id))?,
            }
        }
        batch.commit()?;
        Ok(purged)
    }
}
