#![allow(dead_code)]

use std::sync::Arc;

use sluice_core::broker::{DeadLetterSettings, QueueSettings};
use sluice_core::clock::NANOS_PER_SEC;
use sluice_core::{
    AdminService, LeaseMessages, ManualClock, MessageStore, QueueService, RocksDbStorage,
};

pub struct TestQueue {
    pub store: Arc<dyn MessageStore>,
    pub queue: Arc<QueueService>,
    pub admin: Arc<AdminService>,
    pub clock: Arc<ManualClock>,
    pub dir: tempfile::TempDir,
}

/// Services over a fresh RocksDB directory driven by a manual clock.
pub fn test_queue() -> TestQueue {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(1_700_000_000 * NANOS_PER_SEC));
    let store: Arc<dyn MessageStore> = Arc::new(
        RocksDbStorage::open(dir.path())
            .unwrap()
            .with_clock(clock.clone()),
    );
    let queue = Arc::new(QueueService::new(store.clone(), QueueSettings::default()));
    let admin = Arc::new(AdminService::new(
        store.clone(),
        QueueSettings::default(),
        DeadLetterSettings::default(),
    ));
    TestQueue {
        store,
        queue,
        admin,
        clock,
        dir,
    }
}

pub fn lease_all(topic: &str, owner: &str, lease_seconds: u64, limit: usize) -> LeaseMessages {
    LeaseMessages {
        topic: topic.to_string(),
        partitions: Vec::new(),
        owner: owner.to_string(),
        lease_seconds: Some(lease_seconds),
        limit,
    }
}
