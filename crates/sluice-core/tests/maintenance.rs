use std::sync::Arc;
use std::time::{Duration, Instant};

use sluice_core::broker::{DeadLetterSettings, MaintenanceConfig, QueueSettings};
use sluice_core::{
    AdminService, LeaseMessages, Maintenance, MessageStore, QueueService, RocksDbStorage,
    SendMessage,
};

fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    check()
}

#[test]
fn background_tasks_reclaim_and_dead_letter() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn MessageStore> = Arc::new(RocksDbStorage::open(dir.path()).unwrap());
    let queue = Arc::new(QueueService::new(store.clone(), QueueSettings::default()));
    let admin = Arc::new(AdminService::new(
        store.clone(),
        QueueSettings::default(),
        DeadLetterSettings::default(),
    ));
    let config = MaintenanceConfig {
        reaper_interval_ms: 50,
        mover_interval_ms: 50,
        ..Default::default()
    };
    let maintenance = Maintenance::start(queue.clone(), admin.clone(), &config).unwrap();

    let stuck = queue.enqueue(SendMessage::new("orders", "A", vec![])).unwrap();
    let mut poison = SendMessage::new("orders", "B", vec![]);
    poison.max_attempts = Some(1);
    let poison = queue.enqueue(poison).unwrap();

    let leased = queue
        .lease(LeaseMessages {
            topic: "orders".to_string(),
            owner: "w1".to_string(),
            lease_seconds: Some(1),
            limit: 10,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(leased.len(), 2);
    queue.nack(&[poison], 0).unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            admin.topic_stats("orders").unwrap().dead_letters == 1
        }),
        "mover should dead-letter the exhausted message"
    );
    assert!(
        wait_until(Duration::from_secs(5), || {
            store.get_message(stuck).unwrap().unwrap().lease_owner.is_none()
        }),
        "reaper should reclaim the expired lease"
    );

    maintenance.shutdown().unwrap();
}
