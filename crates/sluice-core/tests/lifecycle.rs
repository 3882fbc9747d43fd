mod common;

use std::collections::HashSet;
use std::num::NonZeroU32;
use std::time::Duration;

use common::{lease_all, test_queue};
use sluice_core::{partition, MessageStatus, MessageStore, RocksDbStorage, SendMessage};

#[test]
fn orders_message_retries_dead_letters_and_replays() {
    let t = test_queue();
    let mut send = SendMessage::new("orders", "A", b"order-1".to_vec());
    send.max_attempts = Some(3);
    let id = t.queue.enqueue(send).unwrap();

    for attempt in 1..=3 {
        let leased = t.queue.lease(lease_all("orders", "w1", 30, 10)).unwrap();
        assert_eq!(leased.len(), 1, "attempt {attempt} should lease the message");
        assert_eq!(leased[0].id, id);
        assert_eq!(t.queue.nack(&[id], 0).unwrap(), 1);
    }

    let msg = t.store.get_message(id).unwrap().unwrap();
    assert_eq!(msg.attempts, 3);
    assert!(t.queue.lease(lease_all("orders", "w1", 30, 10)).unwrap().is_empty());

    assert_eq!(t.queue.move_exceeded_attempts_to_dead_letter(100).unwrap(), 1);
    let stats = t.admin.topic_stats("orders").unwrap();
    assert_eq!((stats.ready, stats.leased, stats.done), (0, 0, 0));
    assert_eq!(stats.dead_letters, 1);

    let dead = t.admin.list_dead_letters("orders", 10).unwrap();
    assert_eq!(dead[0].original_id, id);
    assert_eq!(dead[0].reason, "max attempts exceeded (3/3)");

    assert_eq!(t.admin.replay_from_dead_letter("orders", 10).unwrap(), 1);
    let leased = t.queue.lease(lease_all("orders", "w2", 30, 10)).unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].attempts, 0);
    assert_eq!(leased[0].payload, b"order-1".to_vec());
    assert_eq!(leased[0].partition_id, msg.partition_id);
    assert_ne!(leased[0].id, id);
    assert_eq!(t.admin.topic_stats("orders").unwrap().dead_letters, 0);
}

#[test]
fn crashed_consumer_lease_is_reclaimed() {
    let t = test_queue();
    let id = t.queue.enqueue(SendMessage::new("orders", "A", vec![])).unwrap();
    t.queue.lease(lease_all("orders", "w1", 1, 1)).unwrap();

    t.clock.advance(Duration::from_millis(1_100));
    assert_eq!(t.admin.reclaim_expired(100).unwrap(), 1);

    let msg = t.store.get_message(id).unwrap().unwrap();
    assert_eq!(msg.status, MessageStatus::Ready);
    assert_eq!(msg.lease_owner, None);
    assert_eq!(msg.lease_until, None);
    assert_eq!(msg.attempts, 0);

    // The stale consumer's ack after reclaim is a no-op.
    assert_eq!(t.queue.ack(&[id]).unwrap(), 0);
    let leased = t.queue.lease(lease_all("orders", "w2", 30, 1)).unwrap();
    assert_eq!(leased[0].id, id);
    assert_eq!(t.queue.ack(&[id]).unwrap(), 1);
}

#[test]
fn every_message_is_acked_or_dead_lettered() {
    let t = test_queue();
    let mut ids = HashSet::new();
    for i in 0..20u8 {
        let mut send = SendMessage::new("jobs", format!("k{}", i % 5), vec![i]);
        send.max_attempts = Some(2);
        ids.insert(t.queue.enqueue(send).unwrap());
    }

    // Fail every message whose payload is odd, ack the rest.
    for _ in 0..4 {
        let leased = t.queue.lease(lease_all("jobs", "w1", 30, 100)).unwrap();
        for m in leased {
            if m.payload[0] % 2 == 1 {
                t.queue.nack(&[m.id], 0).unwrap();
            } else {
                t.queue.ack(&[m.id]).unwrap();
            }
        }
    }
    t.queue.move_exceeded_attempts_to_dead_letter(100).unwrap();

    let stats = t.admin.topic_stats("jobs").unwrap();
    assert_eq!(stats.done, 10);
    assert_eq!(stats.dead_letters, 10);
    assert_eq!(stats.ready + stats.leased, 0);

    let dead: HashSet<u64> = t
        .admin
        .list_dead_letters("jobs", 100)
        .unwrap()
        .iter()
        .map(|d| d.original_id)
        .collect();
    let done = ids
        .iter()
        .filter(|id| t.store.get_message(**id).unwrap().is_some())
        .count();
    assert_eq!(dead.len() + done, ids.len());
}

#[test]
fn priority_and_delay_order_within_partition() {
    let t = test_queue();
    let mut low = SendMessage::new("orders", "A", b"low".to_vec());
    low.priority = 0;
    let mut high = SendMessage::new("orders", "A", b"high".to_vec());
    high.priority = 10;
    let mut delayed = SendMessage::new("orders", "A", b"delayed".to_vec());
    delayed.priority = 100;
    delayed.visible_at = Some(t.store.now() + Duration::from_secs(60).as_nanos() as u64);

    t.queue.enqueue(low).unwrap();
    t.queue.enqueue(delayed).unwrap();
    t.queue.enqueue(high).unwrap();

    let leased = t.queue.lease(lease_all("orders", "w1", 30, 10)).unwrap();
    let payloads: Vec<&[u8]> = leased.iter().map(|m| m.payload.as_slice()).collect();
    assert_eq!(payloads, vec![b"high".as_slice(), b"low".as_slice()]);

    t.clock.advance(Duration::from_secs(60));
    let leased = t.queue.lease(lease_all("orders", "w2", 30, 10)).unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].payload, b"delayed".to_vec());
}

#[test]
fn idempotent_enqueue_returns_existing_id() {
    let t = test_queue();
    let mut send = SendMessage::new("orders", "A", vec![1]);
    send.idempotency_key = Some("req-7".to_string());
    let first = t.queue.enqueue(send.clone()).unwrap();
    let second = t.queue.enqueue(send).unwrap();
    assert_eq!(first, second);
    assert_eq!(t.admin.topic_stats("orders").unwrap().ready, 1);
}

#[test]
fn partitions_and_state_survive_restart() {
    let t = test_queue();
    let id = t
        .queue
        .enqueue(SendMessage::new("orders", "customer-42", vec![]))
        .unwrap();
    let before = t.store.get_message(id).unwrap().unwrap();
    let path = t.dir.path().to_path_buf();
    drop(t.queue);
    drop(t.admin);
    drop(t.store);

    let reopened = RocksDbStorage::open(&path).unwrap();
    let after = reopened.get_message(id).unwrap().unwrap();
    assert_eq!(after, before);
    assert_eq!(
        after.partition_id,
        partition("orders", "customer-42", NonZeroU32::new(16).unwrap())
    );
}
