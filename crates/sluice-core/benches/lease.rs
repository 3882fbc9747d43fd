use std::num::NonZeroU32;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use sluice_core::broker::QueueSettings;
use sluice_core::{partition, LeaseMessages, QueueService, RocksDbStorage, SendMessage};

/// Partitioner cost for short and long keys.
fn bench_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition");
    let n = NonZeroU32::new(16).unwrap();
    let long_key = "k".repeat(256);

    group.bench_function("short_key", |b| {
        b.iter(|| partition(black_box("orders"), black_box("customer-42"), n));
    });
    group.bench_function("long_key", |b| {
        b.iter(|| partition(black_box("orders"), black_box(&long_key), n));
    });

    group.finish();
}

/// One full consumer cycle: lease a batch of 10 from a pre-filled topic and
/// ack it. Every iteration refills what it consumed so depth stays constant.
fn bench_lease_ack_cycle(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RocksDbStorage::open(dir.path()).unwrap());
    let queue = QueueService::new(store, QueueSettings::default());
    for i in 0..1_000u32 {
        queue
            .enqueue(SendMessage::new("orders", format!("key-{}", i % 32), vec![0; 64]))
            .unwrap();
    }

    c.bench_function("lease_ack_10", |b| {
        b.iter_batched(
            || {
                for i in 0..10u32 {
                    queue
                        .enqueue(SendMessage::new("orders", format!("key-{i}"), vec![0; 64]))
                        .unwrap();
                }
            },
            |()| {
                let leased = queue
                    .lease(LeaseMessages {
                        topic: "orders".to_string(),
                        owner: "bench".to_string(),
                        lease_seconds: Some(30),
                        limit: 10,
                        ..Default::default()
                    })
                    .unwrap();
                let ids: Vec<u64> = leased.iter().map(|m| m.id).collect();
                black_box(queue.ack(&ids).unwrap());
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_partition, bench_lease_ack_cycle);
criterion_main!(benches);
