//! Throughput benchmarks for the hub.
//!
//! These benchmarks measure fan-out through the hub event loop and the raw
//! membership fan-out underneath it.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gateway_core::{Connection, Hub, HubConfig, Mailbox, Membership, Message};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Benchmark in-place fan-out over a membership set.
fn bench_membership_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("membership_fan_out");

    for members in [1usize, 10, 100, 1000] {
        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, &n| {
            let mut set = Membership::new();
            let mut mailboxes: Vec<Mailbox> = (0..n)
                .map(|_| {
                    let (conn, mailbox) = Connection::new(16);
                    set.insert(conn);
                    mailbox
                })
                .collect();
            let message = Arc::new(Message::new(vec![0u8; 64]));

            b.iter(|| {
                let delivery = set.fan_out(black_box(&message), None);
                for mailbox in &mut mailboxes {
                    let _ = mailbox.try_recv();
                }
                delivery
            });
        });
    }

    group.finish();
}

/// Benchmark broadcasts through the running hub loop.
fn bench_hub_broadcast(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("hub_broadcast");

    for members in [10usize, 100] {
        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, &n| {
            let (hub, _task) = rt.block_on(async { Hub::spawn(HubConfig::default()) });
            // Drain every mailbox so no member is evicted mid-run.
            for _ in 0..n {
                let mut mailbox = hub.connect().unwrap();
                rt.spawn(async move { while mailbox.recv().await.is_some() {} });
            }

            b.to_async(&rt).iter(|| {
                let hub = hub.clone();
                async move {
                    hub.broadcast(Message::new(vec![0u8; 64])).unwrap();
                    // The stats round-trip waits for the broadcast to be processed.
                    hub.stats().await.unwrap()
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_membership_fan_out, bench_hub_broadcast);
criterion_main!(benches);
