//! Benchmarks for queues and schedulers.
//!
//! Benchmarks cover:
//! - Single-threaded push/pop per queue kind
//! - Growable ring growth from a tiny initial capacity
//! - Post-and-drain throughput of a thread-pool scheduler per topology
//! - Skewed per-worker load that only stealing can balance
//! - Servant call round trips

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use servant_pool::config::{BackoffPolicy, QueueTopology, SchedulerConfig};
use servant_pool::core::{
    new_queue, Job, JobQueue, OverflowPolicy, QueueKind, Scheduler, ThreadPoolScheduler,
};
use servant_pool::servant::ServantProxy;

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_queue_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_pop");

    for kind in [
        QueueKind::Growable,
        QueueKind::Spsc,
        QueueKind::Stealing,
        QueueKind::Fifo,
    ] {
        for size in [100u64, 1_000] {
            group.throughput(Throughput::Elements(size));
            group.bench_with_input(
                BenchmarkId::new(format!("{kind:?}"), size),
                &size,
                |b, &size| {
                    let queue = new_queue(kind, 2_048, OverflowPolicy::Grow);
                    b.iter(|| {
                        for _ in 0..size {
                            queue.push(Job::new(|| {})).unwrap();
                        }
                        for _ in 0..size {
                            black_box(queue.try_pop());
                        }
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_growable_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("growable_growth");

    for size in [64u64, 1_024] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let queue = new_queue(QueueKind::Growable, 2, OverflowPolicy::Grow);
                for _ in 0..size {
                    queue.push(Job::new(|| {})).unwrap();
                }
                black_box(queue.len())
            });
        });
    }

    group.finish();
}

// ============================================================================
// Scheduler Benchmarks
// ============================================================================

fn bench_scheduler_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_post_and_drain");
    group.sample_size(20);

    let layouts = [
        ("shared_growable", QueueKind::Growable, QueueTopology::Shared, BackoffPolicy::Block),
        ("per_worker_stealing", QueueKind::Stealing, QueueTopology::PerWorker, BackoffPolicy::spin()),
    ];

    for (label, kind, topology, backoff) in layouts {
        let jobs = 1_000u64;
        group.throughput(Throughput::Elements(jobs));
        group.bench_function(label, |b| {
            b.iter(|| {
                let counter = Arc::new(AtomicUsize::new(0));
                let pool = ThreadPoolScheduler::new(
                    SchedulerConfig::new()
                        .with_worker_count(4)
                        .with_queue(kind)
                        .with_topology(topology)
                        .with_backoff(backoff),
                )
                .unwrap();
                for _ in 0..jobs {
                    let counter = Arc::clone(&counter);
                    pool.post(Job::new(move || {
                        counter.fetch_add(1, Ordering::Relaxed);
                    }))
                    .unwrap();
                }
                pool.join();
                black_box(counter.load(Ordering::Relaxed))
            });
        });
    }

    group.finish();
}

fn bench_scheduler_skewed(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_skewed_load");
    group.sample_size(20);

    for (label, kind) in [("growable", QueueKind::Growable), ("stealing", QueueKind::Stealing)] {
        let jobs = 1_000u64;
        group.throughput(Throughput::Elements(jobs));
        group.bench_function(label, |b| {
            let mut rng = StdRng::seed_from_u64(7);
            b.iter(|| {
                let pool = ThreadPoolScheduler::new(
                    SchedulerConfig::new()
                        .with_worker_count(4)
                        .with_queue(kind)
                        .with_topology(QueueTopology::PerWorker)
                        .with_backoff(BackoffPolicy::spin()),
                )
                .unwrap();
                for _ in 0..jobs {
                    // Four out of five jobs land on worker 0.
                    let hint = if rng.random_bool(0.8) { 1 } else { rng.random_range(2..=4) };
                    let spin = rng.random_range(10..200u32);
                    pool.post_with_priority(
                        Job::new(move || {
                            black_box((0..spin).fold(0u32, u32::wrapping_add));
                        }),
                        hint,
                    )
                    .unwrap();
                }
                pool.join();
                black_box(pool.diagnostics().stolen)
            });
        });
    }

    group.finish();
}

fn bench_servant_round_trip(c: &mut Criterion) {
    let home = ThreadPoolScheduler::spawn(SchedulerConfig::single_threaded("bench-servant")).unwrap();
    let proxy = ServantProxy::new(&home, || 0u64).unwrap();

    c.bench_function("servant_post_future_round_trip", |b| {
        b.iter(|| {
            proxy
                .post_future(|n: &mut u64| {
                    *n += 1;
                    *n
                })
                .wait()
                .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_queue_push_pop,
    bench_growable_growth,
    bench_scheduler_drain,
    bench_scheduler_skewed,
    bench_servant_round_trip
);
criterion_main!(benches);
