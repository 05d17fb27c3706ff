//! Integration tests for CompositeScheduler
//!
//! Covers cross-member stealing and its limits:
//! - Stealing queues let an idle member drain a blocked member
//! - SPSC members never steal or get stolen from
//! - Servant jobs stay on their home member
//! - Least-loaded posting

use servant_pool::config::{BackoffPolicy, SchedulerConfig};
use servant_pool::core::{
    CompositeScheduler, Job, PostPolicy, QueueKind, Scheduler, SchedulerHandle,
    ThreadPoolScheduler,
};
use servant_pool::servant::ServantProxy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn member(name: &str, queue: QueueKind) -> SchedulerHandle {
    let backoff = if queue == QueueKind::Spsc {
        BackoffPolicy::Spin {
            checks: 16,
            max_sleep_us: 500,
        }
    } else {
        BackoffPolicy::Block
    };
    ThreadPoolScheduler::spawn(
        SchedulerConfig::single_threaded(name)
            .with_queue(queue)
            .with_backoff(backoff),
    )
    .expect("member should start")
}

/// Block `target` on a job posted directly to it and wait until it runs.
fn hold(target: &SchedulerHandle) -> crossbeam_channel::Sender<()> {
    let (started_tx, started_rx) = crossbeam_channel::bounded(1);
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
    target
        .post(
            Job::named("gate", move || {
                let _ = started_tx.send(());
                let _ = release_rx.recv();
            })
            .pinned(),
        )
        .unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    release_tx
}

fn counting_jobs(target: &SchedulerHandle, priority: usize, count: usize) -> Arc<AtomicUsize> {
    let ran = Arc::new(AtomicUsize::new(0));
    for _ in 0..count {
        let ran = Arc::clone(&ran);
        target
            .post_with_priority(
                Job::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }),
                priority,
            )
            .unwrap();
    }
    ran
}

fn wait_for(counter: &AtomicUsize, expected: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while counter.load(Ordering::SeqCst) < expected {
        if Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

// ============================================================================
// STEALING TESTS
// ============================================================================

#[test]
fn test_idle_member_steals_from_blocked_member() {
    let a = member("a", QueueKind::Stealing);
    let b = member("b", QueueKind::Stealing);
    let composite =
        CompositeScheduler::spawn("pair", vec![a.clone(), b.clone()], PostPolicy::RoundRobin)
            .unwrap();

    let gate = hold(&a);
    let ran = counting_jobs(&composite, 1, 99);

    assert!(wait_for(&ran, 99), "b should drain a's queue while a is blocked");
    assert!(b.diagnostics().stolen >= 1);
    assert_eq!(a.queue_sizes(), vec![0]);

    drop(gate);
    composite.join();
    assert_eq!(a.diagnostics().completed + b.diagnostics().completed, 100);
}

#[test]
fn test_spsc_members_never_steal() {
    let a = member("ring-a", QueueKind::Spsc);
    let b = member("ring-b", QueueKind::Spsc);
    let composite =
        CompositeScheduler::spawn("rings", vec![a.clone(), b.clone()], PostPolicy::RoundRobin)
            .unwrap();

    let gate = hold(&a);
    let ran = counting_jobs(&composite, 1, 10);

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(ran.load(Ordering::SeqCst), 0, "nothing runs while a is blocked");
    assert_eq!(composite.queue_sizes(), vec![10, 0]);

    drop(gate);
    assert!(wait_for(&ran, 10));
    assert_eq!(a.diagnostics().stolen, 0);
    assert_eq!(b.diagnostics().stolen, 0);
    composite.join();
}

#[test]
fn test_servant_jobs_stay_on_home_member() {
    let a = member("home", QueueKind::Stealing);
    let b = member("thief", QueueKind::Stealing);
    let composite =
        CompositeScheduler::spawn("mixed", vec![a.clone(), b.clone()], PostPolicy::RoundRobin)
            .unwrap();

    let servant = ServantProxy::new_blocking(&a, || 0u64).unwrap();
    let gate = hold(&a);

    let calls: Vec<_> = (1..=20u64)
        .map(|n| {
            servant.post_future(move |total: &mut u64| {
                *total += n;
                std::thread::current().name().map(str::to_owned)
            })
        })
        .collect();

    std::thread::sleep(Duration::from_millis(50));
    assert!(calls.iter().all(|c| !c.is_ready()), "servant calls wait for home");
    assert_eq!(b.diagnostics().stolen, 0);

    drop(gate);
    for call in calls {
        assert_eq!(call.wait(), Ok(Some("home-0".to_string())));
    }
    assert_eq!(servant.post_future(|total: &mut u64| *total).wait(), Ok(210));
    drop(servant);
    composite.join();
}

// ============================================================================
// POSTING POLICY TESTS
// ============================================================================

#[test]
fn test_least_loaded_prefers_idle_member() {
    let a = member("busy", QueueKind::Fifo);
    let b = member("idle", QueueKind::Fifo);
    let composite =
        CompositeScheduler::spawn("balance", vec![a.clone(), b.clone()], PostPolicy::LeastLoaded)
            .unwrap();

    let gate = hold(&a);
    a.post(Job::new(|| {}).pinned()).unwrap();
    assert_eq!(composite.queue_sizes(), vec![1, 0]);

    let where_ran = composite
        .post_future(|| std::thread::current().name().map(str::to_owned))
        .wait();
    assert_eq!(where_ran, Ok(Some("idle-0".to_string())));

    drop(gate);
    composite.join();
}

#[test]
fn test_round_robin_alternates_members() {
    let a = member("left", QueueKind::Spsc);
    let b = member("right", QueueKind::Spsc);
    let composite =
        CompositeScheduler::spawn("alternate", vec![a, b], PostPolicy::RoundRobin).unwrap();

    let names: Vec<_> = (0..4)
        .map(|_| {
            composite
                .post_future(|| std::thread::current().name().map(str::to_owned))
                .wait()
                .unwrap()
        })
        .collect();
    assert_eq!(
        names,
        ["left-0", "right-0", "left-0", "right-0"]
            .iter()
            .map(|n| Some((*n).to_string()))
            .collect::<Vec<_>>()
    );
    assert_eq!(composite.worker_count(), 2);
}
