//! Worker thread loop.

use std::ops::ControlFlow;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::PoolCore;
use crate::config::{BackoffPolicy, QueueTopology};
use crate::core::job::JobOutcome;
use crate::core::Job;

/// How often a blocked worker wakes to re-scan steal sources.
const STEAL_RESCAN: Duration = Duration::from_millis(2);

pub(super) fn run(core: &PoolCore, worker_id: usize) {
    debug!(scheduler = %core.name, worker_id, "worker thread started");
    let mut idle = Idle::new(core.backoff);

    loop {
        if core.immediate_requested() {
            debug!(scheduler = %core.name, worker_id, "immediate shutdown, exiting");
            break;
        }

        let next = match find_job(core, worker_id) {
            Some(job) => Some(job),
            None if core.shutdown_requested() => {
                debug!(scheduler = %core.name, worker_id, "queues drained, exiting");
                break;
            }
            None => idle.wait(core, worker_id),
        };

        let Some(job) = next else {
            continue;
        };
        idle.reset();
        if dispatch(core, worker_id, job).is_break() {
            break;
        }
    }

    debug!(scheduler = %core.name, worker_id, "worker thread exiting");
}

fn dispatch(core: &PoolCore, worker_id: usize, job: Job) -> ControlFlow<()> {
    if job.is_terminate() {
        if !core.immediate_requested() {
            drain(core, worker_id);
        }
        return ControlFlow::Break(());
    }
    if core.immediate_requested() {
        // Picked up after the flag flipped; never started.
        core.diagnostics.record(false, true, job.interrupt());
        return ControlFlow::Break(());
    }
    execute(core, worker_id, job);
    ControlFlow::Continue(())
}

/// Run everything still reachable, then hand back sentinels meant for others.
fn drain(core: &PoolCore, worker_id: usize) {
    let mut sentinels = 0usize;
    let mut ran = 0usize;
    while let Some(job) = find_job(core, worker_id) {
        if core.immediate_requested() {
            if !job.is_terminate() {
                core.diagnostics.record(false, true, job.interrupt());
            }
            break;
        }
        if job.is_terminate() {
            sentinels += 1;
            continue;
        }
        execute(core, worker_id, job);
        ran += 1;
    }

    let own = core.own_queue(worker_id);
    for _ in 0..sentinels {
        if own.push_terminate().is_err() {
            break;
        }
    }
    debug!(scheduler = %core.name, worker_id, ran, returned_sentinels = sentinels, "drain finished");
}

fn execute(core: &PoolCore, worker_id: usize, job: Job) {
    let (outcome, record) = job.execute();
    match outcome {
        JobOutcome::Completed => core.diagnostics.record(false, false, record),
        JobOutcome::Failed(failure) => {
            warn!(
                scheduler = %core.name,
                worker_id,
                job = record.as_ref().and_then(|r| r.name.as_deref()).unwrap_or("-"),
                error = %failure.message,
                "job panicked"
            );
            core.diagnostics.record(true, false, record);
        }
        JobOutcome::Terminate => {}
    }
}

/// Own queue first, then siblings in index order, then external sources.
fn find_job(core: &PoolCore, worker_id: usize) -> Option<Job> {
    if let Some(job) = core.own_queue(worker_id).try_pop() {
        return Some(job);
    }

    if core.topology == QueueTopology::PerWorker {
        let n = core.queues.len();
        for offset in 1..n {
            let victim = (worker_id + offset) % n;
            if let Some(job) = core.queues[victim].try_steal() {
                core.diagnostics.record_stolen();
                trace!(scheduler = %core.name, worker_id, victim, "stole job from sibling");
                return Some(job);
            }
        }
    }

    let external = core.external.read();
    for (idx, source) in external.iter().enumerate() {
        if let Some(job) = source.try_steal() {
            core.diagnostics.record_stolen();
            trace!(scheduler = %core.name, worker_id, source = idx, "stole job from composite sibling");
            return Some(job);
        }
    }
    None
}

fn has_steal_targets(core: &PoolCore) -> bool {
    (core.topology == QueueTopology::PerWorker && core.queues.len() > 1)
        || !core.external.read().is_empty()
}

/// Idle strategy state for one worker.
struct Idle {
    policy: BackoffPolicy,
    checks: u32,
    sleep_us: u64,
}

impl Idle {
    const fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            checks: 0,
            sleep_us: 1,
        }
    }

    const fn reset(&mut self) {
        self.checks = 0;
        self.sleep_us = 1;
    }

    /// Wait for work on the own queue according to the policy.
    fn wait(&mut self, core: &PoolCore, worker_id: usize) -> Option<Job> {
        let own = core.own_queue(worker_id);
        match self.policy {
            BackoffPolicy::Block => {
                if has_steal_targets(core) {
                    own.pop_timeout(STEAL_RESCAN)
                } else {
                    Some(own.pop())
                }
            }
            BackoffPolicy::Spin {
                checks,
                max_sleep_us,
            } => {
                if self.checks < checks {
                    self.checks += 1;
                    thread::yield_now();
                    return None;
                }
                let nap = Duration::from_micros(self.sleep_us);
                self.sleep_us = self.sleep_us.saturating_mul(2).min(max_sleep_us);
                own.pop_timeout(nap)
            }
        }
    }
}
