//! Tokio blocking pool behind the [`Scheduler`] interface.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::core::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::core::job::JobOutcome;
use crate::core::queue::JobQueue;
use crate::core::scheduler::{
    Scheduler, SchedulerHandle, SchedulerState, ShutdownMode, StateCell,
};
use crate::core::{Job, SchedulerError};

struct Shared {
    name: String,
    in_flight: Mutex<usize>,
    idle: Condvar,
    immediate: AtomicBool,
    diagnostics: Diagnostics,
}

impl Shared {
    fn finish(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.idle.notify_all();
        }
    }
}

/// Scheduler that runs jobs with `spawn_blocking` on a tokio runtime.
///
/// Useful as the worker side of a servant `post_callback` when the
/// application already owns a tokio runtime. It has no queues of its own, so
/// it neither steals nor can be stolen from. Its threads are not known up
/// front, so it can never be a servant's home scheduler.
pub struct TokioScheduler {
    shared: Arc<Shared>,
    handle: tokio::runtime::Handle,
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
    state: StateCell,
    threads: usize,
    posted_seq: AtomicUsize,
}

impl TokioScheduler {
    /// Run jobs on an existing runtime.
    pub fn new(name: impl Into<String>, handle: tokio::runtime::Handle) -> Self {
        Self::build(name.into(), handle, None, 0)
    }

    /// Own a new multi-threaded runtime with `worker_threads` async workers.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Spawn`] if the runtime could not be built.
    pub fn with_worker_threads(
        name: impl Into<String>,
        worker_threads: usize,
    ) -> Result<Self, SchedulerError> {
        let name = name.into();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name(format!("{name}-tokio"))
            .enable_all()
            .build()
            .map_err(|e| SchedulerError::Spawn(e.to_string()))?;
        let handle = runtime.handle().clone();
        Ok(Self::build(name, handle, Some(runtime), worker_threads.max(1)))
    }

    /// Wrap in a strong handle.
    #[must_use]
    pub fn into_handle(self) -> SchedulerHandle {
        SchedulerHandle::new(self)
    }

    fn build(
        name: String,
        handle: tokio::runtime::Handle,
        runtime: Option<tokio::runtime::Runtime>,
        threads: usize,
    ) -> Self {
        let state = StateCell::new();
        state.set(SchedulerState::Running);
        info!(scheduler = %name, owned_runtime = runtime.is_some(), "tokio scheduler started");
        Self {
            shared: Arc::new(Shared {
                name,
                in_flight: Mutex::new(0),
                idle: Condvar::new(),
                immediate: AtomicBool::new(false),
                diagnostics: Diagnostics::new(0),
            }),
            handle,
            runtime: Mutex::new(runtime),
            state,
            threads,
            posted_seq: AtomicUsize::new(0),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn post(&self, job: Job) -> Result<(), SchedulerError> {
        if self.state.get() != SchedulerState::Running {
            return Err(SchedulerError::ShutDown(self.shared.name.clone()));
        }
        *self.shared.in_flight.lock() += 1;
        self.shared.diagnostics.record_posted();
        let seq = self.posted_seq.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(&self.shared);
        drop(self.handle.spawn_blocking(move || {
            if shared.immediate.load(Ordering::Acquire) {
                shared.diagnostics.record(false, true, job.interrupt());
            } else {
                match job.execute() {
                    (JobOutcome::Failed(failure), record) => {
                        warn!(scheduler = %shared.name, seq, error = %failure.message, "job panicked");
                        shared.diagnostics.record(true, false, record);
                    }
                    (_, record) => shared.diagnostics.record(false, false, record),
                }
            }
            shared.finish();
        }));
        Ok(())
    }

    fn post_with_priority(&self, job: Job, _priority: usize) -> Result<(), SchedulerError> {
        self.post(job)
    }

    fn queue_sizes(&self) -> Vec<usize> {
        vec![*self.shared.in_flight.lock()]
    }

    fn request_shutdown(&self, mode: ShutdownMode) {
        if mode == ShutdownMode::Immediate {
            self.shared.immediate.store(true, Ordering::Release);
        }
        if self
            .state
            .transition(SchedulerState::Running, SchedulerState::ShutdownRequested)
        {
            info!(scheduler = %self.shared.name, ?mode, "shutdown requested");
        }
    }

    fn join(&self) {
        if self.state.get() == SchedulerState::Joined {
            return;
        }
        self.request_shutdown(ShutdownMode::Drain);
        let mut in_flight = self.shared.in_flight.lock();
        while *in_flight > 0 {
            self.shared.idle.wait(&mut in_flight);
        }
        drop(in_flight);
        self.state.set(SchedulerState::Joined);
        debug!(scheduler = %self.shared.name, "tokio scheduler joined");
    }

    fn state(&self) -> SchedulerState {
        self.state.get()
    }

    fn worker_count(&self) -> usize {
        self.threads
    }

    fn thread_ids(&self) -> Vec<ThreadId> {
        // Blocking-pool threads are created on demand and not tracked.
        Vec::new()
    }

    fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.shared.diagnostics.snapshot()
    }

    fn queues(&self) -> Vec<Arc<dyn JobQueue>> {
        Vec::new()
    }

    fn attach_steal_sources(&self, _sources: Vec<Arc<dyn JobQueue>>) {}
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.join();
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CallError;

    #[test]
    fn test_owned_runtime_runs_jobs() {
        let sched = TokioScheduler::with_worker_threads("tk", 2).unwrap().into_handle();
        assert_eq!(sched.post_future(|| 2 + 2).wait(), Ok(4));
        let failed = sched.post_future(|| -> u8 { panic!("tokio job failed") });
        assert_eq!(failed.wait(), Err(CallError::Panicked("tokio job failed".into())));
        sched.join();
        let diag = sched.diagnostics();
        assert_eq!(diag.completed, 1);
        assert_eq!(diag.failed, 1);
        assert!(sched.post(Job::new(|| {})).is_err());
    }

    #[test]
    fn test_reports_no_dedicated_threads() {
        let sched = TokioScheduler::with_worker_threads("tk-one", 1).unwrap();
        assert_eq!(sched.worker_count(), 1);
        assert!(sched.thread_ids().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_borrowed_runtime_handle() {
        let sched = TokioScheduler::new("borrowed", tokio::runtime::Handle::current()).into_handle();
        let answer = sched.post_future(|| "from blocking pool").await;
        assert_eq!(answer, Ok("from blocking pool"));
    }
}
