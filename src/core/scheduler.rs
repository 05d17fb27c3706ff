//! Scheduler interface, lifecycle, and strong/weak handles.
//!
//! A [`SchedulerHandle`] keeps its scheduler alive; dropping the last one
//! requests shutdown and joins every worker before the scheduler is freed. A
//! [`WeakSchedulerHandle`] is lookup-only: [`WeakSchedulerHandle::lock`]
//! yields a strong handle, or `None` once the scheduler is gone. Servant
//! proxies refer to their scheduler exclusively through the weak form.

use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use serde::{Deserialize, Serialize};

use crate::core::diagnostics::DiagnosticsSnapshot;
use crate::core::future::{promise, JobFuture};
use crate::core::job::panic_message;
use crate::core::queue::JobQueue;
use crate::core::{CallError, Job, SchedulerError};

/// How queued-but-unstarted jobs are treated on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Workers stop after their current job; unstarted jobs are dropped.
    Immediate,
    /// Workers keep consuming until their queues are empty.
    #[default]
    Drain,
}

/// Scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Constructed, workers not yet started.
    Created,
    /// Accepting and executing jobs.
    Running,
    /// No longer accepting jobs; workers are winding down.
    ShutdownRequested,
    /// All workers have exited and been joined.
    Joined,
}

impl SchedulerState {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Running => 1,
            Self::ShutdownRequested => 2,
            Self::Joined => 3,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::ShutdownRequested,
            _ => Self::Joined,
        }
    }
}

/// Atomic lifecycle cell shared by a scheduler and its workers.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub(crate) fn get(&self) -> SchedulerState {
        SchedulerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: SchedulerState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }

    /// Move from `from` to `to`; returns false if the state was not `from`.
    pub(crate) fn transition(&self, from: SchedulerState, to: SchedulerState) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Posting interface every scheduler implements.
pub trait Scheduler: Send + Sync {
    /// Scheduler name, used in thread names and logs.
    fn name(&self) -> &str;

    /// Enqueue a job.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::ShutDown`] once shutdown was requested, or
    /// [`SchedulerError::Queue`] if the queue refused the job.
    fn post(&self, job: Job) -> Result<(), SchedulerError>;

    /// Enqueue a job with a placement hint. `0` means "no preference"; `n > 0`
    /// targets queue (or member) `(n - 1) % count`.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::post`].
    fn post_with_priority(&self, job: Job, priority: usize) -> Result<(), SchedulerError>;

    /// Current depth of every queue, in index order.
    fn queue_sizes(&self) -> Vec<usize>;

    /// Stop accepting jobs and wind the workers down.
    fn request_shutdown(&self, mode: ShutdownMode);

    /// Wait for all workers to exit. Implies a shutdown request if none was made.
    fn join(&self);

    /// Lifecycle state.
    fn state(&self) -> SchedulerState;

    /// Number of worker threads.
    fn worker_count(&self) -> usize;

    /// Thread ids of the worker threads.
    fn thread_ids(&self) -> Vec<ThreadId>;

    /// Read-only diagnostics.
    fn diagnostics(&self) -> DiagnosticsSnapshot;

    /// The scheduler's queues, for cross-scheduler stealing.
    fn queues(&self) -> Vec<Arc<dyn JobQueue>>;

    /// Queues this scheduler's idle workers may steal from, in scan order.
    /// Replaces any earlier set.
    fn attach_steal_sources(&self, sources: Vec<Arc<dyn JobQueue>>);
}

/// Strong, cloneable handle; keeps the scheduler alive.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<dyn Scheduler>,
}

/// Lookup-only handle; does not keep the scheduler alive.
#[derive(Clone)]
pub struct WeakSchedulerHandle {
    inner: Weak<dyn Scheduler>,
}

impl SchedulerHandle {
    /// Take ownership of a scheduler.
    pub fn new<S>(scheduler: S) -> Self
    where
        S: Scheduler + 'static,
    {
        Self {
            inner: Arc::new(scheduler),
        }
    }

    /// Create a weak handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakSchedulerHandle {
        WeakSchedulerHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether both handles refer to the same scheduler.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of strong handles alive.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether the calling thread is one of this scheduler's workers.
    #[must_use]
    pub fn is_current(&self) -> bool {
        let me = thread::current().id();
        self.inner.thread_ids().contains(&me)
    }

    /// Post a closure.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::post`].
    pub fn post_fn<F>(&self, f: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.post(Job::new(f))
    }

    /// Post a closure and receive its result through a future.
    ///
    /// A panic inside `f` resolves the future with [`CallError::Panicked`] and
    /// is still reported to the worker, which marks the job failed.
    pub fn post_future<R, F>(&self, f: F) -> JobFuture<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (promise, future) = promise();
        let job = Job::new(move || match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => promise.fulfill(Ok(value)),
            Err(payload) => {
                promise.fulfill(Err(CallError::Panicked(panic_message(payload.as_ref()))));
                panic::resume_unwind(payload);
            }
        });
        match self.inner.post(job) {
            Ok(()) => future,
            Err(_) => JobFuture::resolved(Err(CallError::SchedulerUnavailable)),
        }
    }
}

impl Deref for SchedulerHandle {
    type Target = dyn Scheduler;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("name", &self.inner.name())
            .field("state", &self.inner.state())
            .finish()
    }
}

impl WeakSchedulerHandle {
    /// Upgrade to a strong handle if the scheduler still exists.
    #[must_use]
    pub fn lock(&self) -> Option<SchedulerHandle> {
        self.inner.upgrade().map(|inner| SchedulerHandle { inner })
    }

    /// Whether the scheduler has been dropped.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.inner.strong_count() == 0
    }

    /// Post a job if the scheduler still exists.
    ///
    /// # Errors
    ///
    /// [`CallError::SchedulerUnavailable`] if the scheduler is gone or refused the job.
    pub fn post(&self, job: Job) -> Result<(), CallError> {
        let handle = self.lock().ok_or(CallError::SchedulerUnavailable)?;
        handle.post(job).map_err(|_| CallError::SchedulerUnavailable)
    }
}

impl fmt::Debug for WeakSchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSchedulerHandle")
            .field("expired", &self.is_expired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell_transitions() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), SchedulerState::Created);
        cell.set(SchedulerState::Running);
        assert!(cell.transition(SchedulerState::Running, SchedulerState::ShutdownRequested));
        assert!(!cell.transition(SchedulerState::Running, SchedulerState::ShutdownRequested));
        assert_eq!(cell.get(), SchedulerState::ShutdownRequested);
        assert!(SchedulerState::Joined > SchedulerState::Running);
    }

    #[test]
    fn test_shutdown_mode_default_is_drain() {
        assert_eq!(ShutdownMode::default(), ShutdownMode::Drain);
    }
}
