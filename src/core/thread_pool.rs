//! Thread-pool scheduler with dedicated OS worker threads.
//!
//! Each worker runs the loop in [`worker`]: pop from its own queue, steal from
//! sibling queues and then from any attached composite siblings, and back off
//! when everything is empty. Job panics are caught per job and never reach
//! the loop.
//!
//! # Design
//!
//! - **Workers hold no handle**: threads share a `PoolCore` (queues, state,
//!   diagnostics), never the scheduler object, so dropping the last handle
//!   actually drops the scheduler.
//! - **Cooperative shutdown**: the state flag is checked every iteration, and
//!   terminate sentinels wake workers blocked in `pop`.
//! - **Joined on drop**: the last handle's drop requests shutdown and joins
//!   every worker.
//!
//! # Example
//!
//! ```rust,ignore
//! use servant_pool::config::SchedulerConfig;
//! use servant_pool::core::ThreadPoolScheduler;
//!
//! let pool = ThreadPoolScheduler::spawn(SchedulerConfig::new().with_worker_count(4))?;
//! let answer = pool.post_future(|| 6 * 7).wait()?;
//! ```

mod worker;

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{BackoffPolicy, QueueTopology, SchedulerConfig};
use crate::core::diagnostics::{Diagnostics, DiagnosticsSnapshot};
use crate::core::queue::{new_queue, JobQueue};
use crate::core::scheduler::{
    Scheduler, SchedulerHandle, SchedulerState, ShutdownMode, StateCell,
};
use crate::core::{Job, SchedulerError};

/// State shared between a scheduler and its worker threads.
pub(crate) struct PoolCore {
    pub(crate) name: String,
    pub(crate) queues: Vec<Arc<dyn JobQueue>>,
    pub(crate) topology: QueueTopology,
    pub(crate) backoff: BackoffPolicy,
    /// Queues of other schedulers, in scan order.
    pub(crate) external: RwLock<Vec<Arc<dyn JobQueue>>>,
    pub(crate) state: StateCell,
    mode: AtomicU8,
    pub(crate) diagnostics: Diagnostics,
}

const MODE_NONE: u8 = 0;
const MODE_DRAIN: u8 = 1;
const MODE_IMMEDIATE: u8 = 2;

impl PoolCore {
    /// Queue owned by `worker_id`.
    pub(crate) fn own_queue(&self, worker_id: usize) -> &Arc<dyn JobQueue> {
        match self.topology {
            QueueTopology::Shared => &self.queues[0],
            QueueTopology::PerWorker => &self.queues[worker_id % self.queues.len()],
        }
    }

    pub(crate) fn immediate_requested(&self) -> bool {
        self.mode.load(Ordering::Acquire) == MODE_IMMEDIATE
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        self.mode.load(Ordering::Acquire) != MODE_NONE
    }
}

/// Scheduler owning a fixed set of worker threads and one or more queues.
pub struct ThreadPoolScheduler {
    core: Arc<PoolCore>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    thread_ids: Vec<ThreadId>,
    next_queue: AtomicUsize,
    default_mode: ShutdownMode,
}

impl ThreadPoolScheduler {
    /// Create the scheduler and start its workers.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::InvalidConfig`] if validation fails, or
    /// [`SchedulerError::Spawn`] if a worker thread could not be started
    /// (workers already started are shut down and joined).
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let queue_count = match config.topology {
            QueueTopology::Shared => 1,
            QueueTopology::PerWorker => config.worker_count,
        };
        let queues = (0..queue_count)
            .map(|_| new_queue(config.queue, config.queue_capacity, config.overflow))
            .collect();

        let core = Arc::new(PoolCore {
            name: config.name.clone(),
            queues,
            topology: config.topology,
            backoff: config.backoff,
            external: RwLock::new(Vec::new()),
            state: StateCell::new(),
            mode: AtomicU8::new(MODE_NONE),
            diagnostics: Diagnostics::new(config.diagnostics_history),
        });

        let mut scheduler = Self {
            core: Arc::clone(&core),
            workers: Mutex::new(Vec::with_capacity(config.worker_count)),
            thread_ids: Vec::with_capacity(config.worker_count),
            next_queue: AtomicUsize::new(0),
            default_mode: config.shutdown_mode,
        };

        core.state.set(SchedulerState::Running);
        for worker_id in 0..config.worker_count {
            let core = Arc::clone(&core);
            let spawned = thread::Builder::new()
                .name(format!("{}-{worker_id}", config.name))
                .stack_size(config.thread_stack_size)
                .spawn(move || worker::run(&core, worker_id));
            match spawned {
                Ok(handle) => {
                    scheduler.thread_ids.push(handle.thread().id());
                    scheduler.workers.get_mut().push(handle);
                }
                Err(e) => {
                    // Drop runs shutdown + join for the workers already started.
                    return Err(SchedulerError::Spawn(e.to_string()));
                }
            }
        }

        info!(
            scheduler = %config.name,
            worker_count = config.worker_count,
            queue = ?config.queue,
            topology = ?config.topology,
            "scheduler started"
        );

        Ok(scheduler)
    }

    /// Create the scheduler and wrap it in a strong handle.
    ///
    /// # Errors
    ///
    /// Same as [`ThreadPoolScheduler::new`].
    pub fn spawn(config: SchedulerConfig) -> Result<SchedulerHandle, SchedulerError> {
        Self::new(config).map(SchedulerHandle::new)
    }

    fn pick_queue(&self, priority: usize) -> &Arc<dyn JobQueue> {
        let queues = &self.core.queues;
        let idx = if priority > 0 {
            (priority - 1) % queues.len()
        } else if queues.len() == 1 {
            0
        } else {
            self.next_queue.fetch_add(1, Ordering::Relaxed) % queues.len()
        };
        &queues[idx]
    }

    fn push(&self, mut job: Job, priority: usize) -> Result<(), SchedulerError> {
        if self.core.state.get() != SchedulerState::Running {
            return Err(SchedulerError::ShutDown(self.core.name.clone()));
        }
        if self.core.diagnostics.records_enabled() {
            job.stamp_posted();
        }
        self.pick_queue(priority).push(job)?;
        self.core.diagnostics.record_posted();
        Ok(())
    }

    /// Wake workers that may be blocked in `pop`.
    fn push_sentinels(&self) {
        if self.core.backoff != BackoffPolicy::Block {
            return;
        }
        let count = self.thread_ids.len();
        let result = match self.core.topology {
            QueueTopology::Shared => {
                (0..count).try_for_each(|_| self.core.queues[0].push_terminate())
            }
            QueueTopology::PerWorker => self
                .core
                .queues
                .iter()
                .try_for_each(|q| q.push_terminate()),
        };
        if let Err(e) = result {
            // A full queue has no blocked consumers; the state flag stops them.
            debug!(scheduler = %self.core.name, error = %e, "terminate sentinel not queued");
        }
    }

    /// Drop whatever is left in the queues after the workers exited.
    fn discard_leftovers(&self) {
        let mut dropped = 0usize;
        for queue in &self.core.queues {
            while let Some(job) = queue.try_pop() {
                if job.is_terminate() {
                    continue;
                }
                dropped += 1;
                self.core.diagnostics.record(false, true, job.interrupt());
            }
        }
        if dropped > 0 {
            info!(scheduler = %self.core.name, dropped, "discarded unstarted jobs");
        }
    }
}

impl Scheduler for ThreadPoolScheduler {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn post(&self, job: Job) -> Result<(), SchedulerError> {
        self.push(job, 0)
    }

    fn post_with_priority(&self, job: Job, priority: usize) -> Result<(), SchedulerError> {
        self.push(job, priority)
    }

    fn queue_sizes(&self) -> Vec<usize> {
        self.core.queues.iter().map(|q| q.len()).collect()
    }

    fn request_shutdown(&self, mode: ShutdownMode) {
        let flag = match mode {
            ShutdownMode::Drain => MODE_DRAIN,
            ShutdownMode::Immediate => MODE_IMMEDIATE,
        };
        // Immediate may escalate an earlier drain request, never the reverse.
        let previous = self.core.mode.fetch_max(flag, Ordering::AcqRel);
        if previous >= flag {
            return;
        }
        self.core
            .state
            .transition(SchedulerState::Running, SchedulerState::ShutdownRequested);
        info!(scheduler = %self.core.name, ?mode, "shutdown requested");
        self.push_sentinels();
    }

    fn join(&self) {
        if !self.core.shutdown_requested() {
            self.request_shutdown(self.default_mode);
        }
        let me = thread::current().id();
        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            if worker.thread().id() == me {
                warn!(
                    scheduler = %self.core.name,
                    worker_id = idx,
                    "scheduler released from its own worker; detaching that thread"
                );
                continue;
            }
            match worker.join() {
                Ok(()) => debug!(scheduler = %self.core.name, worker_id = idx, "worker joined"),
                Err(_) => warn!(scheduler = %self.core.name, worker_id = idx, "worker panicked"),
            }
        }
        drop(workers);
        if worker_count > 0 {
            self.discard_leftovers();
            self.core.state.set(SchedulerState::Joined);
            info!(scheduler = %self.core.name, worker_count, "scheduler joined");
        }
    }

    fn state(&self) -> SchedulerState {
        self.core.state.get()
    }

    fn worker_count(&self) -> usize {
        self.thread_ids.len()
    }

    fn thread_ids(&self) -> Vec<ThreadId> {
        self.thread_ids.clone()
    }

    fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.core.diagnostics.snapshot()
    }

    fn queues(&self) -> Vec<Arc<dyn JobQueue>> {
        self.core.queues.clone()
    }

    fn attach_steal_sources(&self, sources: Vec<Arc<dyn JobQueue>>) {
        let sources: Vec<_> = sources.into_iter().filter(|q| q.supports_steal()).collect();
        debug!(scheduler = %self.core.name, sources = sources.len(), "steal sources attached");
        *self.core.external.write() = sources;
    }
}

impl Drop for ThreadPoolScheduler {
    fn drop(&mut self) {
        self.request_shutdown(self.default_mode);
        self.join();
    }
}
