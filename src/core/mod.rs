//! Core scheduling abstractions: jobs, queues, schedulers, and call results.

pub mod composite;
pub mod diagnostics;
pub mod error;
pub mod future;
pub mod job;
pub mod queue;
pub mod scheduler;
pub mod thread_pool;

pub use composite::{CompositeScheduler, PostPolicy};
pub use diagnostics::{DiagnosticRecord, Diagnostics, DiagnosticsSnapshot};
pub use error::{AppResult, CallError, QueueError, RemoteError, SchedulerError, ServantError};
pub use future::{promise, CallResult, JobFuture, Promise};
pub use job::{Job, JobFailure, JobFn, JobOutcome};
pub use queue::{new_queue, JobQueue, OverflowPolicy, QueueKind};
pub use scheduler::{
    Scheduler, SchedulerHandle, SchedulerState, ShutdownMode, WeakSchedulerHandle,
};
pub use thread_pool::ThreadPoolScheduler;
