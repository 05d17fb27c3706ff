//! Error types for scheduler, queue, and servant operations.

use thiserror::Error;

/// Errors produced by scheduler components.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler no longer accepts jobs.
    #[error("scheduler `{0}` is shut down")]
    ShutDown(String),
    /// The target queue refused the job.
    #[error("queue rejected job: {0}")]
    Queue(#[from] QueueError),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Errors produced by a queue push.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue is at capacity and its overflow policy rejects new jobs.
    #[error("queue full (capacity {capacity})")]
    Full {
        /// Capacity at the time of the rejected push.
        capacity: usize,
    },
}

/// What a caller observes when an asynchronous call does not produce a value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The job body panicked; the message is the panic payload when it was a string.
    #[error("job panicked: {0}")]
    Panicked(String),
    /// The target scheduler is gone or refused the job.
    #[error("scheduler unavailable")]
    SchedulerUnavailable,
    /// The servant was destroyed before the call reached it.
    #[error("servant no longer exists")]
    ServantGone,
    /// The job was dropped without running (immediate shutdown, lost promise).
    #[error("job abandoned before completion")]
    Abandoned,
    /// A remote call failed in transport, encoding, or on the remote side.
    #[error("remote call failed: {0}")]
    Remote(#[from] RemoteError),
}

/// Errors at the remote execution boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The transport could not deliver the request or its response.
    #[error("transport error: {0}")]
    Transport(String),
    /// Payload encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),
    /// The remote side reported a failure.
    #[error("remote task `{task}` failed: {message}")]
    Task {
        /// Task name from the request.
        task: String,
        /// Error text from the response.
        message: String,
    },
    /// The response did not answer the request that was sent.
    #[error("response id mismatch")]
    Mismatch,
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

/// Errors produced when binding a servant to a scheduler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServantError {
    /// Servants need a scheduler with exactly one worker thread.
    #[error("servant scheduler must have exactly one worker thread, found {0}")]
    NotSingleThreaded(usize),
    /// The scheduler refused the construction job.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// The servant factory panicked or never ran.
    #[error("servant construction failed: {0}")]
    Construction(#[from] CallError),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
