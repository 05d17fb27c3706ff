//! The universal unit of work every queue and scheduler operates on.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

use crate::core::diagnostics::DiagnosticRecord;
use crate::util::clock::now_us;

/// Boxed job body.
pub type JobFn = Box<dyn FnOnce() + Send + 'static>;

enum JobKind {
    Work(JobFn),
    Terminate,
}

/// One schedulable unit of work, or the terminate sentinel.
///
/// A job is executed exactly once, start to finish, by exactly one worker thread.
pub struct Job {
    kind: JobKind,
    name: Option<String>,
    pinned: bool,
    record: Option<DiagnosticRecord>,
}

/// Failure captured from a panicking job body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Panic payload rendered as text.
    pub message: String,
}

/// Result of running a job on a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The body returned normally.
    Completed,
    /// The body panicked; the worker keeps running.
    Failed(JobFailure),
    /// The job was the terminate sentinel.
    Terminate,
}

impl Job {
    /// Wrap a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            kind: JobKind::Work(Box::new(f)),
            name: None,
            pinned: false,
            record: None,
        }
    }

    /// Wrap a closure with a diagnostic name.
    pub fn named<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            name: Some(name.into()),
            ..Self::new(f)
        }
    }

    /// The sentinel that makes the worker dequeuing it leave its loop.
    #[must_use]
    pub const fn terminate() -> Self {
        Self {
            kind: JobKind::Terminate,
            name: None,
            pinned: true,
            record: None,
        }
    }

    /// Mark the job as bound to the scheduler it is posted to. Thieves from
    /// other pools leave pinned jobs in place.
    #[must_use]
    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    /// Whether this is the terminate sentinel.
    #[must_use]
    pub const fn is_terminate(&self) -> bool {
        matches!(self.kind, JobKind::Terminate)
    }

    /// Whether the job may only run on the scheduler it was posted to.
    #[must_use]
    pub const fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Diagnostic name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Diagnostic record attached at post time, if diagnostics are enabled.
    #[must_use]
    pub const fn record(&self) -> Option<&DiagnosticRecord> {
        self.record.as_ref()
    }

    /// Attach a posted-at record unless one is already present.
    pub(crate) fn stamp_posted(&mut self) {
        if self.record.is_none() {
            self.record = Some(DiagnosticRecord::posted(self.name.clone()));
        }
    }

    /// Run the body, catching any panic. Returns the outcome and the completed record.
    pub(crate) fn execute(self) -> (JobOutcome, Option<DiagnosticRecord>) {
        let Self { kind, mut record, .. } = self;
        let body = match kind {
            JobKind::Work(body) => body,
            JobKind::Terminate => return (JobOutcome::Terminate, record),
        };
        if let Some(rec) = record.as_mut() {
            rec.started_at_us = now_us();
        }
        let outcome = match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(()) => JobOutcome::Completed,
            Err(payload) => JobOutcome::Failed(JobFailure {
                message: panic_message(payload.as_ref()),
            }),
        };
        if let Some(rec) = record.as_mut() {
            rec.finished_at_us = now_us();
            rec.failed = matches!(outcome, JobOutcome::Failed(_));
        }
        (outcome, record)
    }

    /// Drop the job unstarted, returning its record flagged as interrupted.
    pub(crate) fn interrupt(self) -> Option<DiagnosticRecord> {
        self.record.map(|mut rec| {
            rec.interrupted = true;
            rec
        })
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("terminate", &self.is_terminate())
            .field("pinned", &self.pinned)
            .finish_non_exhaustive()
    }
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
