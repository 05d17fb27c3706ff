//! Per-job diagnostic records and their per-scheduler aggregation.
//!
//! Records are written after the fact by the worker that ran (or dropped) a job
//! and are only ever read back through [`Diagnostics::snapshot`]. Nothing in the
//! scheduling or stealing path consults them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::util::clock::now_us;

/// Timestamped status record for one job's lifecycle.
///
/// Timestamps are microseconds since the Unix epoch; `0` means "not reached".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    /// Optional job name given at post time.
    pub name: Option<String>,
    /// When the job entered a queue.
    pub posted_at_us: u128,
    /// When a worker started the job.
    pub started_at_us: u128,
    /// When the job body returned or unwound.
    pub finished_at_us: u128,
    /// The job was dropped before it started.
    pub interrupted: bool,
    /// The job body panicked.
    pub failed: bool,
}

impl DiagnosticRecord {
    /// Start a record stamped with the current time as `posted_at`.
    #[must_use]
    pub fn posted(name: Option<String>) -> Self {
        Self {
            name,
            posted_at_us: now_us(),
            ..Self::default()
        }
    }

    /// Time spent waiting in a queue, if the job started.
    #[must_use]
    pub fn queue_wait_us(&self) -> Option<u128> {
        (self.started_at_us != 0).then(|| self.started_at_us.saturating_sub(self.posted_at_us))
    }

    /// Time spent executing, if the job finished.
    #[must_use]
    pub fn run_time_us(&self) -> Option<u128> {
        (self.finished_at_us != 0).then(|| self.finished_at_us.saturating_sub(self.started_at_us))
    }
}

/// Read-only copy of a scheduler's diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    /// Jobs accepted by `post`.
    pub posted: u64,
    /// Jobs that ran to completion without panicking.
    pub completed: u64,
    /// Jobs whose body panicked.
    pub failed: u64,
    /// Jobs dropped before they started.
    pub interrupted: u64,
    /// Jobs this scheduler's workers took from another queue.
    pub stolen: u64,
    /// Most recent records, oldest first.
    pub recent: Vec<DiagnosticRecord>,
}

/// Per-scheduler diagnostic aggregation with a bounded record history.
#[derive(Debug)]
pub struct Diagnostics {
    posted: CachePadded<AtomicU64>,
    completed: CachePadded<AtomicU64>,
    failed: CachePadded<AtomicU64>,
    interrupted: AtomicU64,
    stolen: AtomicU64,
    history: Mutex<VecDeque<DiagnosticRecord>>,
    max_records: usize,
}

impl Diagnostics {
    /// Create an aggregator keeping at most `max_records` records.
    /// `0` keeps counters only.
    #[must_use]
    pub fn new(max_records: usize) -> Self {
        Self {
            posted: CachePadded::new(AtomicU64::new(0)),
            completed: CachePadded::new(AtomicU64::new(0)),
            failed: CachePadded::new(AtomicU64::new(0)),
            interrupted: AtomicU64::new(0),
            stolen: AtomicU64::new(0),
            history: Mutex::new(VecDeque::with_capacity(max_records.min(1024))),
            max_records,
        }
    }

    /// Whether per-job records are kept.
    #[must_use]
    pub const fn records_enabled(&self) -> bool {
        self.max_records > 0
    }

    pub(crate) fn record_posted(&self) {
        self.posted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stolen(&self) {
        self.stolen.fetch_add(1, Ordering::Relaxed);
    }

    /// Account for a finished or dropped job.
    pub(crate) fn record(&self, failed: bool, interrupted: bool, record: Option<DiagnosticRecord>) {
        if interrupted {
            self.interrupted.fetch_add(1, Ordering::Relaxed);
        } else if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
        let Some(record) = record else { return };
        if self.max_records == 0 {
            return;
        }
        let mut history = self.history.lock();
        if history.len() >= self.max_records {
            history.pop_front();
        }
        history.push_back(record);
    }

    /// Take a read-only snapshot.
    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            posted: self.posted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
            stolen: self.stolen.load(Ordering::Relaxed),
            recent: self.history.lock().iter().cloned().collect(),
        }
    }

    /// Drop the stored records. Counters are kept.
    pub fn clear(&self) {
        self.history.lock().clear();
    }
}

impl DiagnosticsSnapshot {
    /// Merge another snapshot into this one (used by composite schedulers).
    pub fn merge(&mut self, other: Self) {
        self.posted += other.posted;
        self.completed += other.completed;
        self.failed += other.failed;
        self.interrupted += other.interrupted;
        self.stolen += other.stolen;
        self.recent.extend(other.recent);
    }
}
