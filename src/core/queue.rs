//! Queue abstraction shared by every scheduler.
//!
//! Any structure implementing [`JobQueue`] can back a scheduler. The
//! implementations live in [`crate::infra::queue`]; [`new_queue`] builds one
//! from its [`QueueKind`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Job, QueueError};
use crate::infra::queue::{FifoQueue, GrowableQueue, SpscRing, StealingQueue};

/// Available queue implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// Condvar-blocking LIFO ring that grows when full.
    #[default]
    Growable,
    /// Lock-free single-producer/single-consumer ring of fixed capacity.
    Spsc,
    /// Multi-producer list: owner pops LIFO at the back, thieves steal at the front.
    Stealing,
    /// Multi-producer FIFO list; keeps servant calls in submission order.
    Fifo,
}

/// What a bounded queue does when a push finds it full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Grow the ring to `capacity + capacity / 2 + 1` and accept the job.
    #[default]
    Grow,
    /// Refuse the job with [`QueueError::Full`].
    Reject,
    /// Wait until a consumer frees a slot.
    Block,
}

/// Concurrent container of jobs with a fixed push/pop/steal ordering contract.
pub trait JobQueue: Send + Sync {
    /// Add a job.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] only for a bounded queue configured with
    /// [`OverflowPolicy::Reject`].
    fn push(&self, job: Job) -> Result<(), QueueError>;

    /// Queue a terminate sentinel without waiting for capacity.
    ///
    /// Bounded queues accept it past their limit where they can; shutdown
    /// must never block on a queue its workers have stopped draining.
    ///
    /// # Errors
    ///
    /// [`QueueError::Full`] if the queue cannot hold one more item at all.
    fn push_terminate(&self) -> Result<(), QueueError> {
        self.push(Job::terminate())
    }

    /// Take the next job for the owning worker, if any.
    fn try_pop(&self) -> Option<Job>;

    /// Take the next job, waiting until one is available.
    fn pop(&self) -> Job;

    /// Take the next job, waiting at most `timeout`.
    fn pop_timeout(&self, timeout: Duration) -> Option<Job> {
        if let Some(job) = self.try_pop() {
            return Some(job);
        }
        std::thread::sleep(timeout);
        self.try_pop()
    }

    /// Take a job on behalf of another worker. Pinned jobs are never stolen.
    fn try_steal(&self) -> Option<Job>;

    /// Current depth.
    fn len(&self) -> usize;

    /// Whether the queue is currently empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Historical maximum depth, when tracked.
    fn max_len(&self) -> Option<usize> {
        None
    }

    /// Whether [`JobQueue::try_steal`] can ever succeed.
    fn supports_steal(&self) -> bool;

    /// Which implementation this is.
    fn kind(&self) -> QueueKind;
}

/// Build a queue of the given kind.
///
/// `capacity` is the initial ring size for [`QueueKind::Growable`], the fixed
/// size for [`QueueKind::Spsc`], and a preallocation hint for
/// [`QueueKind::Stealing`] and [`QueueKind::Fifo`]. `overflow` only applies to
/// the growable queue.
#[must_use]
pub fn new_queue(kind: QueueKind, capacity: usize, overflow: OverflowPolicy) -> Arc<dyn JobQueue> {
    match kind {
        QueueKind::Growable => Arc::new(GrowableQueue::with_policy(capacity, overflow)),
        QueueKind::Spsc => Arc::new(SpscRing::new(capacity)),
        QueueKind::Stealing => Arc::new(StealingQueue::with_capacity(capacity)),
        QueueKind::Fifo => Arc::new(FifoQueue::with_capacity(capacity)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_kinds() {
        for kind in [
            QueueKind::Growable,
            QueueKind::Spsc,
            QueueKind::Stealing,
            QueueKind::Fifo,
        ] {
            let q = new_queue(kind, 4, OverflowPolicy::Grow);
            assert_eq!(q.kind(), kind);
            assert!(q.is_empty());
            assert_eq!(q.supports_steal(), kind != QueueKind::Spsc);
        }
    }

    #[test]
    fn test_kind_serde_names() {
        let kind: QueueKind = serde_json::from_str("\"stealing\"").unwrap();
        assert_eq!(kind, QueueKind::Stealing);
        let policy: OverflowPolicy = serde_json::from_str("\"reject\"").unwrap();
        assert_eq!(policy, OverflowPolicy::Reject);
    }
}
