//! Lock-free fixed-capacity ring for one producer and one consumer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use crossbeam_utils::Backoff;

use crate::core::queue::{JobQueue, QueueKind};
use crate::core::{Job, QueueError};

/// Lock-free single-producer/single-consumer ring.
///
/// Capacity is fixed at construction. `push` and `pop` spin, then yield, until
/// they succeed; nothing ever blocks on a lock or grows the ring. Stealing is
/// not supported, so composite schedulers skip this queue when scanning.
pub struct SpscRing {
    ring: ArrayQueue<Job>,
    max_len: AtomicUsize,
}

impl SpscRing {
    /// Create a ring holding at most `capacity` jobs. A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: ArrayQueue::new(capacity.max(1)),
            max_len: AtomicUsize::new(0),
        }
    }

    /// Fixed capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

impl JobQueue for SpscRing {
    fn push(&self, job: Job) -> Result<(), QueueError> {
        let backoff = Backoff::new();
        let mut job = job;
        loop {
            match self.ring.push(job) {
                Ok(()) => break,
                Err(rejected) => {
                    job = rejected;
                    backoff.snooze();
                }
            }
        }
        self.max_len.fetch_max(self.ring.len(), Ordering::Relaxed);
        Ok(())
    }

    fn push_terminate(&self) -> Result<(), QueueError> {
        self.ring.push(Job::terminate()).map_err(|_| QueueError::Full {
            capacity: self.ring.capacity(),
        })
    }

    fn try_pop(&self) -> Option<Job> {
        self.ring.pop()
    }

    fn pop(&self) -> Job {
        let backoff = Backoff::new();
        loop {
            if let Some(job) = self.ring.pop() {
                return job;
            }
            backoff.snooze();
        }
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        loop {
            if let Some(job) = self.ring.pop() {
                return Some(job);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if backoff.is_completed() {
                std::thread::sleep(deadline - now);
                return self.ring.pop();
            }
            backoff.snooze();
        }
    }

    fn try_steal(&self) -> Option<Job> {
        None
    }

    fn len(&self) -> usize {
        self.ring.len()
    }

    fn max_len(&self) -> Option<usize> {
        Some(self.max_len.load(Ordering::Relaxed))
    }

    fn supports_steal(&self) -> bool {
        false
    }

    fn kind(&self) -> QueueKind {
        QueueKind::Spsc
    }
}
