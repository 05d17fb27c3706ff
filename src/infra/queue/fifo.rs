//! Multi-producer FIFO list; the default for servant schedulers.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::queue::{JobQueue, QueueKind};
use crate::core::{Job, QueueError};

struct List {
    jobs: VecDeque<Job>,
    max_len: usize,
}

/// Unbounded first-in, first-out queue.
///
/// Calls made through one servant proxy from one thread execute in the order
/// they were made. Thieves take the oldest unpinned job.
pub struct FifoQueue {
    list: Mutex<List>,
    not_empty: Condvar,
}

impl FifoQueue {
    /// Create an empty queue with room preallocated for `capacity` jobs.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            list: Mutex::new(List {
                jobs: VecDeque::with_capacity(capacity),
                max_len: 0,
            }),
            not_empty: Condvar::new(),
        }
    }
}

impl Default for FifoQueue {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl JobQueue for FifoQueue {
    fn push(&self, job: Job) -> Result<(), QueueError> {
        let mut list = self.list.lock();
        list.jobs.push_back(job);
        list.max_len = list.max_len.max(list.jobs.len());
        drop(list);
        self.not_empty.notify_one();
        Ok(())
    }

    fn try_pop(&self) -> Option<Job> {
        self.list.lock().jobs.pop_front()
    }

    fn pop(&self) -> Job {
        let mut list = self.list.lock();
        loop {
            if let Some(job) = list.jobs.pop_front() {
                return job;
            }
            self.not_empty.wait(&mut list);
        }
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        let mut list = self.list.lock();
        loop {
            if let Some(job) = list.jobs.pop_front() {
                return Some(job);
            }
            if self.not_empty.wait_until(&mut list, deadline).timed_out() {
                return list.jobs.pop_front();
            }
        }
    }

    fn try_steal(&self) -> Option<Job> {
        let mut list = self.list.lock();
        let idx = list.jobs.iter().position(|job| !job.is_pinned())?;
        list.jobs.remove(idx)
    }

    fn len(&self) -> usize {
        self.list.lock().jobs.len()
    }

    fn max_len(&self) -> Option<usize> {
        Some(self.list.lock().max_len)
    }

    fn supports_steal(&self) -> bool {
        true
    }

    fn kind(&self) -> QueueKind {
        QueueKind::Fifo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_push_order() {
        let q = FifoQueue::default();
        for name in ["first", "second", "third"] {
            q.push(Job::named(name, || {})).unwrap();
        }
        assert_eq!(q.try_pop().unwrap().name(), Some("first"));
        assert_eq!(q.pop().name(), Some("second"));
        assert_eq!(q.pop_timeout(Duration::from_millis(1)).unwrap().name(), Some("third"));
        assert!(q.pop_timeout(Duration::from_millis(5)).is_none());
        assert_eq!(q.max_len(), Some(3));
    }

    #[test]
    fn test_steal_takes_oldest_unpinned() {
        let q = FifoQueue::default();
        q.push(Job::named("servant", || {}).pinned()).unwrap();
        q.push(Job::named("plain", || {})).unwrap();
        assert_eq!(q.try_steal().unwrap().name(), Some("plain"));
        assert!(q.try_steal().is_none());
        assert_eq!(q.try_pop().unwrap().name(), Some("servant"));
    }
}
