//! Multi-producer list with owner-LIFO / thief-FIFO discipline.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::queue::{JobQueue, QueueKind};
use crate::core::{Job, QueueError};

struct List {
    jobs: VecDeque<Job>,
    max_len: usize,
}

/// Work-stealing list.
///
/// Producers push at the back and the owning worker pops from the back, so the
/// owner sees its most recent (cache-hot) job first. Thieves steal from the
/// front, the oldest job, which keeps them away from the owner's end.
pub struct StealingQueue {
    list: Mutex<List>,
    not_empty: Condvar,
}

impl StealingQueue {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty list with preallocated room for `capacity` jobs.
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

impl Default for StealingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue for StealingQueue {
    fn push(&self, job: Job) -> Result<(), QueueError> {
        let mut list = self.list.lock();
        list.jobs.push_back(job);
        list.max_len = list.max_len.max(list.jobs.len());
        drop(list);
        self.not_empty.notify_one();
        Ok(())
    }

    fn try_pop(&self) -> Option<Job> {
        self.list.lock().jobs.pop_back()
    }

    fn pop(&self) -> Job {
        let mut list = self.list.lock();
        loop {
            if let Some(job) = list.jobs.pop_back() {
                return job;
            }
            self.not_empty.wait(&mut list);
        }
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        let mut list = self.list.lock();
        loop {
            if let Some(job) = list.jobs.pop_back() {
                return Some(job);
            }
            if self.not_empty.wait_until(&mut list, deadline).timed_out() {
                return list.jobs.pop_back();
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
        QueueKind::Stealing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_owner_lifo_thief_fifo() {
        let q = StealingQueue::new();
        for name in ["a", "b", "c", "d"] {
            q.push(Job::named(name, || {})).unwrap();
        }
        assert_eq!(q.try_pop().unwrap().name(), Some("d"));
        assert_eq!(q.try_steal().unwrap().name(), Some("a"));
        assert_eq!(q.try_pop().unwrap().name(), Some("c"));
        assert_eq!(q.try_steal().unwrap().name(), Some("b"));
        assert!(q.try_steal().is_none());
        assert_eq!(q.max_len(), Some(4));
    }

    #[test]
    fn test_steal_skips_pinned() {
        let q = StealingQueue::new();
        q.push(Job::named("pinned", || {}).pinned()).unwrap();
        q.push(Job::named("free", || {})).unwrap();
        assert_eq!(q.try_steal().unwrap().name(), Some("free"));
        assert!(q.try_steal().is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_concurrent_owner_and_thieves_take_each_job_once() {
        let q = Arc::new(StealingQueue::new());
        let executed = Arc::new(AtomicUsize::new(0));
        for _ in 0..500 {
            let executed = Arc::clone(&executed);
            q.push(Job::new(move || {
                executed.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        let thieves: Vec<_> = (0..3)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    while let Some(job) = q.try_steal() {
                        let _ = job.execute();
                    }
                })
            })
            .collect();
        while let Some(job) = q.try_pop() {
            let _ = job.execute();
        }
        for t in thieves {
            t.join().unwrap();
        }
        assert_eq!(executed.load(Ordering::SeqCst), 500);
        assert!(q.is_empty());
    }
}
