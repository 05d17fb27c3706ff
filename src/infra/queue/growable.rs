//! Bounded ring queue that grows instead of blocking when full.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::core::queue::{JobQueue, OverflowPolicy, QueueKind};
use crate::core::{Job, QueueError};

/// Ring storage. Items are pushed at the tail and popped from the tail (LIFO).
struct Ring {
    slots: Vec<Option<Job>>,
    head: usize,
    len: usize,
    max_len: usize,
}

impl Ring {
    fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
            max_len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Rebuild the ring at `capacity + capacity / 2 + 1`, preserving order.
    fn grow(&mut self) {
        let old = self.capacity();
        let new_capacity = old + old / 2 + 1;
        let mut slots = Vec::with_capacity(new_capacity);
        for i in 0..self.len {
            let idx = (self.head + i) % old;
            slots.push(self.slots[idx].take());
        }
        slots.resize_with(new_capacity, || None);
        self.slots = slots;
        self.head = 0;
        debug!(from = old, to = new_capacity, "growable queue resized");
    }

    fn push(&mut self, job: Job) {
        let tail = (self.head + self.len) % self.capacity();
        self.slots[tail] = Some(job);
        self.len += 1;
        self.max_len = self.max_len.max(self.len);
    }

    fn top_is_pinned(&self) -> bool {
        if self.len == 0 {
            return false;
        }
        let top = (self.head + self.len - 1) % self.capacity();
        self.slots[top].as_ref().is_some_and(Job::is_pinned)
    }

    fn pop(&mut self) -> Option<Job> {
        if self.len == 0 {
            return None;
        }
        let top = (self.head + self.len - 1) % self.capacity();
        self.len -= 1;
        self.slots[top].take()
    }
}

/// Condvar-blocking LIFO queue backed by a fixed ring that grows on overflow.
///
/// The most recently pushed job is popped first. Stealing takes from the same
/// end as popping. Capacity never shrinks.
pub struct GrowableQueue {
    ring: Mutex<Ring>,
    not_empty: Condvar,
    not_full: Condvar,
    overflow: OverflowPolicy,
}

impl GrowableQueue {
    /// Create a queue with the given initial capacity that grows when full.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, OverflowPolicy::Grow)
    }

    /// Create a queue with an explicit overflow policy. A zero capacity is raised to one.
    #[must_use]
    pub fn with_policy(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            ring: Mutex::new(Ring::with_capacity(capacity.max(1))),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            overflow,
        }
    }

    /// Current ring capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    /// Overflow policy in effect.
    #[must_use]
    pub const fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }

    fn take(&self, ring: &mut Ring) -> Option<Job> {
        let job = ring.pop();
        if job.is_some() && self.overflow == OverflowPolicy::Block {
            self.not_full.notify_one();
        }
        job
    }
}

impl JobQueue for GrowableQueue {
    fn push(&self, job: Job) -> Result<(), QueueError> {
        let mut ring = self.ring.lock();
        if ring.is_full() {
            match self.overflow {
                OverflowPolicy::Grow => ring.grow(),
                OverflowPolicy::Reject => {
                    trace!(capacity = ring.capacity(), "growable queue rejected push");
                    return Err(QueueError::Full {
                        capacity: ring.capacity(),
                    });
                }
                OverflowPolicy::Block => {
                    while ring.is_full() {
                        self.not_full.wait(&mut ring);
                    }
                }
            }
        }
        ring.push(job);
        drop(ring);
        self.not_empty.notify_one();
        Ok(())
    }

    fn push_terminate(&self) -> Result<(), QueueError> {
        let mut ring = self.ring.lock();
        if ring.is_full() {
            // Sentinels bypass the overflow policy.
            ring.grow();
        }
        ring.push(Job::terminate());
        drop(ring);
        self.not_empty.notify_one();
        Ok(())
    }

    fn try_pop(&self) -> Option<Job> {
        let mut ring = self.ring.lock();
        self.take(&mut ring)
    }

    fn pop(&self) -> Job {
        let mut ring = self.ring.lock();
        loop {
            if let Some(job) = self.take(&mut ring) {
                return job;
            }
            self.not_empty.wait(&mut ring);
        }
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        let mut ring = self.ring.lock();
        loop {
            if let Some(job) = self.take(&mut ring) {
                return Some(job);
            }
            if self.not_empty.wait_until(&mut ring, deadline).timed_out() {
                return self.take(&mut ring);
            }
        }
    }

    fn try_steal(&self) -> Option<Job> {
        let mut ring = self.ring.lock();
        if ring.top_is_pinned() {
            return None;
        }
        self.take(&mut ring)
    }

    fn len(&self) -> usize {
        self.ring.lock().len
    }

    fn max_len(&self) -> Option<usize> {
        Some(self.ring.lock().max_len)
    }

    fn supports_steal(&self) -> bool {
        true
    }

    fn kind(&self) -> QueueKind {
        QueueKind::Growable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    /// Job that records its label into a shared log when run.
    fn labelled(label: usize, log: &Arc<Mutex<Vec<usize>>>) -> Job {
        let log = Arc::clone(log);
        Job::new(move || log.lock().push(label))
    }

    fn run(job: Job) {
        let _ = job.execute();
    }

    #[test]
    fn test_capacity_two_scenario() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let q = GrowableQueue::new(2);

        q.push(labelled(1, &log)).unwrap();
        q.push(labelled(2, &log)).unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(q.capacity(), 2);

        q.push(labelled(3, &log)).unwrap();
        assert_eq!(q.len(), 3);
        assert!(q.capacity() >= 3);
        assert_eq!(q.capacity(), 4);

        run(q.try_pop().unwrap());
        run(q.try_pop().unwrap());
        run(q.try_pop().unwrap());
        assert!(q.try_pop().is_none());
        assert_eq!(*log.lock(), vec![3, 2, 1]);
    }

    #[test]
    fn test_lifo_across_growth() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let q = GrowableQueue::new(3);
        for i in 1..=7 {
            q.push(labelled(i, &log)).unwrap();
        }
        while let Some(job) = q.try_pop() {
            run(job);
        }
        assert_eq!(*log.lock(), vec![7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_capacity_is_monotonic() {
        let q = GrowableQueue::new(1);
        let mut last = q.capacity();
        for _ in 0..50 {
            q.push(Job::new(|| {})).unwrap();
            let cap = q.capacity();
            assert!(cap >= last);
            last = cap;
        }
        while q.try_pop().is_some() {
            assert!(q.capacity() >= last);
        }
        assert_eq!(q.max_len(), Some(50));
    }

    #[test]
    fn test_reject_policy() {
        let q = GrowableQueue::with_policy(2, OverflowPolicy::Reject);
        q.push(Job::new(|| {})).unwrap();
        q.push(Job::new(|| {})).unwrap();
        let err = q.push(Job::new(|| {})).unwrap_err();
        assert_eq!(err, QueueError::Full { capacity: 2 });
        assert_eq!(q.capacity(), 2);
    }

    #[test]
    fn test_block_policy_waits_for_consumer() {
        let q = Arc::new(GrowableQueue::with_policy(1, OverflowPolicy::Block));
        q.push(Job::new(|| {})).unwrap();

        let pushed = Arc::new(AtomicUsize::new(0));
        let producer = {
            let q = Arc::clone(&q);
            let pushed = Arc::clone(&pushed);
            thread::spawn(move || {
                q.push(Job::new(|| {})).unwrap();
                pushed.store(1, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(pushed.load(Ordering::SeqCst), 0);
        assert!(q.try_pop().is_some());
        producer.join().unwrap();
        assert_eq!(pushed.load(Ordering::SeqCst), 1);
        assert_eq!(q.capacity(), 1);
    }

    #[test]
    fn test_terminate_ignores_overflow_policy() {
        for policy in [OverflowPolicy::Block, OverflowPolicy::Reject] {
            let q = GrowableQueue::with_policy(1, policy);
            q.push(Job::new(|| {})).unwrap();
            q.push_terminate().unwrap();
            assert_eq!(q.len(), 2);
            assert_eq!(q.capacity(), 2);
            assert!(q.try_pop().unwrap().is_terminate());
        }
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let q = Arc::new(GrowableQueue::new(4));
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop().name().map(str::to_owned))
        };
        thread::sleep(Duration::from_millis(20));
        q.push(Job::named("late", || {})).unwrap();
        assert_eq!(consumer.join().unwrap().as_deref(), Some("late"));
    }

    #[test]
    fn test_pop_timeout_expires() {
        let q = GrowableQueue::new(4);
        let start = Instant::now();
        assert!(q.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_steal_leaves_pinned_top() {
        let q = GrowableQueue::new(4);
        q.push(Job::new(|| {})).unwrap();
        q.push(Job::new(|| {}).pinned()).unwrap();
        assert!(q.try_steal().is_none());
        assert!(q.try_pop().unwrap().is_pinned());
        assert!(q.try_steal().is_some());
    }
}
