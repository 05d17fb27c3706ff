//! Callback tracking for servants that issue their own asynchronous calls.
//!
//! A servant embeds a [`TrackableServant`] and routes callback-bearing calls
//! through it. Each call registers an entry in the servant's tracking table;
//! when the servant is dropped, every outstanding entry is invalidated. The
//! callback phase checks its entry before it looks the servant up, so a
//! callback arriving after destruction does nothing.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::proxy::run_then_return;
use super::registry::{self, ServantId};
use crate::core::future::{promise, JobFuture};
use crate::core::scheduler::{SchedulerHandle, WeakSchedulerHandle};
use crate::core::{CallError, Job};

type Table = HashMap<u64, Arc<AtomicBool>>;

/// Proof that a tracked call was registered. Dropping it removes the entry.
struct Ticket {
    entry: u64,
    valid: Arc<AtomicBool>,
    table: Weak<Mutex<Table>>,
}

impl Ticket {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.lock().remove(&self.entry);
        }
    }
}

/// Tracking table embedded in a servant of type `S`.
///
/// Obtained from [`ServantProxy::new_trackable`](super::ServantProxy::new_trackable).
pub struct TrackableServant<S: 'static> {
    servant: ServantId,
    scheduler: WeakSchedulerHandle,
    table: Arc<Mutex<Table>>,
    next_entry: AtomicU64,
    _servant: PhantomData<fn() -> S>,
}

impl<S: 'static> TrackableServant<S> {
    pub(crate) fn new(servant: ServantId, scheduler: WeakSchedulerHandle) -> Self {
        Self {
            servant,
            scheduler,
            table: Arc::new(Mutex::new(HashMap::new())),
            next_entry: AtomicU64::new(0),
            _servant: PhantomData,
        }
    }

    /// Id of the owning servant.
    #[must_use]
    pub const fn servant_id(&self) -> ServantId {
        self.servant
    }

    /// Weak handle to the servant's own scheduler.
    #[must_use]
    pub fn scheduler(&self) -> WeakSchedulerHandle {
        self.scheduler.clone()
    }

    /// Calls registered and not yet delivered.
    #[must_use]
    pub fn pending_callbacks(&self) -> usize {
        self.table.lock().len()
    }

    fn track(&self) -> Ticket {
        let entry = self.next_entry.fetch_add(1, Ordering::Relaxed);
        let valid = Arc::new(AtomicBool::new(true));
        self.table.lock().insert(entry, Arc::clone(&valid));
        Ticket {
            entry,
            valid,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Run `work` on `worker`, then `callback` on this servant, unless the
    /// servant has been dropped by then.
    ///
    /// # Errors
    ///
    /// [`CallError::SchedulerUnavailable`] if `worker` refused the work job.
    pub fn post_callback<R, W, C>(
        &self,
        worker: &SchedulerHandle,
        work: W,
        callback: C,
    ) -> Result<(), CallError>
    where
        R: Send + 'static,
        W: FnOnce() -> R + Send + 'static,
        C: FnOnce(&mut S, Result<R, CallError>) + Send + 'static,
    {
        let ticket = self.track();
        let id = self.servant;
        let home = self.scheduler.clone();
        let job = Job::new(move || {
            run_then_return(work, &home, move |result| {
                if !ticket.is_valid() {
                    trace!(servant_id = id, "callback skipped, servant destroyed");
                    return;
                }
                drop(ticket);
                if registry::with(id, move |servant: &mut S| callback(servant, result)).is_none() {
                    trace!(servant_id = id, "callback skipped, servant gone");
                }
            });
        });
        worker.post(job).map_err(|_| CallError::SchedulerUnavailable)
    }

    /// Run `work` on `worker` and deliver its result through a future, routed
    /// back through this servant's scheduler. Resolves
    /// [`CallError::ServantGone`] if the servant was dropped first.
    pub fn post_future<R, W>(&self, worker: &SchedulerHandle, work: W) -> JobFuture<R>
    where
        R: Send + 'static,
        W: FnOnce() -> R + Send + 'static,
    {
        let ticket = self.track();
        let home = self.scheduler.clone();
        let (promise, future) = promise();
        let job = Job::new(move || {
            run_then_return(work, &home, move |result| {
                if ticket.is_valid() {
                    promise.fulfill(result);
                } else {
                    promise.fulfill(Err(CallError::ServantGone));
                }
            });
        });
        match worker.post(job) {
            Ok(()) => future,
            Err(_) => JobFuture::resolved(Err(CallError::SchedulerUnavailable)),
        }
    }

    /// Queue a deferred call to this servant on its own scheduler.
    ///
    /// # Errors
    ///
    /// [`CallError::SchedulerUnavailable`] if the scheduler is gone or stopping.
    pub fn post_self<F>(&self, f: F) -> Result<(), CallError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let ticket = self.track();
        let id = self.servant;
        self.scheduler.post(
            Job::new(move || {
                if !ticket.is_valid() {
                    return;
                }
                drop(ticket);
                let _ = registry::with(id, f);
            })
            .pinned(),
        )
    }
}

impl<S: 'static> Drop for TrackableServant<S> {
    fn drop(&mut self) {
        let table = self.table.lock();
        for valid in table.values() {
            valid.store(false, Ordering::Release);
        }
        if !table.is_empty() {
            debug!(
                servant_id = self.servant,
                outstanding = table.len(),
                "servant dropped with callbacks in flight"
            );
        }
    }
}

impl<S: 'static> fmt::Debug for TrackableServant<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackableServant")
            .field("servant", &self.servant)
            .field("pending", &self.pending_callbacks())
            .finish()
    }
}
