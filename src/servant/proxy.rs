//! Thread-agnostic handle to a servant living on a single-worker scheduler.

use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, trace};

use super::registry::{self, ServantId};
use super::trackable::TrackableServant;
use crate::core::future::{promise, JobFuture};
use crate::core::job::panic_message;
use crate::core::scheduler::{SchedulerHandle, WeakSchedulerHandle};
use crate::core::{CallError, Job, ServantError};

/// Shared by all clones of one proxy; its drop destroys the servant.
struct Binding {
    id: ServantId,
    scheduler: WeakSchedulerHandle,
}

impl Drop for Binding {
    fn drop(&mut self) {
        let id = self.id;
        let destroy = Job::named("servant-destroy", move || {
            registry::destroy(id);
        })
        .pinned();
        if self.scheduler.post(destroy).is_err() {
            // Scheduler already gone or stopping: the servant goes with its thread.
            debug!(servant_id = id, "servant destruction not posted");
        }
    }
}

/// Handle through which other threads call a servant of type `S`.
///
/// The proxy holds a weak scheduler handle and the servant's id, nothing
/// else. Every call becomes a pinned job on the servant's scheduler, so the
/// servant is only ever touched by that scheduler's worker thread. `S` itself
/// need not be `Send`: it is built on the worker by the factory and never
/// leaves it.
///
/// Clones share the servant. When the last clone is dropped, a destruction
/// job is posted.
pub struct ServantProxy<S: 'static> {
    binding: Arc<Binding>,
    _servant: PhantomData<fn() -> S>,
}

impl<S: 'static> Clone for ServantProxy<S> {
    fn clone(&self) -> Self {
        Self {
            binding: Arc::clone(&self.binding),
            _servant: PhantomData,
        }
    }
}

/// Servants need a scheduler backed by exactly one known thread.
fn check_single_worker(handle: &SchedulerHandle) -> Result<(), ServantError> {
    match handle.thread_ids().len() {
        1 => Ok(()),
        n => Err(ServantError::NotSingleThreaded(n)),
    }
}

impl<S: 'static> ServantProxy<S> {
    /// Build a servant on `handle`'s worker thread with `factory`.
    ///
    /// Construction is posted, not awaited, unless the caller already runs on
    /// that worker, in which case the servant is built inline. A factory that
    /// panics leaves no servant behind; later calls then report
    /// [`CallError::ServantGone`].
    ///
    /// # Errors
    ///
    /// [`ServantError::NotSingleThreaded`] unless the scheduler runs on exactly
    /// one dedicated thread, or [`ServantError::Scheduler`] if it refuses the job.
    pub fn new<F>(handle: &SchedulerHandle, factory: F) -> Result<Self, ServantError>
    where
        F: FnOnce() -> S + Send + 'static,
    {
        Self::new_with_id(handle, move |_| factory)
    }

    /// Like [`ServantProxy::new`], but waits until the factory has run.
    ///
    /// # Errors
    ///
    /// As [`ServantProxy::new`], plus [`ServantError::Construction`] if the
    /// factory panicked or the construction job was dropped.
    pub fn new_blocking<F>(handle: &SchedulerHandle, factory: F) -> Result<Self, ServantError>
    where
        F: FnOnce() -> S + Send + 'static,
    {
        check_single_worker(handle)?;
        let id = registry::next_id();
        if handle.is_current() {
            registry::insert(id, factory());
            return Ok(Self::bind(id, handle));
        }
        let (done, built) = promise();
        handle.post(
            Job::named("servant-create", move || {
                match panic::catch_unwind(AssertUnwindSafe(|| registry::insert(id, factory()))) {
                    Ok(()) => done.fulfill(Ok(())),
                    Err(payload) => {
                        done.fulfill(Err(CallError::Panicked(panic_message(payload.as_ref()))));
                        panic::resume_unwind(payload);
                    }
                }
            })
            .pinned(),
        )?;
        built.wait()?;
        debug!(servant_id = id, scheduler = %handle.name(), "servant bound");
        Ok(Self::bind(id, handle))
    }

    /// Build a servant that embeds a [`TrackableServant`] for its own
    /// callbacks. The factory receives the tracker.
    ///
    /// # Errors
    ///
    /// Same as [`ServantProxy::new`].
    pub fn new_trackable<F>(handle: &SchedulerHandle, factory: F) -> Result<Self, ServantError>
    where
        F: FnOnce(TrackableServant<S>) -> S + Send + 'static,
    {
        let weak = handle.downgrade();
        Self::new_with_id(handle, move |id| move || factory(TrackableServant::new(id, weak)))
    }

    fn new_with_id<G, F>(handle: &SchedulerHandle, make: G) -> Result<Self, ServantError>
    where
        G: FnOnce(ServantId) -> F,
        F: FnOnce() -> S + Send + 'static,
    {
        check_single_worker(handle)?;
        let id = registry::next_id();
        let factory = make(id);
        if handle.is_current() {
            registry::insert(id, factory());
        } else {
            handle.post(
                Job::named("servant-create", move || registry::insert(id, factory())).pinned(),
            )?;
        }
        debug!(servant_id = id, scheduler = %handle.name(), "servant bound");
        Ok(Self::bind(id, handle))
    }

    fn bind(id: ServantId, handle: &SchedulerHandle) -> Self {
        Self {
            binding: Arc::new(Binding {
                id,
                scheduler: handle.downgrade(),
            }),
            _servant: PhantomData,
        }
    }

    /// Servant identity.
    #[must_use]
    pub fn id(&self) -> ServantId {
        self.binding.id
    }

    /// Weak handle to the servant's scheduler.
    #[must_use]
    pub fn scheduler(&self) -> WeakSchedulerHandle {
        self.binding.scheduler.clone()
    }

    /// Whether the servant's scheduler still exists.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.binding.scheduler.is_expired()
    }

    /// Fire-and-forget call. Silently skipped if the servant no longer exists.
    ///
    /// # Errors
    ///
    /// [`CallError::SchedulerUnavailable`] if the scheduler is gone or refused the job.
    pub fn post<F>(&self, f: F) -> Result<(), CallError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let id = self.binding.id;
        self.binding.scheduler.post(
            Job::new(move || {
                if registry::with(id, f).is_none() {
                    trace!(servant_id = id, "call skipped, servant gone");
                }
            })
            .pinned(),
        )
    }

    /// Call with a result. Panics inside `f` resolve the future with
    /// [`CallError::Panicked`]; a missing servant with [`CallError::ServantGone`].
    pub fn post_future<R, F>(&self, f: F) -> JobFuture<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let id = self.binding.id;
        let (promise, future) = promise();
        let job = Job::new(move || {
            match panic::catch_unwind(AssertUnwindSafe(|| registry::with(id, f))) {
                Ok(Some(value)) => promise.fulfill(Ok(value)),
                Ok(None) => promise.fulfill(Err(CallError::ServantGone)),
                Err(payload) => {
                    promise.fulfill(Err(CallError::Panicked(panic_message(payload.as_ref()))));
                    panic::resume_unwind(payload);
                }
            }
        })
        .pinned();
        match self.binding.scheduler.post(job) {
            Ok(()) => future,
            Err(e) => JobFuture::resolved(Err(e)),
        }
    }

    /// Two-phase call: `work` runs on `worker`, then `callback` runs on the
    /// servant's scheduler with the servant and the work result.
    ///
    /// The callback is skipped if the servant was destroyed in between.
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
        let id = self.binding.id;
        let home = self.binding.scheduler.clone();
        let job = Job::new(move || {
            run_then_return(work, &home, move |result| {
                if registry::with(id, move |servant: &mut S| callback(servant, result)).is_none() {
                    trace!(servant_id = id, "callback skipped, servant gone");
                }
            });
        });
        worker.post(job).map_err(|_| CallError::SchedulerUnavailable)
    }
}

/// Run `work` here, then post `deliver` with its result onto `home`.
///
/// A panic in `work` is delivered as [`CallError::Panicked`] and then
/// re-raised so the running worker records the failure.
pub(crate) fn run_then_return<R, W, D>(work: W, home: &WeakSchedulerHandle, deliver: D)
where
    R: Send + 'static,
    W: FnOnce() -> R,
    D: FnOnce(Result<R, CallError>) + Send + 'static,
{
    let (result, payload) = match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(value) => (Ok(value), None),
        Err(payload) => (
            Err(CallError::Panicked(panic_message(payload.as_ref()))),
            Some(payload),
        ),
    };
    let back = Job::named("servant-callback", move || deliver(result)).pinned();
    if home.post(back).is_err() {
        debug!("callback dropped, servant scheduler unavailable");
    }
    if let Some(payload) = payload {
        panic::resume_unwind(payload);
    }
}

impl<S: 'static> fmt::Debug for ServantProxy<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServantProxy")
            .field("id", &self.binding.id)
            .field("scheduler", &self.binding.scheduler)
            .finish()
    }
}
