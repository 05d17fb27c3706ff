//! One-shot result slot connecting a posted job to its caller.
//!
//! A [`Promise`] travels with the job; the matching [`JobFuture`] is handed to
//! the caller synchronously at post time. The slot resolves at most once:
//! either the job fulfils the promise, or the promise is dropped unfulfilled
//! (job discarded by an immediate shutdown, scheduler gone) and the future
//! reads [`CallError::Abandoned`].
//!
//! Waiting uses a `parking_lot` Condvar for blocking callers and a stored
//! `Waker` for async callers; neither path polls.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::core::CallError;

/// Outcome of an asynchronous call.
pub type CallResult<R> = Result<R, CallError>;

struct Slot<R> {
    value: Option<CallResult<R>>,
    resolved: bool,
    waker: Option<Waker>,
}

struct Shared<R> {
    slot: Mutex<Slot<R>>,
    ready: Condvar,
}

/// Write side of a call result.
pub struct Promise<R> {
    shared: Option<Arc<Shared<R>>>,
}

/// Read side of a call result. Await it, or block on [`JobFuture::wait`].
pub struct JobFuture<R> {
    shared: Arc<Shared<R>>,
}

/// Create a connected promise/future pair.
#[must_use]
pub fn promise<R>() -> (Promise<R>, JobFuture<R>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            value: None,
            resolved: false,
            waker: None,
        }),
        ready: Condvar::new(),
    });
    (
        Promise {
            shared: Some(Arc::clone(&shared)),
        },
        JobFuture { shared },
    )
}

impl<R> Promise<R> {
    /// Resolve the future with a value or an error.
    pub fn fulfill(mut self, value: CallResult<R>) {
        self.resolve(value);
    }

    fn resolve(&mut self, value: CallResult<R>) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        let waker = {
            let mut slot = shared.slot.lock();
            if slot.resolved {
                return;
            }
            slot.value = Some(value);
            slot.resolved = true;
            shared.ready.notify_all();
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<R> Drop for Promise<R> {
    fn drop(&mut self) {
        if self.shared.is_some() {
            self.resolve(Err(CallError::Abandoned));
        }
    }
}

impl<R> JobFuture<R> {
    /// A future that is already resolved.
    #[must_use]
    pub fn resolved(value: CallResult<R>) -> Self {
        let (promise, future) = promise();
        promise.fulfill(value);
        future
    }

    /// Whether a value (or error) is available.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.slot.lock().resolved
    }

    /// Take the value if it is already available.
    #[must_use]
    pub fn try_take(&self) -> Option<CallResult<R>> {
        self.shared.slot.lock().value.take()
    }

    /// Block the current thread until the call resolves.
    ///
    /// # Errors
    ///
    /// Returns the [`CallError`] the call resolved with.
    pub fn wait(self) -> CallResult<R> {
        let mut slot = self.shared.slot.lock();
        while !slot.resolved {
            self.shared.ready.wait(&mut slot);
        }
        slot.value.take().unwrap_or(Err(CallError::Abandoned))
    }

    /// Block for at most `timeout`. Returns `None` if the call is still pending.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CallResult<R>> {
        let mut slot = self.shared.slot.lock();
        if !slot.resolved {
            let _ = self
                .shared
                .ready
                .wait_while_for(&mut slot, |s| !s.resolved, timeout);
        }
        if slot.resolved {
            slot.value.take()
        } else {
            None
        }
    }
}

impl<R> Future for JobFuture<R> {
    type Output = CallResult<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock();
        if slot.resolved {
            return Poll::Ready(slot.value.take().unwrap_or(Err(CallError::Abandoned)));
        }
        slot.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<R> fmt::Debug for JobFuture<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobFuture")
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl<R> fmt::Debug for Promise<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("pending", &self.shared.is_some())
            .finish()
    }
}
