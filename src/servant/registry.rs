//! Per-thread servant storage.
//!
//! Servants are created, called, and destroyed only by jobs running on their
//! scheduler's single worker thread, so the table is thread-local. Nothing
//! outside this module can obtain a reference to a stored servant; callers
//! hand in a closure that runs against it in place.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

/// Servant identity. Never reused within a process.
pub type ServantId = u64;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static SERVANTS: RefCell<HashMap<ServantId, Box<dyn Any>>> = RefCell::new(HashMap::new());
}

pub(crate) fn next_id() -> ServantId {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn insert<S: 'static>(id: ServantId, servant: S) {
    let previous = SERVANTS.with(|map| map.borrow_mut().insert(id, Box::new(servant)));
    trace!(servant_id = id, "servant registered");
    drop(previous);
}

/// Remove and drop a servant. Returns whether it existed on this thread.
pub(crate) fn destroy(id: ServantId) -> bool {
    // Dropped outside the borrow: a servant's Drop may itself touch the table.
    let removed = SERVANTS.with(|map| map.borrow_mut().remove(&id));
    let existed = removed.is_some();
    drop(removed);
    if existed {
        trace!(servant_id = id, "servant destroyed");
    }
    existed
}

#[cfg(test)]
pub(crate) fn contains(id: ServantId) -> bool {
    SERVANTS.with(|map| map.borrow().contains_key(&id))
}

/// Run `f` against the servant `id` if it lives on this thread.
///
/// The servant is taken out of the table for the duration of the call, so
/// `f` may create or destroy other servants. A panic in `f` is re-raised
/// after the servant is put back.
pub(crate) fn with<S, R, F>(id: ServantId, f: F) -> Option<R>
where
    S: 'static,
    F: FnOnce(&mut S) -> R,
{
    let mut boxed = SERVANTS.with(|map| map.borrow_mut().remove(&id))?;
    let result = boxed
        .downcast_mut::<S>()
        .map(|servant| panic::catch_unwind(AssertUnwindSafe(|| f(servant))));
    SERVANTS.with(|map| map.borrow_mut().insert(id, boxed));
    match result? {
        Ok(value) => Some(value),
        Err(payload) => panic::resume_unwind(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u32);

    #[test]
    fn test_insert_call_destroy() {
        let id = next_id();
        insert(id, Counter(1));
        assert_eq!(with(id, |c: &mut Counter| {
            c.0 += 1;
            c.0
        }), Some(2));
        assert!(destroy(id));
        assert!(!contains(id));
        assert_eq!(with(id, |c: &mut Counter| c.0), None);
    }

    #[test]
    fn test_wrong_type_is_none() {
        let id = next_id();
        insert(id, Counter(0));
        assert_eq!(with(id, |s: &mut String| s.len()), None);
        assert!(contains(id));
        destroy(id);
    }

    #[test]
    fn test_panic_keeps_servant() {
        let id = next_id();
        insert(id, Counter(5));
        let caught = panic::catch_unwind(|| with(id, |_: &mut Counter| -> u32 { panic!("boom") }));
        assert!(caught.is_err());
        assert_eq!(with(id, |c: &mut Counter| c.0), Some(5));
        destroy(id);
    }

    #[test]
    fn test_other_thread_sees_nothing() {
        let id = next_id();
        insert(id, Counter(9));
        let seen = std::thread::spawn(move || contains(id)).join().unwrap();
        assert!(!seen);
        destroy(id);
    }
}
