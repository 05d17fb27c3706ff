//! Servants: single-threaded state objects called through proxies.
//!
//! A servant lives on the worker thread of a single-worker scheduler and is
//! reachable only through jobs posted there. [`ServantProxy`] turns method
//! calls into such jobs (fire-and-forget, future-returning, or two-phase
//! callback). [`TrackableServant`] lets a servant issue its own callbacks and
//! have them dropped if it is destroyed first.
//!
//! ```rust,ignore
//! use servant_pool::config::SchedulerConfig;
//! use servant_pool::core::ThreadPoolScheduler;
//! use servant_pool::servant_proxy;
//!
//! #[derive(Default)]
//! struct Counter { value: u64 }
//!
//! impl Counter {
//!     fn add(&mut self, n: u64) { self.value += n; }
//!     fn get(&mut self) -> u64 { self.value }
//! }
//!
//! servant_proxy! {
//!     pub struct CounterProxy for Counter {
//!         fn add(n: u64);
//!         fn get() -> u64;
//!     }
//! }
//!
//! let home = ThreadPoolScheduler::spawn(SchedulerConfig::single_threaded("counter"))?;
//! let counter = CounterProxy::new(&home, Counter::default)?;
//! counter.add(2)?;
//! assert_eq!(counter.get().wait()?, 2);
//! ```

mod proxy;
mod registry;
mod trackable;

pub use proxy::ServantProxy;
pub use registry::ServantId;
pub use trackable::TrackableServant;

/// Generate a typed proxy whose methods mirror a servant's methods.
///
/// Methods declared without a return type become fire-and-forget calls
/// returning `Result<(), CallError>`; methods with a return type `R` return
/// `JobFuture<R>`. Arguments are moved into the posted job, so they must be
/// `Send + 'static`.
#[macro_export]
macro_rules! servant_proxy {
    (
        $(#[$meta:meta])*
        $vis:vis struct $proxy:ident for $servant:ty {
            $(
                $(#[$mmeta:meta])*
                fn $method:ident ( $($arg:ident : $argty:ty),* $(,)? ) $(-> $ret:ty)? ;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $proxy {
            inner: $crate::servant::ServantProxy<$servant>,
        }

        impl $proxy {
            /// Build the servant on `handle`'s worker thread.
            ///
            /// # Errors
            ///
            /// Fails unless the scheduler runs on one dedicated thread and is open.
            #[allow(dead_code)]
            $vis fn new<F>(
                handle: &$crate::core::SchedulerHandle,
                factory: F,
            ) -> ::core::result::Result<Self, $crate::core::ServantError>
            where
                F: FnOnce() -> $servant + Send + 'static,
            {
                $crate::servant::ServantProxy::new(handle, factory).map(|inner| Self { inner })
            }

            /// Wrap an existing untyped proxy.
            #[allow(dead_code)]
            $vis fn from_proxy(inner: $crate::servant::ServantProxy<$servant>) -> Self {
                Self { inner }
            }

            /// The untyped proxy, for `post_callback` and other generic calls.
            #[allow(dead_code)]
            $vis fn proxy(&self) -> &$crate::servant::ServantProxy<$servant> {
                &self.inner
            }

            $(
                $crate::servant_proxy!(@method $vis, $(#[$mmeta])* $method ($($arg : $argty),*) $(-> $ret)?);
            )*
        }
    };

    (@method $vis:vis, $(#[$mmeta:meta])* $method:ident ($($arg:ident : $argty:ty),*) -> $ret:ty) => {
        $(#[$mmeta])*
        #[allow(dead_code)]
        $vis fn $method(&self, $($arg: $argty),*) -> $crate::core::JobFuture<$ret> {
            self.inner.post_future(move |servant| servant.$method($($arg),*))
        }
    };

    (@method $vis:vis, $(#[$mmeta:meta])* $method:ident ($($arg:ident : $argty:ty),*)) => {
        $(#[$mmeta])*
        #[allow(dead_code)]
        $vis fn $method(&self, $($arg: $argty),*) -> ::core::result::Result<(), $crate::core::CallError> {
            self.inner.post(move |servant| {
                servant.$method($($arg),*);
            })
        }
    };
}
