//! # Servant Pool
//!
//! Thread-pool schedulers with pluggable job queues, work stealing, and
//! servant objects that are called safely from any thread.
//!
//! ## Core Problem Solved
//!
//! Stateful objects shared between threads usually end up behind a lock. A
//! servant avoids that: it lives on one scheduler's worker thread and every
//! call to it becomes a job on that scheduler. Callers hold only a proxy,
//! which cannot reach the servant's memory.
//!
//! ## Key Features
//!
//! - **Pluggable Queues**: growable LIFO ring with configurable overflow,
//!   lock-free SPSC ring, work-stealing list, FIFO list
//! - **Thread-Pool Scheduler**: shared or per-worker queues, sibling stealing,
//!   block or spin idle policy, drain or immediate shutdown
//! - **Composite Scheduler**: round-robin or least-loaded posting with
//!   cross-member stealing
//! - **Servants**: fire-and-forget, future-returning and two-phase callback
//!   calls; trackable servants drop callbacks that outlive them
//! - **Diagnostics**: per-job timestamps and per-scheduler counters
//! - **Remote Boundary**: named tasks over a pluggable transport
//!
//! ## ThreadPoolScheduler
//!
//! ```rust,ignore
//! use servant_pool::config::SchedulerConfig;
//! use servant_pool::core::{QueueKind, ThreadPoolScheduler};
//! use servant_pool::config::QueueTopology;
//!
//! let pool = ThreadPoolScheduler::spawn(
//!     SchedulerConfig::new()
//!         .with_worker_count(4)
//!         .with_queue(QueueKind::Stealing)
//!         .with_topology(QueueTopology::PerWorker),
//! )?;
//!
//! pool.post_fn(|| println!("fire and forget"))?;
//! let sum = pool.post_future(|| (1..=10).sum::<u32>()).wait()?;
//! ```
//!
//! ## Servants
//!
//! ```rust,ignore
//! use servant_pool::servant::ServantProxy;
//!
//! let home = ThreadPoolScheduler::spawn(SchedulerConfig::single_threaded("db"))?;
//! let workers = ThreadPoolScheduler::spawn(SchedulerConfig::new())?;
//! let cache = ServantProxy::new(&home, || HashMap::<String, u64>::new())?;
//!
//! cache.post(|map| { map.insert("answer".into(), 42); })?;
//! cache.post_callback(
//!     &workers,
//!     || expensive_lookup(),
//!     |map, result| { if let Ok(v) = result { map.insert("slow".into(), v); } },
//! )?;
//! ```
//!
//! For complete examples, see:
//! - `tests/scheduler_test.rs` - Scheduler lifecycle and shutdown
//! - `tests/servant_test.rs` - Servant, proxy and trackable servant
//! - `tests/composite_test.rs` - Cross-member stealing

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: jobs, queues, schedulers, futures.
pub mod core;
/// Configuration models for schedulers and composites.
pub mod config;
/// Builders to construct schedulers from configuration.
pub mod builders;
/// Queue implementations.
pub mod infra;
/// Runtime adapters: remote boundary and tokio integration.
pub mod runtime;
/// Servants, proxies and callback tracking.
pub mod servant;
/// Shared utilities.
pub mod util;
