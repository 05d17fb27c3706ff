//! Configuration models for schedulers and composites.

pub mod scheduler;

pub use scheduler::{BackoffPolicy, CompositeConfig, QueueTopology, SchedulerConfig, ENV_PREFIX};
