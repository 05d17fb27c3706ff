//! Builders for schedulers and composites.

pub mod scheduler_builder;

pub use scheduler_builder::{build_composite, build_scheduler};
