//! Builders that turn configuration into running schedulers.

use tracing::debug;

use crate::config::{CompositeConfig, SchedulerConfig};
use crate::core::{CompositeScheduler, SchedulerError, SchedulerHandle, ThreadPoolScheduler};

/// Start a thread-pool scheduler from configuration.
///
/// # Errors
///
/// [`SchedulerError::InvalidConfig`] if validation fails, or
/// [`SchedulerError::Spawn`] if a worker could not be started.
pub fn build_scheduler(cfg: &SchedulerConfig) -> Result<SchedulerHandle, SchedulerError> {
    ThreadPoolScheduler::spawn(cfg.clone())
}

/// Start every member and combine them into a composite scheduler.
///
/// Members already started are shut down again if a later one fails.
///
/// # Errors
///
/// [`SchedulerError::InvalidConfig`] if validation fails, or the first
/// member's start-up error.
pub fn build_composite(cfg: &CompositeConfig) -> Result<SchedulerHandle, SchedulerError> {
    cfg.validate().map_err(SchedulerError::InvalidConfig)?;

    let members = cfg
        .members
        .iter()
        .map(build_scheduler)
        .collect::<Result<Vec<_>, _>>()?;
    let name = if cfg.name.is_empty() {
        "composite"
    } else {
        cfg.name.as_str()
    };
    debug!(composite = name, members = members.len(), "members started");
    CompositeScheduler::spawn(name, members, cfg.policy)
}
