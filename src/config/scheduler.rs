//! Scheduler and composite configuration structures.

use serde::{Deserialize, Serialize};

use crate::core::composite::PostPolicy;
use crate::core::queue::{OverflowPolicy, QueueKind};
use crate::core::scheduler::ShutdownMode;

/// Environment variable prefix read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "SERVANT_POOL_";

/// How queues are laid out across a scheduler's workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueTopology {
    /// All workers share one queue.
    #[default]
    Shared,
    /// One queue per worker; posts are spread round-robin and idle workers
    /// steal from their siblings.
    PerWorker,
}

/// What an idle worker does after finding nothing to run or steal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Block on the own queue's `pop` until a job arrives.
    #[default]
    Block,
    /// Re-check `checks` times (yielding in between), then sleep with a
    /// doubling interval capped at `max_sleep_us` microseconds.
    Spin {
        /// Number of immediate re-checks before sleeping.
        checks: u32,
        /// Upper bound for one idle sleep, in microseconds.
        max_sleep_us: u64,
    },
}

impl BackoffPolicy {
    /// Spin policy suited to stealing configurations.
    #[must_use]
    pub const fn spin() -> Self {
        Self::Spin {
            checks: 64,
            max_sleep_us: 1_000,
        }
    }
}

/// Configuration for one thread-pool scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name used for worker thread names and log fields.
    pub name: String,
    /// Number of worker threads.
    pub worker_count: usize,
    /// Queue implementation.
    pub queue: QueueKind,
    /// Initial (growable) or fixed (spsc) queue capacity.
    pub queue_capacity: usize,
    /// Overflow behavior of the growable queue.
    pub overflow: OverflowPolicy,
    /// Shared queue or one queue per worker.
    pub topology: QueueTopology,
    /// Idle behavior of workers.
    pub backoff: BackoffPolicy,
    /// Mode used when the last strong handle is dropped.
    pub shutdown_mode: ShutdownMode,
    /// Number of diagnostic records kept; `0` keeps counters only.
    pub diagnostics_history: usize,
    /// Worker thread stack size in bytes.
    pub thread_stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "pool".into(),
            worker_count: num_cpus::get().max(1),
            queue: QueueKind::Growable,
            queue_capacity: 64,
            overflow: OverflowPolicy::Grow,
            topology: QueueTopology::Shared,
            backoff: BackoffPolicy::Block,
            shutdown_mode: ShutdownMode::Drain,
            diagnostics_history: 256,
            thread_stack_size: 2 * 1024 * 1024,
        }
    }
}

impl SchedulerConfig {
    /// Defaults: one worker per CPU, shared growable queue, blocking idle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-threaded FIFO scheduler, the kind servants are bound to.
    #[must_use]
    pub fn single_threaded(name: impl Into<String>) -> Self {
        Self::default()
            .with_name(name)
            .with_worker_count(1)
            .with_queue(QueueKind::Fifo)
    }

    /// Set the scheduler name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the worker count.
    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the queue implementation.
    #[must_use]
    pub fn with_queue(mut self, queue: QueueKind) -> Self {
        self.queue = queue;
        self
    }

    /// Set the queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the growable queue's overflow policy.
    #[must_use]
    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Set the queue topology.
    #[must_use]
    pub fn with_topology(mut self, topology: QueueTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Set the idle backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the shutdown mode applied on last-handle drop.
    #[must_use]
    pub fn with_shutdown_mode(mut self, mode: ShutdownMode) -> Self {
        self.shutdown_mode = mode;
        self
    }

    /// Set the diagnostic history length.
    #[must_use]
    pub fn with_diagnostics_history(mut self, records: usize) -> Self {
        self.diagnostics_history = records;
        self
    }

    /// Set the worker stack size.
    #[must_use]
    pub fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("name must not be empty".into());
        }
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if let BackoffPolicy::Spin { max_sleep_us, .. } = self.backoff {
            if max_sleep_us == 0 {
                return Err("max_sleep_us must be greater than 0".into());
            }
        }
        if self.queue == QueueKind::Spsc {
            if self.topology == QueueTopology::Shared && self.worker_count > 1 {
                return Err("spsc queue has a single consumer; use one worker or per_worker topology".into());
            }
            if self.backoff == BackoffPolicy::Block {
                return Err("spsc queue never blocks; use spin backoff".into());
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `SERVANT_POOL_*` environment variables,
    /// loading a `.env` file first if one exists. Unset variables keep defaults.
    ///
    /// Recognized: `NAME`, `WORKERS`, `QUEUE` (`growable`/`spsc`/`stealing`/`fifo`),
    /// `QUEUE_CAPACITY`, `TOPOLOGY` (`shared`/`per_worker`), `DIAGNOSTICS_HISTORY`.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse, or a validation error.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        if let Some(name) = env_var("NAME") {
            cfg.name = name;
        }
        if let Some(workers) = env_var("WORKERS") {
            cfg.worker_count = parse_var("WORKERS", &workers)?;
        }
        if let Some(queue) = env_var("QUEUE") {
            cfg.queue = parse_enum("QUEUE", &queue)?;
        }
        if let Some(capacity) = env_var("QUEUE_CAPACITY") {
            cfg.queue_capacity = parse_var("QUEUE_CAPACITY", &capacity)?;
        }
        if let Some(topology) = env_var("TOPOLOGY") {
            cfg.topology = parse_enum("TOPOLOGY", &topology)?;
        }
        if let Some(history) = env_var("DIAGNOSTICS_HISTORY") {
            cfg.diagnostics_history = parse_var("DIAGNOSTICS_HISTORY", &history)?;
        }
        if cfg.queue == QueueKind::Spsc && cfg.backoff == BackoffPolicy::Block {
            cfg.backoff = BackoffPolicy::spin();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Configuration for a composite scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositeConfig {
    /// Composite name used in logs; `"composite"` when empty.
    #[serde(default)]
    pub name: String,
    /// Member scheduler configurations, in steal-scan order.
    pub members: Vec<SchedulerConfig>,
    /// How posts are spread across members.
    #[serde(default)]
    pub policy: PostPolicy,
}

impl CompositeConfig {
    /// Validate all members and ensure at least one exists.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid member.
    pub fn validate(&self) -> Result<(), String> {
        if self.members.is_empty() {
            return Err("at least one member scheduler must be defined".into());
        }
        for (idx, member) in self.members.iter().enumerate() {
            member
                .validate()
                .map_err(|e| format!("member {idx} (`{}`) invalid: {e}", member.name))?;
        }
        Ok(())
    }

    /// Parse composite configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{key}")).ok()
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("{ENV_PREFIX}{key}: {e}"))
}

fn parse_enum<T: for<'de> Deserialize<'de>>(key: &str, value: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_lowercase()))
        .map_err(|e| format!("{ENV_PREFIX}{key}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = SchedulerConfig::new();
        assert!(cfg.validate().is_ok());
        assert!(cfg.worker_count >= 1);
    }

    #[test]
    fn test_invalid_values() {
        assert!(SchedulerConfig::new().with_worker_count(0).validate().is_err());
        assert!(SchedulerConfig::new().with_queue_capacity(0).validate().is_err());
        assert!(SchedulerConfig::new().with_name("").validate().is_err());
        assert!(SchedulerConfig::new()
            .with_backoff(BackoffPolicy::Spin {
                checks: 1,
                max_sleep_us: 0
            })
            .validate()
            .is_err());
    }

    #[test]
    fn test_spsc_constraints() {
        let shared = SchedulerConfig::new()
            .with_queue(QueueKind::Spsc)
            .with_worker_count(2)
            .with_backoff(BackoffPolicy::spin());
        assert!(shared.validate().is_err());

        let blocking = SchedulerConfig::single_threaded("ring").with_queue(QueueKind::Spsc);
        assert!(blocking.validate().is_err());

        let ok = SchedulerConfig::single_threaded("ring")
            .with_queue(QueueKind::Spsc)
            .with_backoff(BackoffPolicy::spin());
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "name": "io",
            "worker_count": 2,
            "queue": "stealing",
            "topology": "per_worker",
            "backoff": { "mode": "spin", "checks": 8, "max_sleep_us": 500 }
        }"#;
        let cfg = SchedulerConfig::from_json_str(json).unwrap();
        assert_eq!(cfg.name, "io");
        assert_eq!(cfg.queue, QueueKind::Stealing);
        assert_eq!(cfg.topology, QueueTopology::PerWorker);
        assert_eq!(
            cfg.backoff,
            BackoffPolicy::Spin {
                checks: 8,
                max_sleep_us: 500
            }
        );
        assert_eq!(cfg.queue_capacity, 64);
    }

    #[test]
    fn test_composite_requires_members() {
        assert!(CompositeConfig::default().validate().is_err());
        let cfg = CompositeConfig {
            name: "pair".into(),
            members: vec![
                SchedulerConfig::single_threaded("a"),
                SchedulerConfig::new().with_worker_count(0),
            ],
            policy: PostPolicy::RoundRobin,
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.starts_with("member 1"));
    }
}
