//! Scheduler configuration
//!
//! Settings for queue capacity and the worker thread. Configuration can be
//! loaded from a TOML file, environment variables, or built programmatically.
//! Every loader validates the result before handing it out.

use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

const ENV_QUEUE_CAPACITY: &str = "INDEX_SCHEDULER_QUEUE_CAPACITY";
const ENV_WORKER_THREAD_NAME: &str = "INDEX_SCHEDULER_WORKER_THREAD_NAME";
const ENV_WORKER_NICENESS: &str = "INDEX_SCHEDULER_WORKER_NICENESS";
const ENV_IDLE_POLL_INTERVAL_MS: &str = "INDEX_SCHEDULER_IDLE_POLL_INTERVAL_MS";

/// Highest niceness accepted for the worker thread
pub const MAX_WORKER_NICENESS: i32 = 19;

/// Configuration for [`IndexScheduler`](crate::IndexScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Maximum number of queued tasks. Submissions beyond it are rejected.
    pub queue_capacity: usize,

    /// Name given to the worker thread
    pub worker_thread_name: String,

    /// Niceness applied to the worker thread (0 leaves the priority unchanged)
    pub worker_niceness: i32,

    /// Upper bound on a single idle wait of the worker, in milliseconds
    pub idle_poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            worker_thread_name: "index-task-consumer".to_string(),
            worker_niceness: 10,
            idle_poll_interval_ms: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.worker_thread_name = name.into();
        self
    }

    pub fn with_worker_niceness(mut self, niceness: i32) -> Self {
        self.worker_niceness = niceness;
        self
    }

    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    /// Loads configuration from environment variables layered over the defaults.
    ///
    /// Environment variables:
    /// - `INDEX_SCHEDULER_QUEUE_CAPACITY` (default: 100)
    /// - `INDEX_SCHEDULER_WORKER_THREAD_NAME` (default: `index-task-consumer`)
    /// - `INDEX_SCHEDULER_WORKER_NICENESS` (default: 10)
    /// - `INDEX_SCHEDULER_IDLE_POLL_INTERVAL_MS` (default: 100)
    ///
    /// # Errors
    /// Returns an error if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(val) = env_var(ENV_QUEUE_CAPACITY)? {
            config.queue_capacity = parse_env(ENV_QUEUE_CAPACITY, &val)?;
        }

        if let Some(val) = env_var(ENV_WORKER_THREAD_NAME)? {
            config.worker_thread_name = val;
        }

        if let Some(val) = env_var(ENV_WORKER_NICENESS)? {
            config.worker_niceness = parse_env(ENV_WORKER_NICENESS, &val)?;
        }

        if let Some(val) = env_var(ENV_IDLE_POLL_INTERVAL_MS)? {
            config.idle_poll_interval_ms = parse_env(ENV_IDLE_POLL_INTERVAL_MS, &val)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format (every key optional):
    /// ```toml
    /// queue_capacity = 100
    /// worker_thread_name = "index-task-consumer"
    /// worker_niceness = 10
    /// idle_poll_interval_ms = 100
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from a TOML string. Unknown keys are rejected.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every setting is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.worker_thread_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "worker_thread_name",
                reason: "must not be empty".to_string(),
            });
        }

        // Thread::Builder panics on interior NUL bytes
        if self.worker_thread_name.contains('\0') {
            return Err(ConfigError::InvalidValue {
                key: "worker_thread_name",
                reason: "must not contain NUL bytes".to_string(),
            });
        }

        if !(0..=MAX_WORKER_NICENESS).contains(&self.worker_niceness) {
            return Err(ConfigError::InvalidValue {
                key: "worker_niceness",
                reason: format!(
                    "must be between 0 and {}, got {}",
                    MAX_WORKER_NICENESS, self.worker_niceness
                ),
            });
        }

        if self.idle_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "idle_poll_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(key: &'static str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(value)) => Err(ConfigError::InvalidValue {
            key,
            reason: format!("{:?}: not valid UTF-8", value),
        }),
    }
}

fn parse_env<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            key,
            reason: format!("{:?}: {}", value, e),
        })
}
