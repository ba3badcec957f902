//! Error types for the index scheduler

use thiserror::Error;

/// Errors raised by scheduler lifecycle operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("index worker is already running")]
    AlreadyRunning,

    #[error("failed to spawn index worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("invalid scheduler configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while loading or validating [`SchedulerConfig`](crate::SchedulerConfig)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
