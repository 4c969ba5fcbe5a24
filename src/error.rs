//! Error types for Floodgate.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Main error type for limiter construction, lifecycle and maintenance.
///
/// Throttling is never an error: a rejected admission is a normal
/// [`Decision`](crate::ratelimit::Decision).
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Non-positive capacity, rate, interval or ttl, or an unsupported
    /// strategy/blocking combination.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// `start` was called on a limiter whose maintenance task already runs.
    #[error("Maintenance loop already started")]
    AlreadyStarted,

    /// `start` was called after `shutdown` had been signaled.
    #[error("Shutdown in progress")]
    ShutdownInProgress,

    /// The injected clock moved backwards between two maintenance ticks.
    #[error("Clock moved backwards from {previous} to {now}")]
    ClockRegression {
        previous: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// The maintenance task terminated abnormally.
    #[error("Maintenance error: {0}")]
    Maintenance(String),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for LimiterError {
    fn from(err: config::ConfigError) -> Self {
        LimiterError::Config(err.to_string())
    }
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
