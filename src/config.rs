//! Configuration management for Floodgate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LimiterError, Result};

/// Prefix of environment variables that override file settings,
/// e.g. `FLOODGATE__LIMITER__CAPACITY=10`.
const ENV_PREFIX: &str = "FLOODGATE";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for the Floodgate binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Demo traffic generator configuration
    #[serde(default)]
    pub demo: DemoConfig,
}

/// Admission algorithm applied to every key of a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Each key holds a capped number of tokens, refilled every tick.
    TokenBucket,
    /// Each key holds a bounded queue, drained every tick.
    LeakyBucket,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::TokenBucket => write!(f, "token_bucket"),
            StrategyKind::LeakyBucket => write!(f, "leaky_bucket"),
        }
    }
}

/// What a leaky-bucket admission does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockingMode {
    /// Throttle immediately.
    #[default]
    Reject,
    /// Wait for the maintenance loop to drain space, bounded by
    /// `wait_timeout_ms` when set.
    Wait,
}

/// Limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Admission algorithm
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,

    /// Maximum tokens (token bucket) or queued items (leaky bucket) per key
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Tokens refilled or items drained per key on every tick
    #[serde(default = "default_rate")]
    pub rate: u32,

    /// Maintenance tick period in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Idle duration in milliseconds after which a key is evicted
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Behaviour of a full leaky bucket
    #[serde(default)]
    pub blocking: BlockingMode,

    /// Upper bound on a wait-mode admission, unbounded when absent
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            capacity: default_capacity(),
            rate: default_rate(),
            interval_ms: default_interval_ms(),
            ttl_ms: default_ttl_ms(),
            blocking: BlockingMode::default(),
            wait_timeout_ms: None,
        }
    }
}

fn default_strategy() -> StrategyKind {
    StrategyKind::TokenBucket
}

fn default_capacity() -> u32 {
    5
}

fn default_rate() -> u32 {
    1
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_ttl_ms() -> u64 {
    10_000
}

impl LimiterConfig {
    /// Create a configuration from its recognized options.
    pub fn new(
        strategy: StrategyKind,
        capacity: u32,
        rate: u32,
        interval: Duration,
        ttl: Duration,
        blocking: BlockingMode,
    ) -> Self {
        Self {
            strategy,
            capacity,
            rate,
            interval_ms: millis_ceil(interval),
            ttl_ms: millis_ceil(ttl),
            blocking,
            wait_timeout_ms: None,
        }
    }

    /// Bound wait-mode admissions by `timeout`.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_ms = Some(millis_ceil(timeout));
        self
    }

    /// Maintenance tick period.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Idle-eviction threshold.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Wait bound for wait-mode admissions.
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    /// Check the configuration before a limiter is built from it.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(invalid("capacity must be greater than 0"));
        }
        if self.rate == 0 {
            return Err(invalid("rate must be greater than 0"));
        }
        if self.interval_ms == 0 {
            return Err(invalid("interval_ms must be greater than 0"));
        }
        if self.ttl_ms == 0 {
            return Err(invalid("ttl_ms must be greater than 0"));
        }
        if self.wait_timeout_ms == Some(0) {
            return Err(invalid("wait_timeout_ms must be greater than 0 when set"));
        }
        if self.strategy == StrategyKind::TokenBucket && self.blocking == BlockingMode::Wait {
            return Err(invalid("blocking mode `wait` is only supported by leaky_bucket"));
        }
        Ok(())
    }
}

/// Whole milliseconds, rounded up so a positive duration never becomes 0.
fn millis_ceil(duration: Duration) -> u64 {
    let millis = duration.as_nanos().div_ceil(1_000_000);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

fn invalid(msg: &str) -> LimiterError {
    LimiterError::InvalidConfiguration(msg.to_string())
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Demo traffic generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Number of distinct client ids requests are drawn from
    #[serde(default = "default_keys")]
    pub keys: u32,

    /// Delay between two generated requests in milliseconds
    #[serde(default = "default_pace_ms")]
    pub pace_ms: u64,

    /// Stop after this many requests, run until interrupted when absent
    #[serde(default)]
    pub requests: Option<u64>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            keys: default_keys(),
            pace_ms: default_pace_ms(),
            requests: None,
        }
    }
}

fn default_keys() -> u32 {
    7
}

fn default_pace_ms() -> u64 {
    100
}

impl FloodgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| LimiterError::Config(e.to_string()))
    }

    /// Load configuration layering an optional file and `FLOODGATE__*`
    /// environment variables, the latter taking precedence.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }
}
