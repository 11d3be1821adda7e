//! Queue and worker configuration.
//!
//! Both config structs carry defaults, fluent `with_*` builders and a
//! `from_env()` constructor. CLI flags override whatever `from_env()` loaded.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Retention window for task and execution records (7 days).
pub const DEFAULT_TASK_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// How long one dequeue call blocks before giving the worker a chance to
/// observe a shutdown request.
pub const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_KEY_PREFIX: &str = "datasync";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Connection and key-layout settings for the queue client.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Redis connection URL.
    pub redis_url: String,
    /// Prefix for every key the queue client owns.
    pub key_prefix: String,
    /// TTL applied to task and execution records.
    pub task_ttl: Duration,
    /// Blocking timeout for a single dequeue call.
    pub dequeue_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            task_ttl: DEFAULT_TASK_TTL,
            dequeue_timeout: DEFAULT_DEQUEUE_TIMEOUT,
        }
    }
}

impl QueueConfig {
    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATASYNC_REDIS_URL` (or `REDIS_URL`): store URL (default: redis://localhost:6379)
    /// - `DATASYNC_KEY_PREFIX`: key prefix (default: datasync)
    /// - `DATASYNC_TASK_TTL_SECS`: record retention in seconds (default: 604800)
    /// - `DATASYNC_DEQUEUE_TIMEOUT_SECS`: dequeue blocking timeout (default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) =
            std::env::var("DATASYNC_REDIS_URL").or_else(|_| std::env::var("REDIS_URL"))
        {
            config.redis_url = val;
        }

        if let Ok(val) = std::env::var("DATASYNC_KEY_PREFIX") {
            config.key_prefix = val;
        }

        if let Ok(val) = std::env::var("DATASYNC_TASK_TTL_SECS") {
            let secs: u64 = parse_env_value(&val, "DATASYNC_TASK_TTL_SECS")?;
            config.task_ttl = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("DATASYNC_DEQUEUE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "DATASYNC_DEQUEUE_TIMEOUT_SECS")?;
            config.dequeue_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Sets the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Sets the record TTL.
    pub fn with_task_ttl(mut self, ttl: Duration) -> Self {
        self.task_ttl = ttl;
        self
    }

    /// Sets the dequeue timeout.
    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_prefix.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "key_prefix must not be empty".to_string(),
            ));
        }
        if self.task_ttl.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "task_ttl must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for the worker process(es).
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Number of worker processes to run.
    pub num_workers: usize,
    /// Directory holding one executable per sync plugin.
    pub plugin_dir: PathBuf,
    /// Optional file of exchange holidays (one `YYYY-MM-DD` per line).
    pub holidays_file: Option<PathBuf>,
    /// How long the supervisor waits for children after a shutdown request.
    pub shutdown_timeout: Duration,
    /// Directory receiving one Prometheus text file per worker.
    pub metrics_dir: Option<PathBuf>,
    /// How often each worker rewrites its metrics file.
    pub metrics_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            plugin_dir: PathBuf::from("./plugins"),
            holidays_file: None,
            shutdown_timeout: Duration::from_secs(30),
            metrics_dir: None,
            metrics_interval: Duration::from_secs(15),
        }
    }
}

impl WorkerConfig {
    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATASYNC_WORKERS`: number of worker processes (default: 1)
    /// - `DATASYNC_PLUGIN_DIR`: plugin executables directory (default: ./plugins)
    /// - `DATASYNC_HOLIDAYS_FILE`: holiday list for the weekday calendar
    /// - `DATASYNC_SHUTDOWN_TIMEOUT_SECS`: supervisor shutdown wait (default: 30)
    /// - `DATASYNC_METRICS_DIR`: directory for per-worker metrics files
    /// - `DATASYNC_METRICS_INTERVAL_SECS`: metrics file refresh period (default: 15)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DATASYNC_WORKERS") {
            config.num_workers = parse_env_value(&val, "DATASYNC_WORKERS")?;
        }

        if let Ok(val) = std::env::var("DATASYNC_PLUGIN_DIR") {
            config.plugin_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("DATASYNC_HOLIDAYS_FILE") {
            config.holidays_file = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("DATASYNC_SHUTDOWN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "DATASYNC_SHUTDOWN_TIMEOUT_SECS")?;
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("DATASYNC_METRICS_DIR") {
            config.metrics_dir = Some(PathBuf::from(val));
        }

        if let Ok(val) = std::env::var("DATASYNC_METRICS_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "DATASYNC_METRICS_INTERVAL_SECS")?;
            config.metrics_interval = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the plugin directory.
    pub fn with_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugin_dir = dir.into();
        self
    }

    /// Sets the holidays file.
    pub fn with_holidays_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.holidays_file = Some(path.into());
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the metrics directory.
    pub fn with_metrics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.metrics_dir = Some(dir.into());
        self
    }

    /// Sets the metrics file refresh period.
    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Metrics file for `worker_id`, if a metrics directory is configured.
    ///
    /// Files end in `.prom` so a node_exporter textfile collector picks them up.
    pub fn metrics_file(&self, worker_id: &str) -> Option<PathBuf> {
        self.metrics_dir
            .as_ref()
            .map(|dir| dir.join(format!("datasync_{}.prom", worker_id)))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_workers must be at least 1".to_string(),
            ));
        }
        if self.metrics_dir.is_some() && self.metrics_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "metrics_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
