//! Error types for datasync operations.
//!
//! Defines the error types shared across subsystems:
//! - Job store access (Redis or in-memory)
//! - Record encoding/decoding at the store boundary
//! - Sync plugin invocation
//! - Trading-calendar lookups
//!
//! Subsystem-local errors (`WorkerError`, `SupervisorError`, `ConfigError`)
//! live next to the code that raises them.

use thiserror::Error;

/// Errors that can occur while talking to the shared job store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to establish a connection to the store.
    #[error("Job store connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis command failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store is not reachable.
    #[error("Job store unavailable")]
    Unavailable,
}

/// Errors that can occur while decoding a stored record.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid value '{value}' for field '{field}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("Invalid JSON in field '{field}': {source}")]
    InvalidJson {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by a sync plugin invocation.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Failed to launch plugin '{plugin}': {source}")]
    Launch {
        plugin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Plugin '{plugin}' exited with code {code:?}: {stderr}")]
    NonZeroExit {
        plugin: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Plugin '{plugin}' produced malformed output: {source}")]
    MalformedOutput {
        plugin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Plugin '{0}' is already registered")]
    DuplicatePlugin(String),

    #[error("Failed to scan plugin directory {dir}: {source}")]
    Discovery {
        dir: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

/// Errors raised by a trading-calendar lookup.
#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("Calendar lookup failed: {0}")]
    LookupFailed(String),

    #[error("Invalid holiday entry '{0}'")]
    InvalidHoliday(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_display() {
        let err = CodecError::MissingField("status");
        assert!(err.to_string().contains("status"));

        let err = CodecError::InvalidValue {
            field: "priority",
            value: "7".to_string(),
        };
        assert!(err.to_string().contains("priority"));
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn test_plugin_error_display() {
        let err = PluginError::NonZeroExit {
            plugin: "tushare_daily".to_string(),
            code: Some(2),
            stderr: "boom".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("tushare_daily"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_store_error_display() {
        assert!(StoreError::Unavailable.to_string().contains("unavailable"));
        let err = StoreError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("refused"));
    }
}
