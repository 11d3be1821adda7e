//! datasync: Redis-backed priority task queue and worker pool for
//! financial data-sync plugins.
//!
//! Producers submit tasks through [`scheduler::QueueClient`]; workers claim
//! them in priority order, run the named plugin for the right trading
//! date(s), and record the outcome on the task and its execution.

// Core modules
pub mod calendar;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod plugin;
pub mod scheduler;
pub mod store;

// Re-export commonly used error types
pub use error::{CalendarError, CodecError, PluginError, StoreError};
