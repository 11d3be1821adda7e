//! Command-line interface for datasync.
//!
//! Provides the worker entry point plus queue and execution inspection
//! commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
