//! Executable-backed plugins.
//!
//! A `CommandPlugin` runs `{path} --trade-date YYYY-MM-DD` and reads the JSON
//! plugin result from the process's stdout. Log output on stdout is tolerated
//! as long as the result object is the last non-empty line.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{PluginRunResult, SyncPlugin};
use crate::error::PluginError;

/// Maximum stderr characters carried into an error.
const STDERR_TAIL_CHARS: usize = 1000;

/// Adapter running a plugin executable per trade date.
pub struct CommandPlugin {
    name: String,
    path: PathBuf,
}

impl CommandPlugin {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_output(&self, stdout: &str) -> Result<PluginRunResult, PluginError> {
        let whole = stdout.trim();
        match serde_json::from_str(whole) {
            Ok(result) => Ok(result),
            Err(source) => {
                let last_line = whole.lines().rev().map(str::trim).find(|l| !l.is_empty());
                match last_line.map(serde_json::from_str::<PluginRunResult>) {
                    Some(Ok(result)) => Ok(result),
                    _ => Err(PluginError::MalformedOutput {
                        plugin: self.name.clone(),
                        source,
                    }),
                }
            }
        }
    }
}

#[async_trait]
impl SyncPlugin for CommandPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, trade_date: NaiveDate) -> Result<PluginRunResult, PluginError> {
        let start = Instant::now();
        let date_arg = trade_date.format("%Y-%m-%d").to_string();

        let mut cmd = Command::new(&self.path);
        cmd.arg("--trade-date")
            .arg(&date_arg)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group: a terminal Ctrl-C reaches the worker, not the plugin.
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(plugin = %self.name, trade_date = %date_arg, "Launching plugin");

        let output = cmd.output().await.map_err(|source| PluginError::Launch {
            plugin: self.name.clone(),
            source,
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(PluginError::NonZeroExit {
                plugin: self.name.clone(),
                code: output.status.code(),
                stderr: tail(stderr.trim(), STDERR_TAIL_CHARS),
            });
        }
        if !stderr.trim().is_empty() {
            warn!(plugin = %self.name, stderr = %tail(stderr.trim(), STDERR_TAIL_CHARS), "Plugin wrote to stderr");
        }

        let result = self.parse_output(&String::from_utf8_lossy(&output.stdout))?;
        debug!(
            plugin = %self.name,
            trade_date = %date_arg,
            status = %result.status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Plugin finished"
        );
        Ok(result)
    }
}

/// Last `max_chars` characters of `text`.
fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
