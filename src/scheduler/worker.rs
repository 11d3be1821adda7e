//! Task worker.
//!
//! A `Worker` is a single polling loop: dequeue one task, run its plugin,
//! finalize it, repeat. There is no concurrency inside a worker; parallelism
//! comes from running several worker processes (see `supervisor`).
//!
//! # Strategies
//!
//! - **Incremental** (and `full` without dates): run the plugin once for the
//!   latest valid trading date.
//! - **Backfill** (and `full` with dates): run the plugin once per listed date,
//!   in order. A failed date is logged and skipped; only successful dates'
//!   records are counted.
//!
//! # Failure Taxonomy
//!
//! - Unknown plugin: the task fails.
//! - Plugin reports a non-success status (or a malformed result): the task
//!   fails with the plugin's own diagnostic.
//! - Calendar lookup failure: absorbed by `latest_trading_date`.
//! - One backfill date failing: absorbed, the task continues.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::queue::QueueClient;
use super::shutdown::ShutdownSignal;
use super::task::{truncate_message, TaskRecord, TaskStatus, MAX_ERROR_MESSAGE_LEN};
use crate::calendar::{latest_trading_date, TradingCalendar};
use crate::error::PluginError;
use crate::metrics::MetricsCollector;
use crate::plugin::{PluginRegistry, PluginRunResult, SyncPlugin};

/// Why a task failed.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Plugin '{0}' not found")]
    PluginNotFound(String),

    #[error("Plugin '{plugin}' reported failure: {message}")]
    PluginReported {
        plugin: String,
        message: String,
        detail: Option<String>,
    },

    #[error("Plugin '{plugin}' returned no load step record count")]
    MalformedResult { plugin: String },

    #[error("Invalid trade date '{0}'")]
    InvalidTradeDate(String),

    #[error("Plugin execution failed: {0}")]
    Plugin(#[from] PluginError),
}

impl WorkerError {
    /// Text stored on the failed task: the error chain plus any detail the
    /// plugin attached, truncated to `MAX_ERROR_MESSAGE_LEN` characters.
    pub fn failure_message(&self) -> String {
        let mut message = error_chain(self);
        if let WorkerError::PluginReported {
            detail: Some(detail),
            ..
        } = self
        {
            message.push('\n');
            message.push_str(detail);
        }
        truncate_message(&message, MAX_ERROR_MESSAGE_LEN)
    }
}

/// Renders an error followed by each `source()` not already in the text.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Parses a trade date written as `YYYY-MM-DD` or `YYYYMMDD`.
pub fn normalize_trade_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .ok()
}

/// Outcome of one processed task.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedTask {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub records_processed: u64,
    pub error_message: Option<String>,
}

type TodayFn = dyn Fn() -> NaiveDate + Send + Sync;

/// A single task-processing loop.
pub struct Worker {
    id: String,
    queue: Arc<QueueClient>,
    plugins: Arc<PluginRegistry>,
    calendar: Arc<dyn TradingCalendar>,
    shutdown: ShutdownSignal,
    dequeue_timeout: Duration,
    today: Arc<TodayFn>,
    metrics: MetricsCollector,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<QueueClient>,
        plugins: Arc<PluginRegistry>,
        calendar: Arc<dyn TradingCalendar>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let dequeue_timeout = queue.config().dequeue_timeout;
        Self {
            id: id.into(),
            queue,
            plugins,
            calendar,
            shutdown,
            dequeue_timeout,
            today: Arc::new(|| Local::now().date_naive()),
            metrics: MetricsCollector::new(),
        }
    }

    /// Overrides how long each dequeue blocks.
    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    /// Overrides the source of "today" for incremental tasks.
    pub fn with_clock(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Arc::new(today);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Main worker loop.
    ///
    /// Runs until shutdown is requested. The flag is checked between tasks;
    /// the blocking dequeue is never cut short, since dropping a pop the store
    /// already answered would lose the task.
    pub async fn run(&self) {
        info!(worker_id = %self.id, plugins = self.plugins.len(), "Worker started");
        self.metrics.worker_started();

        while !self.shutdown.is_shutdown() {
            if self.run_once().await.is_none() {
                debug!(worker_id = %self.id, "No tasks available");
            }
        }

        self.metrics.worker_stopped();
        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Claims and processes at most one task.
    ///
    /// Returns `None` if nothing was claimed within the dequeue timeout.
    pub async fn run_once(&self) -> Option<ProcessedTask> {
        let task = self.queue.dequeue(self.dequeue_timeout).await?;
        Some(self.process_task(task).await)
    }

    /// Executes a claimed task and finalizes it.
    pub async fn process_task(&self, task: TaskRecord) -> ProcessedTask {
        let task_id = task.task_id;
        let start_time = Instant::now();

        info!(
            worker_id = %self.id,
            task_id = %task_id,
            plugin = %task.plugin_name,
            task_type = %task.task_type,
            dates = task.trade_dates.len(),
            "Processing task"
        );
        self.metrics.task_started();

        let outcome = match self.execute(&task).await {
            Ok(records) => {
                if !self.queue.complete_task(task_id, records).await {
                    warn!(worker_id = %self.id, task_id = %task_id, "Task completion was not recorded");
                }
                info!(
                    worker_id = %self.id,
                    task_id = %task_id,
                    records = records,
                    duration_ms = start_time.elapsed().as_millis() as u64,
                    "Task completed"
                );
                ProcessedTask {
                    task_id,
                    status: TaskStatus::Completed,
                    records_processed: records,
                    error_message: None,
                }
            }
            Err(e) => {
                let message = e.failure_message();
                error!(
                    worker_id = %self.id,
                    task_id = %task_id,
                    plugin = %task.plugin_name,
                    error = %message,
                    "Task failed"
                );
                if !self.queue.fail_task(task_id, &message).await {
                    warn!(worker_id = %self.id, task_id = %task_id, "Task failure was not recorded");
                }
                ProcessedTask {
                    task_id,
                    status: TaskStatus::Failed,
                    records_processed: 0,
                    error_message: Some(message),
                }
            }
        };

        if let Some(execution_id) = task.execution_id {
            if self.queue.update_execution_stats(execution_id).await.is_none() {
                warn!(
                    worker_id = %self.id,
                    execution_id = %execution_id,
                    "Execution stats were not refreshed"
                );
            }
        }

        self.metrics.record_task(
            outcome.status.as_str(),
            &task.plugin_name,
            start_time.elapsed().as_secs_f64(),
        );

        outcome
    }

    async fn execute(&self, task: &TaskRecord) -> Result<u64, WorkerError> {
        let plugin = self
            .plugins
            .get(&task.plugin_name)
            .ok_or_else(|| WorkerError::PluginNotFound(task.plugin_name.clone()))?;

        if task.uses_backfill_strategy() {
            Ok(self.run_backfill(task, plugin.as_ref()).await)
        } else {
            self.run_incremental(task, plugin.as_ref()).await
        }
    }

    async fn run_incremental(
        &self,
        task: &TaskRecord,
        plugin: &dyn SyncPlugin,
    ) -> Result<u64, WorkerError> {
        let trade_date = latest_trading_date(self.calendar.as_ref(), (self.today)()).await;
        debug!(
            worker_id = %self.id,
            task_id = %task.task_id,
            trade_date = %trade_date,
            "Running incremental sync"
        );

        let result = plugin.run(trade_date).await?;
        let records = check_result(plugin.name(), result)?;

        self.queue
            .update_progress(task.task_id, 100.0, records)
            .await;
        Ok(records)
    }

    /// Replays every listed date, skipping failures.
    ///
    /// Stops early (keeping the partial total) once shutdown is requested.
    async fn run_backfill(&self, task: &TaskRecord, plugin: &dyn SyncPlugin) -> u64 {
        let total = task.trade_dates.len();
        let mut records = 0u64;
        let mut failed_dates = 0usize;

        for (index, raw_date) in task.trade_dates.iter().enumerate() {
            if self.shutdown.is_shutdown() {
                warn!(
                    worker_id = %self.id,
                    task_id = %task.task_id,
                    done = index,
                    total = total,
                    "Shutdown requested, stopping backfill early"
                );
                break;
            }

            let outcome = match normalize_trade_date(raw_date) {
                Some(date) => match plugin.run(date).await {
                    Ok(result) => check_result(plugin.name(), result),
                    Err(e) => Err(WorkerError::from(e)),
                },
                None => Err(WorkerError::InvalidTradeDate(raw_date.clone())),
            };

            match outcome {
                Ok(count) => {
                    records += count;
                    self.metrics.record_backfill_date(plugin.name(), true);
                    debug!(task_id = %task.task_id, trade_date = %raw_date, records = count, "Backfill date done");
                }
                Err(e) => {
                    failed_dates += 1;
                    self.metrics.record_backfill_date(plugin.name(), false);
                    warn!(
                        worker_id = %self.id,
                        task_id = %task.task_id,
                        trade_date = %raw_date,
                        error = %error_chain(&e),
                        "Backfill date failed, skipping"
                    );
                }
            }

            let progress = (index + 1) as f64 / total as f64 * 100.0;
            self.queue
                .update_progress(task.task_id, progress, records)
                .await;
        }

        if failed_dates > 0 {
            warn!(
                worker_id = %self.id,
                task_id = %task.task_id,
                failed_dates = failed_dates,
                total = total,
                "Backfill finished with skipped dates"
            );
        }
        records
    }
}

/// Validates a plugin result and extracts its load count.
fn check_result(plugin: &str, result: PluginRunResult) -> Result<u64, WorkerError> {
    if !result.is_success() {
        return Err(WorkerError::PluginReported {
            plugin: plugin.to_string(),
            message: result
                .error
                .unwrap_or_else(|| format!("status '{}'", result.status)),
            detail: result.error_detail,
        });
    }
    result.load_records().ok_or_else(|| WorkerError::MalformedResult {
        plugin: plugin.to_string(),
    })
}
