//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by datasync and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Global Prometheus registry for all datasync metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of finalized tasks, labeled by status and plugin.
pub static TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Task execution duration in seconds, labeled by plugin.
pub static TASK_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of pending tasks, labeled by lane.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of tasks currently being processed.
pub static TASKS_RUNNING: OnceLock<Gauge> = OnceLock::new();

/// Number of active workers.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Backfill dates attempted, labeled by plugin and outcome (ok/failed).
pub static BACKFILL_DATES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; calls after the first successful one are
/// no-ops.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }
    register_all(Registry::new())
}

/// Initialize metrics for one worker process.
///
/// Every exported series carries a constant `worker` label, so files written
/// by sibling workers can be scraped side by side. Same idempotence as
/// [`init_metrics`]: whichever initializer runs first wins.
pub fn init_worker_metrics(worker_id: &str) -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }
    register_all(worker_registry(worker_id)?)
}

fn worker_registry(worker_id: &str) -> Result<Registry, prometheus::Error> {
    let labels = HashMap::from([("worker".to_string(), worker_id.to_string())]);
    Registry::new_custom(None, Some(labels))
}

fn register_all(registry: Registry) -> Result<(), prometheus::Error> {

    // Task metrics
    let tasks_total = CounterVec::new(
        Opts::new("datasync_tasks_total", "Total number of finalized tasks"),
        &["status", "plugin"],
    )?;

    let task_duration = HistogramVec::new(
        HistogramOpts::new(
            "datasync_task_duration_seconds",
            "Task execution duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["plugin"],
    )?;

    let backfill_dates_total = CounterVec::new(
        Opts::new(
            "datasync_backfill_dates_total",
            "Backfill dates attempted, by outcome",
        ),
        &["plugin", "outcome"],
    )?;

    // Queue metrics
    let queue_depth = GaugeVec::new(
        Opts::new("datasync_queue_depth", "Number of pending tasks per lane"),
        &["lane"],
    )?;

    let tasks_running = Gauge::new(
        "datasync_tasks_running",
        "Number of tasks currently being processed",
    )?;

    // Worker metrics
    let active_workers = Gauge::new("datasync_active_workers", "Number of active workers")?;

    registry.register(Box::new(tasks_total.clone()))?;
    registry.register(Box::new(task_duration.clone()))?;
    registry.register(Box::new(backfill_dates_total.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(tasks_running.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // A concurrent initializer may have won the race; its metrics stay live.
    let _ = REGISTRY.set(registry);
    let _ = TASKS_TOTAL.set(tasks_total);
    let _ = TASK_DURATION.set(task_duration);
    let _ = BACKFILL_DATES_TOTAL.set(backfill_dates_total);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = TASKS_RUNNING.set(tasks_running);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
