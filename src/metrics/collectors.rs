//! Recording helpers for datasync metrics.
//!
//! `MetricsCollector` wraps the raw Prometheus statics so call sites never
//! deal with label ordering or uninitialized metrics. Every method is a no-op
//! until `init_metrics()` has run.

use super::prometheus::{
    ACTIVE_WORKERS, BACKFILL_DATES_TOTAL, QUEUE_DEPTH, TASKS_RUNNING, TASKS_TOTAL, TASK_DURATION,
};
use crate::scheduler::queue::QueueStats;
use crate::scheduler::task::Priority;

/// Metrics collector for queue and worker activity.
///
/// # Example
///
/// ```ignore
/// use datasync::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
///
/// collector.task_started();
/// collector.record_task("completed", "tushare_daily", 12.5);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Records a finalized task and marks it no longer running.
    ///
    /// # Arguments
    ///
    /// * `status` - Final task status (`completed` or `failed`)
    /// * `plugin` - Plugin the task ran
    /// * `duration_secs` - Wall-clock time spent on the task
    pub fn record_task(&self, status: &str, plugin: &str, duration_secs: f64) {
        if let Some(tasks_total) = TASKS_TOTAL.get() {
            tasks_total.with_label_values(&[status, plugin]).inc();
        }

        if let Some(task_duration) = TASK_DURATION.get() {
            task_duration
                .with_label_values(&[plugin])
                .observe(duration_secs);
        }

        if let Some(running) = TASKS_RUNNING.get() {
            running.dec();
        }

        tracing::trace!(
            status = status,
            plugin = plugin,
            duration_secs = duration_secs,
            "Recorded task metric"
        );
    }

    /// Marks a task as picked up by this process.
    pub fn task_started(&self) {
        if let Some(running) = TASKS_RUNNING.get() {
            running.inc();
        }
    }

    /// Records the outcome of one backfill date.
    pub fn record_backfill_date(&self, plugin: &str, success: bool) {
        if let Some(counter) = BACKFILL_DATES_TOTAL.get() {
            let outcome = if success { "ok" } else { "failed" };
            counter.with_label_values(&[plugin, outcome]).inc();
        }
    }

    pub fn worker_started(&self) {
        if let Some(workers) = ACTIVE_WORKERS.get() {
            workers.inc();
        }
    }

    pub fn worker_stopped(&self) {
        if let Some(workers) = ACTIVE_WORKERS.get() {
            workers.dec();
        }
    }

    /// Mirrors a queue stats snapshot into the depth and running gauges.
    pub fn set_queue_stats(&self, stats: &QueueStats) {
        if let Some(depth) = QUEUE_DEPTH.get() {
            for (priority, count) in [
                (Priority::High, stats.high),
                (Priority::Normal, stats.normal),
                (Priority::Low, stats.low),
            ] {
                depth
                    .with_label_values(&[priority.lane()])
                    .set(count as f64);
            }
        }

        if let Some(running) = TASKS_RUNNING.get() {
            running.set(stats.running as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_collector_without_init_does_not_panic() {
        let collector = MetricsCollector::new();
        collector.record_task("completed", "p", 1.0);
        collector.record_backfill_date("p", false);
        collector.worker_started();
        collector.worker_stopped();
    }

    #[test]
    fn test_queue_stats_export() {
        init_metrics().expect("init");
        let collector = MetricsCollector::new();
        collector.set_queue_stats(&QueueStats {
            high: 2,
            normal: 5,
            low: 1,
            running: 3,
        });

        let text = export_metrics();
        assert!(text.contains(r#"datasync_queue_depth{lane="high"} 2"#));
        assert!(text.contains(r#"datasync_queue_depth{lane="normal"} 5"#));
    }

    #[test]
    fn test_record_task_labels() {
        init_metrics().expect("init");
        let collector = MetricsCollector::new();
        collector.task_started();
        collector.record_task("failed", "label_check_plugin", 2.0);

        let text = export_metrics();
        assert!(text.contains(r#"plugin="label_check_plugin""#));
        assert!(text.contains(r#"status="failed""#));
    }
}
