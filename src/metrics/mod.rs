//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks finalized tasks, task durations, lane depths, running tasks and
//! active workers. Workers publish their registry by rewriting a text file
//! (see [`textfile`]); `datasync stats --prometheus` prints queue gauges.
//!
//! # Example
//!
//! ```ignore
//! use datasync::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_task("completed", "tushare_daily", 3.2);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;
pub mod textfile;

pub use collectors::MetricsCollector;
pub use self::prometheus::{export_metrics, init_metrics, init_worker_metrics};
pub use textfile::{spawn_metrics_writer, write_metrics_file};

pub use self::prometheus::{
    ACTIVE_WORKERS, BACKFILL_DATES_TOTAL, QUEUE_DEPTH, REGISTRY, TASKS_RUNNING, TASKS_TOTAL,
    TASK_DURATION,
};
