//! Periodic metrics export to a Prometheus text file.
//!
//! Workers have no HTTP listener; each one rewrites its own `.prom` file for a
//! node_exporter textfile collector (or any scraper that reads files).

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::export_metrics;
use crate::scheduler::ShutdownSignal;

/// Writes the current metrics snapshot to `path`.
///
/// The text goes to a sibling temp file first and is then renamed over
/// `path`, so readers never see a partial file.
pub async fn write_metrics_file(path: &Path) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, export_metrics()).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Rewrites `path` every `interval` until `shutdown` fires.
///
/// The caller writes the final snapshot once the worker has stopped.
pub fn spawn_metrics_writer(
    path: PathBuf,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait() => break,
            }
            if let Err(e) = write_metrics_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to write metrics file");
            }
        }
        debug!(path = %path.display(), "Metrics writer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;
    use crate::scheduler::shutdown_channel;

    #[tokio::test]
    async fn test_write_metrics_file() {
        init_metrics().expect("init");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("datasync_worker-0.prom");

        write_metrics_file(&path).await.expect("write");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("datasync_active_workers"));
        assert!(!dir.path().join("datasync_worker-0.prom.tmp").exists());
    }

    #[tokio::test]
    async fn test_metrics_writer_runs_until_shutdown() {
        init_metrics().expect("init");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("datasync_worker-1.prom");
        let (handle, signal) = shutdown_channel();

        let writer = spawn_metrics_writer(path.clone(), Duration::from_millis(10), signal);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(path.exists());

        handle.trigger();
        tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer should stop on shutdown")
            .expect("join");
    }
}
