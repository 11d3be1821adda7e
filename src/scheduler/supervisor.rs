//! Worker process supervisor.
//!
//! Runs `N` worker processes, each a re-execution of a worker command with
//! its own `--worker-id`. The supervisor keeps every child's stdin pipe open;
//! closing it is the stop request. Stragglers still alive after the shutdown
//! timeout are killed.

use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;

/// Errors that can occur while supervising worker processes.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to resolve current executable: {0}")]
    CurrentExe(#[source] std::io::Error),

    #[error("Failed to spawn worker process {worker_id}: {source}")]
    Spawn {
        worker_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{failed} of {total} worker processes exited unsuccessfully")]
    ChildFailed { failed: usize, total: usize },

    #[error("{killed} worker processes did not stop within {timeout:?} and were killed")]
    ShutdownTimeout { killed: usize, timeout: Duration },
}

/// The command each worker process runs, minus its `--worker-id`.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Re-executes the running binary with `args`.
    pub fn current_exe<I, S>(args: I) -> Result<Self, SupervisorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let program = std::env::current_exe().map_err(SupervisorError::CurrentExe)?;
        Ok(Self::new(program, args))
    }

    fn build(&self, worker_id: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--worker-id")
            .arg(worker_id)
            .stdin(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// How one worker process ended.
#[derive(Debug, Clone)]
pub struct ChildExit {
    pub worker_id: String,
    pub status: Option<ExitStatus>,
    pub killed: bool,
}

impl ChildExit {
    pub fn is_clean(&self) -> bool {
        !self.killed && self.status.map(|s| s.success()).unwrap_or(false)
    }
}

/// Launches and waits for a fixed number of worker processes.
pub struct Supervisor {
    command: WorkerCommand,
    num_workers: usize,
    shutdown_timeout: Duration,
}

impl Supervisor {
    pub fn new(command: WorkerCommand, config: &WorkerConfig) -> Self {
        Self {
            command,
            num_workers: config.num_workers,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Runs until every child exits, stopping them on SIGINT/SIGTERM.
    pub async fn run(&self) -> Result<Vec<ChildExit>, SupervisorError> {
        self.run_until(super::shutdown::wait_for_termination()).await
    }

    /// Runs until every child exits, stopping them once `shutdown` resolves.
    ///
    /// Succeeds only if every child exited with status 0 and none had to be
    /// killed.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<Vec<ChildExit>, SupervisorError>
    where
        F: Future<Output = ()>,
    {
        let (kill_tx, _) = watch::channel(false);
        let mut stdins: Vec<ChildStdin> = Vec::with_capacity(self.num_workers);
        let mut children = JoinSet::new();

        for index in 0..self.num_workers {
            let worker_id = format!("worker-{index}");
            let mut child = self
                .command
                .build(&worker_id)
                .spawn()
                .map_err(|source| SupervisorError::Spawn {
                    worker_id: worker_id.clone(),
                    source,
                })?;

            info!(worker_id = %worker_id, pid = ?child.id(), "Worker process started");
            if let Some(stdin) = child.stdin.take() {
                stdins.push(stdin);
            }
            children.spawn(watch_child(worker_id, child, kill_tx.subscribe()));
        }

        info!(workers = self.num_workers, "Supervisor running");

        tokio::pin!(shutdown);
        let mut kill_at: Option<Instant> = None;
        let mut kill_sent = false;
        let mut exits = Vec::with_capacity(self.num_workers);

        loop {
            let deadline = kill_at.unwrap_or_else(Instant::now);
            tokio::select! {
                joined = children.join_next() => match joined {
                    Some(Ok(exit)) => {
                        if exit.is_clean() {
                            info!(worker_id = %exit.worker_id, "Worker process exited");
                        } else {
                            error!(
                                worker_id = %exit.worker_id,
                                status = ?exit.status,
                                killed = exit.killed,
                                "Worker process exited unsuccessfully"
                            );
                        }
                        exits.push(exit);
                    }
                    Some(Err(e)) => error!(error = %e, "Worker watch task failed"),
                    None => break,
                },
                _ = &mut shutdown, if kill_at.is_none() => {
                    info!(
                        remaining = children.len(),
                        timeout_secs = self.shutdown_timeout.as_secs(),
                        "Shutdown requested, stopping worker processes"
                    );
                    // Dropping the pipes delivers EOF to every child.
                    stdins.clear();
                    kill_at = Some(Instant::now() + self.shutdown_timeout);
                }
                _ = tokio::time::sleep_until(deadline), if kill_at.is_some() && !kill_sent => {
                    warn!(remaining = children.len(), "Shutdown timeout elapsed, killing worker processes");
                    kill_tx.send_replace(true);
                    kill_sent = true;
                }
            }
        }

        let total = exits.len();
        let killed = exits.iter().filter(|e| e.killed).count();
        let failed = exits.iter().filter(|e| !e.is_clean()).count();

        if killed > 0 {
            return Err(SupervisorError::ShutdownTimeout {
                killed,
                timeout: self.shutdown_timeout,
            });
        }
        if failed > 0 {
            return Err(SupervisorError::ChildFailed { failed, total });
        }

        info!(workers = total, "All worker processes exited cleanly");
        Ok(exits)
    }
}

async fn watch_child(
    worker_id: String,
    mut child: Child,
    mut kill_rx: watch::Receiver<bool>,
) -> ChildExit {
    tokio::select! {
        status = child.wait() => ChildExit {
            worker_id,
            status: status.ok(),
            killed: false,
        },
        true = kill_requested(&mut kill_rx) => {
            if let Err(e) = child.start_kill() {
                warn!(worker_id = %worker_id, error = %e, "Failed to kill worker process");
            }
            let status = child.wait().await.ok();
            ChildExit {
                worker_id,
                status,
                killed: true,
            }
        }
    }
}

/// Resolves to `true` once a kill is requested, `false` if it never can be.
async fn kill_requested(kill_rx: &mut watch::Receiver<bool>) -> bool {
    kill_rx.wait_for(|kill| *kill).await.is_ok()
}
