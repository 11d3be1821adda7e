//! Cooperative shutdown.
//!
//! A [`ShutdownHandle`] flips a `watch` channel that every [`ShutdownSignal`]
//! observes. Workers check the signal between tasks and between backfill
//! dates; nothing interrupts a plugin call in flight.

use std::io::Read;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

/// Creates a connected handle/signal pair.
pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

/// Requests shutdown.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Flips the flag. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// A new signal observing this handle.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observes a shutdown request.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&mut self) {
        // An error means every handle is gone; nobody can trigger any more.
        if self.rx.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Resolves on Ctrl-C, or on SIGTERM where supported.
pub async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler, listening for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C");
    }
}

/// Triggers `handle` on SIGINT/SIGTERM and, when `watch_stdin` is set, when
/// stdin reaches EOF.
///
/// The stdin watch is how a supervisor asks its children to stop: it closes
/// their stdin pipes. The read runs on a plain thread so a pending read never
/// holds up runtime shutdown.
pub fn install_signal_handlers(handle: ShutdownHandle, watch_stdin: bool) {
    if watch_stdin {
        let stdin_handle = handle.clone();
        let spawned = std::thread::Builder::new()
            .name("stdin-watch".to_string())
            .spawn(move || {
                let mut sink = [0u8; 256];
                let mut stdin = std::io::stdin().lock();
                loop {
                    match stdin.read(&mut sink) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => continue,
                    }
                }
                info!("Stdin closed by supervisor, shutting down");
                stdin_handle.trigger();
            });
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to start stdin watcher");
        }
    }

    tokio::spawn(async move {
        wait_for_termination().await;
        handle.trigger();
    });
}
