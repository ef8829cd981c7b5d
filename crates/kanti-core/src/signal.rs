//! Cooperative shutdown signaling shared by every listener in the process.

use tokio::sync::watch;

/// Handle held by whoever decides the process should stop.
#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Handle held by a task that needs to know when shutdown was requested.
#[derive(Clone)]
pub struct ShutdownWatcher {
    rx: watch::Receiver<bool>,
}

impl ShutdownTrigger {
    pub fn new() -> (Self, ShutdownWatcher) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownWatcher { rx })
    }

    /// Signal shutdown to every outstanding watcher. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn watch(&self) -> ShutdownWatcher {
        ShutdownWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownWatcher {
    /// Resolves once shutdown has been signaled. Safe to call from multiple tasks.
    pub async fn signaled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn has_signaled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Waits for Ctrl+C (or SIGTERM on unix) and trips `trigger`.
pub async fn wait_for_shutdown_signal(trigger: &ShutdownTrigger) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    trigger.shutdown();
}
