//! Accepts proxy connections and hands each one to the capture pipeline.

pub mod connect;
pub mod forward;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use kanti_core::arc::Atomic;
use kanti_core::signal::{ShutdownTrigger, ShutdownWatcher};
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::ca::CertificateAuthority;
use crate::config::ProxyConfig;
use crate::eventbus::EventBus;
use crate::store::CaptureStore;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("proxy server already running")]
    AlreadyRunning,
    #[error("proxy server not running")]
    NotRunning,
    #[error("failed to bind proxy listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// State shared by every connection handler: live config, the CA, the
/// capture store, and the event bus.
pub struct ProxyShared {
    pub config: Atomic<ProxyConfig>,
    pub ca: Arc<CertificateAuthority>,
    pub store: Arc<CaptureStore>,
    pub bus: Arc<EventBus>,
}

struct RunningState {
    trigger: ShutdownTrigger,
    task: JoinHandle<()>,
    port: u16,
}

/// Owns the proxy's listener lifecycle. Start/stop are serialized against
/// each other through `handle`.
pub struct ProxyServer {
    shared: Arc<ProxyShared>,
    running: AtomicBool,
    handle: AsyncMutex<Option<RunningState>>,
}

impl ProxyServer {
    pub fn new(shared: Arc<ProxyShared>) -> Arc<Self> {
        Arc::new(Self {
            shared,
            running: AtomicBool::new(false),
            handle: AsyncMutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn current_port(&self) -> Option<u16> {
        self.handle.lock().await.as_ref().map(|s| s.port)
    }

    pub async fn start(self: &Arc<Self>, port: u16) -> Result<(), ProxyError> {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            return Err(ProxyError::AlreadyRunning);
        }
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| ProxyError::Bind { port, source })?;
        let (trigger, watcher) = ShutdownTrigger::new();
        let shared = self.shared.clone();
        let task = tokio::spawn(accept_loop(listener, shared, watcher));
        self.running.store(true, Ordering::SeqCst);
        *guard = Some(RunningState { trigger, task, port });
        Ok(())
    }

    pub async fn stop(self: &Arc<Self>) -> Result<(), ProxyError> {
        let mut guard = self.handle.lock().await;
        let Some(state) = guard.take() else {
            return Err(ProxyError::NotRunning);
        };
        state.trigger.shutdown();
        let _ = state.task.await;
        self.shared.bus.flush_now();
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<ProxyShared>, mut watcher: ShutdownWatcher) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let shared = shared.clone();
                        tokio::spawn(async move {
                            if let Err(err) = connect::handle_connection(stream, peer, shared).await {
                                tracing::debug!(%peer, error = %err, "connection ended with error");
                            }
                        });
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                    }
                }
            }
            _ = watcher.signaled() => {
                tracing::info!("proxy listener shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_BATCH_INTERVAL_MS, DEFAULT_BATCH_SIZE, DEFAULT_LEAF_CACHE_CAPACITY, DEFAULT_STORE_CAPACITY};
    use arc_swap::ArcSwap;
    use std::time::Duration;

    fn test_shared(dir: &std::path::Path) -> Arc<ProxyShared> {
        let ca = CertificateAuthority::load_or_generate(dir, DEFAULT_LEAF_CACHE_CAPACITY).unwrap();
        Arc::new(ProxyShared {
            config: Arc::new(ArcSwap::from_pointee(ProxyConfig::new(0))),
            ca: Arc::new(ca),
            store: Arc::new(CaptureStore::new(DEFAULT_STORE_CAPACITY)),
            bus: EventBus::new(DEFAULT_BATCH_SIZE, Duration::from_millis(DEFAULT_BATCH_INTERVAL_MS)),
        })
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let server = ProxyServer::new(test_shared(dir.path()));
        server.start(0).await.unwrap();
        assert!(server.is_running());
        let err = server.start(0).await.unwrap_err();
        assert!(matches!(err, ProxyError::AlreadyRunning));
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stopping_when_not_running_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let server = ProxyServer::new(test_shared(dir.path()));
        let err = server.stop().await.unwrap_err();
        assert!(matches!(err, ProxyError::NotRunning));
    }

    #[tokio::test]
    async fn start_then_stop_resets_running_flag() {
        let dir = tempfile::tempdir().unwrap();
        let server = ProxyServer::new(test_shared(dir.path()));
        server.start(0).await.unwrap();
        server.stop().await.unwrap();
        assert!(!server.is_running());
    }
}
