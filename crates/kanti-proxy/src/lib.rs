//! Intercepting HTTP/HTTPS proxy: capture pipeline, bounded store, event
//! bus, and the loopback control plane that drives them.

pub mod ca;
pub mod capture;
pub mod config;
pub mod control;
pub mod eventbus;
pub mod proxy;
pub mod store;

use std::sync::Arc;

use arc_swap::ArcSwap;
use kanti_core::signal::ShutdownWatcher;

use crate::ca::CertificateAuthority;
use crate::config::{AppConfig, ProxyConfig};
use crate::control::AppState;
use crate::eventbus::EventBus;
use crate::proxy::{ProxyServer, ProxyShared};
use crate::store::CaptureStore;

/// Wires together every long-lived component from a resolved [`AppConfig`].
pub struct App {
    pub config: AppConfig,
    pub state: AppState,
}

impl App {
    pub fn init(config: AppConfig) -> anyhow::Result<Self> {
        let ca = CertificateAuthority::load_or_generate(
            &config.certificates_dir(),
            self::config::DEFAULT_LEAF_CACHE_CAPACITY,
        )?;
        let shared = Arc::new(ProxyShared {
            config: Arc::new(ArcSwap::from_pointee(
                ProxyConfig::new(config.proxy_port).with_ca_path(ca.certificate_path()),
            )),
            ca: Arc::new(ca),
            store: Arc::new(CaptureStore::new(self::config::DEFAULT_STORE_CAPACITY)),
            bus: EventBus::new(
                self::config::DEFAULT_BATCH_SIZE,
                std::time::Duration::from_millis(self::config::DEFAULT_BATCH_INTERVAL_MS),
            ),
        });
        let proxy = ProxyServer::new(shared.clone());

        Ok(Self {
            config,
            state: AppState { proxy, shared },
        })
    }

    /// Starts the proxy listener at the configured port and serves the
    /// control plane until `shutdown` is signaled, then stops the proxy too.
    pub async fn run(self, shutdown: ShutdownWatcher) -> anyhow::Result<()> {
        let proxy_port = self.state.shared.config.load().port;
        self.state.proxy.start(proxy_port).await?;
        let proxy = self.state.proxy.clone();
        let result = control::serve(self.config.ipc_port, self.state, shutdown).await;
        if proxy.is_running() {
            let _ = proxy.stop().await;
        }
        result
    }
}
