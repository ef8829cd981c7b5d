//! The loopback-only HTTP control plane: lifecycle, config, readout, and
//! the server-sent event stream.

mod routes;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use kanti_core::signal::ShutdownWatcher;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::proxy::{ProxyServer, ProxyShared};

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<ProxyServer>,
    pub shared: Arc<ProxyShared>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/proxy/start", post(routes::start))
        .route("/api/proxy/stop", post(routes::stop))
        .route("/api/proxy/status", get(routes::status))
        .route(
            "/api/proxy/config",
            get(routes::get_config).post(routes::post_config),
        )
        .route("/api/proxy/requests", get(routes::requests))
        .route("/api/proxy/clear", post(routes::clear))
        .route("/api/events", get(routes::events))
        .route("/api/logging", get(routes::logging))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds and serves the control plane. Always loopback-only, regardless of
/// what interface the proxy itself listens on. Shuts down gracefully once
/// `shutdown` is signaled.
pub async fn serve(ipc_port: u16, state: AppState, mut shutdown: ShutdownWatcher) -> anyhow::Result<()> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), ipc_port);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "control plane listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.signaled().await })
        .await?;
    Ok(())
}
