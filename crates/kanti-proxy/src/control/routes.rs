use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};

use crate::config::{ProxyConfigPatch, ProxyStatus};
use crate::proxy::ProxyError;

use super::AppState;

#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> Envelope<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(Envelope::ok(data))).into_response()
}

fn err(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(Envelope::<()>::err(message))).into_response()
}

fn status_from_error(e: &ProxyError) -> StatusCode {
    match e {
        ProxyError::AlreadyRunning | ProxyError::NotRunning => StatusCode::INTERNAL_SERVER_ERROR,
        ProxyError::Bind { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn proxy_status(state: &AppState) -> ProxyStatus {
    let config = state.shared.config.load();
    ProxyStatus {
        is_running: state.proxy.is_running(),
        port: state.proxy.current_port().await.unwrap_or(config.port),
        ca_certificate_path: state.shared.ca.certificate_path().display().to_string(),
        build: kanti_core::version::BuildInfo::current(),
    }
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub port: Option<u16>,
}

pub async fn start(State(state): State<AppState>, body: Option<Json<StartRequest>>) -> Response {
    let port = body
        .and_then(|Json(req)| req.port)
        .unwrap_or_else(|| state.shared.config.load().port);

    match state.proxy.start(port).await {
        Ok(()) => {
            let mut cfg = (*state.shared.config.load_full()).clone();
            cfg.port = port;
            state.shared.config.store(Arc::new(cfg));
            ok(proxy_status(&state).await)
        }
        Err(e) => err(status_from_error(&e), e.to_string()),
    }
}

pub async fn stop(State(state): State<AppState>) -> Response {
    match state.proxy.stop().await {
        Ok(()) => ok(proxy_status(&state).await),
        Err(e) => err(status_from_error(&e), e.to_string()),
    }
}

pub async fn status(State(state): State<AppState>) -> Response {
    ok(proxy_status(&state).await)
}

pub async fn get_config(State(state): State<AppState>) -> Response {
    let mut cfg = (*state.shared.config.load_full()).clone();
    cfg.ca_certificate_path = Some(state.shared.ca.certificate_path().display().to_string());
    ok(cfg)
}

pub async fn post_config(State(state): State<AppState>, Json(patch): Json<ProxyConfigPatch>) -> Response {
    let mut cfg = (*state.shared.config.load_full()).clone();
    cfg.merge(patch);
    state.shared.config.store(Arc::new(cfg.clone()));
    cfg.ca_certificate_path = Some(state.shared.ca.certificate_path().display().to_string());
    ok(cfg)
}

pub async fn requests(State(state): State<AppState>) -> Response {
    ok(state.shared.store.snapshot())
}

pub async fn clear(State(state): State<AppState>) -> Response {
    state.shared.store.clear();
    ok(serde_json::json!({ "success": true }))
}

pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let observer = state.shared.bus.subscribe(crate::config::DEFAULT_OBSERVER_CHANNEL_DEPTH);
    let stream = stream::unfold(observer, |mut observer| async move {
        let event = observer.recv().await?;
        let payload = serde_json::to_string(&event).unwrap_or_default();
        Some((Ok(SseEvent::default().data(payload)), observer))
    });
    Sse::new(stream)
}

#[derive(Debug, Deserialize)]
pub struct LoggingQuery {
    level: Option<String>,
    reset: Option<bool>,
}

pub async fn logging(axum::extract::Query(query): axum::extract::Query<LoggingQuery>) -> Response {
    let result = if query.reset.unwrap_or(false) {
        kanti_core::telemetry::set_level(true, "")
    } else if let Some(level) = query.level.as_deref() {
        kanti_core::telemetry::set_level(false, level)
    } else {
        kanti_core::telemetry::get_current_loglevel()
    };

    match result {
        Ok(level) => (StatusCode::OK, level).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}
