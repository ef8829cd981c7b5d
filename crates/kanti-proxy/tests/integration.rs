//! Black-box control-plane tests: real HTTP requests, over a real bound
//! socket, against the exact `axum::Router` the process serves.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use kanti_proxy::capture::{Protocol, RequestDetails};
use kanti_proxy::config::AppConfig;
use kanti_proxy::control::{self, AppState};
use kanti_proxy::App;
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Boots a full `App` against a scratch data dir and serves its control
/// router on an OS-assigned loopback port. The returned `AppState` is the
/// exact state backing the running router, for tests that need to reach
/// the store/bus directly rather than through a route. The returned
/// `tempfile::TempDir` must be kept alive for the duration of the test (it
/// owns the CA files).
async fn spawn_app() -> (String, reqwest::Client, AppState, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig {
        data_dir: dir.path().to_path_buf(),
        ipc_port: 0,
        proxy_port: 0,
    };
    let app = App::init(config).unwrap();
    let state = app.state.clone();
    let router = control::router(app.state);

    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = reqwest::Client::new();
    (format!("http://{addr}"), client, state, dir)
}

#[tokio::test]
async fn status_reports_build_info_and_ca_path() {
    let (base, client, _state, _dir) = spawn_app().await;
    let resp = client
        .get(format!("{base}/api/proxy/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["isRunning"], false);
    assert!(body["data"]["caCertificatePath"].as_str().unwrap().ends_with("ca.crt"));
    assert!(!body["data"]["build"]["version"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn config_patch_round_trips_through_get() {
    let (base, client, _state, _dir) = spawn_app().await;

    let patch = json!({
        "saveOnlyInScope": true,
        "inScope": ["*.example.com"],
        "customHeaders": {"x-test": "1"},
    });
    let resp = client
        .post(format!("{base}/api/proxy/config"))
        .json(&patch)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{base}/api/proxy/config"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["saveOnlyInScope"], true);
    assert_eq!(body["data"]["inScope"][0], "*.example.com");
    assert_eq!(body["data"]["customHeaders"]["x-test"], "1");
}

#[tokio::test]
async fn start_then_stop_flips_running_status() {
    let (base, client, _state, _dir) = spawn_app().await;

    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .unwrap();
    let proxy_port = listener.local_addr().unwrap().port();
    drop(listener);

    let resp = client
        .post(format!("{base}/api/proxy/start"))
        .json(&json!({ "port": proxy_port }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["isRunning"], true);
    assert_eq!(body["data"]["port"], proxy_port);

    let resp = client
        .post(format!("{base}/api/proxy/start"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);

    let resp = client.post(format!("{base}/api/proxy/stop")).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["isRunning"], false);

    let resp = client.post(format!("{base}/api/proxy/stop")).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn requests_and_clear_reflect_the_capture_store() {
    let (base, client, state, _dir) = spawn_app().await;

    let record = RequestDetails::new_request(
        "example.com".to_string(),
        "GET".to_string(),
        "/widgets".to_string(),
        String::new(),
        BTreeMap::new(),
        Protocol::Https,
        String::new(),
    );
    state.shared.store.append(record);

    let resp = client.get(format!("{base}/api/proxy/requests")).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["host"], "example.com");

    let resp = client.post(format!("{base}/api/proxy/clear")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client.get(format!("{base}/api/proxy/requests")).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn events_stream_delivers_emitted_records() {
    let (base, client, state, _dir) = spawn_app().await;

    let mut resp = client
        .get(format!("{base}/api/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // The handler subscribes synchronously before the SSE body starts being
    // polled, so by the time `.send()` above resolves the observer is
    // already registered; emitting now won't race the read below.
    let record = RequestDetails::new_request(
        "example.com".to_string(),
        "GET".to_string(),
        "/widgets".to_string(),
        String::new(),
        BTreeMap::new(),
        Protocol::Https,
        String::new(),
    );
    state.shared.bus.emit_request(record);
    state.shared.bus.flush_now();

    let mut chunk = Vec::new();
    loop {
        let bytes = resp.chunk().await.unwrap();
        let Some(bytes) = bytes else { break };
        chunk.extend_from_slice(&bytes);
        if chunk.windows(2).any(|w| w == b"\n\n") {
            break;
        }
    }
    let text = String::from_utf8(chunk).unwrap();
    assert!(text.starts_with("data:"));
    assert!(text.contains("example.com"));
}
