//! Per-connection dispatch: plain HTTP forwarding, or `CONNECT` hijacking
//! into either a transparent tunnel or a TLS-intercepted session.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;

use super::ProxyShared;
use super::forward::forward_and_capture;
use crate::capture::Protocol;

pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<ProxyShared>,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: Request<Incoming>| {
        let shared = shared.clone();
        async move { handle_request(req, peer, shared).await }
    });

    http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await?;
    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    peer: SocketAddr,
    shared: Arc<ProxyShared>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() == hyper::Method::CONNECT {
        return Ok(handle_connect(req, peer, shared));
    }

    let host_header = req
        .uri()
        .authority()
        .map(|a| a.to_string())
        .or_else(|| {
            req.headers()
                .get(hyper::header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .unwrap_or_default();
    let upstream_addr = resolve_upstream_addr(&host_header, 80);
    let hostname = strip_port(&host_header);

    Ok(forward_and_capture(req, Protocol::Http, hostname, upstream_addr, shared).await)
}

fn handle_connect(req: Request<Incoming>, peer: SocketAddr, shared: Arc<ProxyShared>) -> Response<Full<Bytes>> {
    let Some(authority) = req.uri().authority().cloned() else {
        return simple_response(StatusCode::BAD_REQUEST, "CONNECT target missing authority");
    };
    let target = authority.to_string();
    let hostname = authority.host().to_string();
    let ssl_interception = shared.config.load().ssl_interception;

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let io = TokioIo::new(upgraded);
                let result = if ssl_interception {
                    serve_intercepted_tls(io, hostname.clone(), target.clone(), shared).await
                } else {
                    tunnel_transparent(io, &target).await
                };
                if let Err(err) = result {
                    tracing::debug!(host = %hostname, %peer, error = %err, "connect tunnel ended with error");
                }
            }
            Err(err) => tracing::debug!(error = %err, "CONNECT upgrade failed"),
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .body(Full::new(Bytes::new()))
        .expect("static response is valid")
}

async fn serve_intercepted_tls(
    io: TokioIo<hyper::upgrade::Upgraded>,
    hostname: String,
    target: String,
    shared: Arc<ProxyShared>,
) -> anyhow::Result<()> {
    let (chain, key) = shared.ca.issue(&hostname)?;
    let mut server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)?;
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    let acceptor = TlsAcceptor::from(Arc::new(server_config));
    let tls_stream = acceptor.accept(io).await?;
    let tls_io = TokioIo::new(tls_stream);

    let upstream_addr = resolve_upstream_addr(&target, 443);
    let service = service_fn(move |req: Request<Incoming>| {
        let shared = shared.clone();
        let hostname = hostname.clone();
        let upstream_addr = upstream_addr.clone();
        async move {
            Ok::<_, Infallible>(
                forward_and_capture(req, Protocol::Https, hostname, upstream_addr, shared).await,
            )
        }
    });

    http1::Builder::new().serve_connection(tls_io, service).await?;
    Ok(())
}

async fn tunnel_transparent(io: TokioIo<hyper::upgrade::Upgraded>, target: &str) -> anyhow::Result<()> {
    let mut upstream = TcpStream::connect(target).await?;
    let mut client = io;
    tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    Ok(())
}

/// `authority` may or may not carry a port; appends `default_port` when
/// absent.
fn resolve_upstream_addr(authority: &str, default_port: u16) -> String {
    if authority.rsplit_once(':').is_some_and(|(_, p)| p.parse::<u16>().is_ok()) {
        authority.to_string()
    } else {
        format!("{authority}:{default_port}")
    }
}

fn strip_port(authority: &str) -> String {
    authority
        .rsplit_once(':')
        .filter(|(_, p)| p.parse::<u16>().is_ok())
        .map(|(h, _)| h.to_string())
        .unwrap_or_else(|| authority.to_string())
}

fn simple_response(status: StatusCode, msg: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(msg.to_string())))
        .expect("static response is valid")
}
