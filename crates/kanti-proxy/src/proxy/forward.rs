//! Forwards a single HTTP exchange upstream and turns it into a
//! [`RequestDetails`] capture record.

use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use http::Uri;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1 as client_http1;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use super::ProxyShared;
use crate::capture::{Protocol, RequestDetails, body, headers, scope};
use crate::config::DEFAULT_MAX_BODY_BYTES;

static UPSTREAM_TLS_CONFIG: Lazy<Arc<ClientConfig>> = Lazy::new(|| {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    let _ = roots.add_parsable_certificates(native.certs);
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
});

/// Forwards `req` to its upstream target, capturing the exchange. `host`
/// is the already-resolved `host[:port]` to dial; `protocol` determines
/// whether the upstream leg is re-encrypted with TLS.
pub async fn forward_and_capture(
    req: Request<Incoming>,
    protocol: Protocol,
    host_header: String,
    upstream_addr: String,
    shared: Arc<ProxyShared>,
) -> Response<Full<Bytes>> {
    let started = Instant::now();
    let config = shared.config.load_full();
    let max_body = DEFAULT_MAX_BODY_BYTES;

    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or_default().to_string();

    let (mut parts, body_in) = req.into_parts();
    headers::prepare_outbound(&mut parts.headers, &config.custom_headers);
    if !parts.headers.contains_key(http::header::HOST) {
        if let Ok(value) = http::HeaderValue::from_str(&host_header) {
            parts.headers.insert(http::header::HOST, value);
        }
    }
    let captured_request_headers = headers::to_captured(&parts.headers);

    let request_body_bytes = match read_capped_body(body_in, max_body).await {
        Ok((bytes, _)) => bytes,
        Err(_) => Bytes::new(),
    };
    let request_body_text = String::from_utf8_lossy(&request_body_bytes).to_string();

    let mut record = RequestDetails::new_request(
        host_header.clone(),
        method,
        path,
        query,
        captured_request_headers,
        protocol,
        request_body_text,
    );
    let record_id = record.id;
    let should_emit = scope::in_scope(
        &host_header,
        config.save_only_in_scope,
        &config.in_scope,
        &config.out_of_scope,
    );
    if should_emit {
        shared.store.append(record.clone());
        shared.bus.emit_request(record.clone());
    }

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    parts.uri = path_and_query
        .parse::<Uri>()
        .unwrap_or_else(|_| Uri::from_static("/"));
    let outbound_req = Request::from_parts(parts, Full::new(request_body_bytes));

    let result = dial_and_send(protocol, &upstream_addr, outbound_req).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok((status, response_headers, response_body_out, captured_headers, captured_body, response_length)) => {
            if should_emit {
                let broadcast_headers = captured_headers.clone();
                let broadcast_body = captured_body.clone();
                shared.store.update_by_id(record_id, |r| {
                    r.complete_with_response(
                        status.as_u16(),
                        captured_headers,
                        captured_body,
                        response_length,
                        elapsed_ms,
                    );
                });
                record.complete_with_response(
                    status.as_u16(),
                    broadcast_headers,
                    broadcast_body,
                    response_length,
                    elapsed_ms,
                );
                shared.bus.emit_response(record);
            }
            let mut builder = Response::builder().status(status);
            if let Some(map) = builder.headers_mut() {
                *map = response_headers;
            }
            builder
                .body(Full::new(response_body_out))
                .unwrap_or_else(|_| empty_response(StatusCode::INTERNAL_SERVER_ERROR))
        }
        Err(err) => {
            if should_emit {
                shared
                    .store
                    .update_by_id(record_id, |r| r.complete_with_error(err.to_string(), elapsed_ms));
                record.complete_with_error(err.to_string(), elapsed_ms);
                shared.bus.emit_response(record);
            }
            empty_response(StatusCode::BAD_GATEWAY)
        }
    }
}

type DialResult = (
    StatusCode,
    http::HeaderMap,
    Bytes,
    std::collections::BTreeMap<String, Vec<String>>,
    Option<String>,
    u64,
);

async fn dial_and_send(
    protocol: Protocol,
    upstream_addr: &str,
    req: Request<Full<Bytes>>,
) -> anyhow::Result<DialResult> {
    let tcp = TcpStream::connect(upstream_addr).await?;

    let response = match protocol {
        Protocol::Http => send_over(TokioIo::new(tcp), req).await?,
        Protocol::Https => {
            let hostname = upstream_addr
                .rsplit_once(':')
                .map(|(h, _)| h)
                .unwrap_or(upstream_addr)
                .to_string();
            let server_name = ServerName::try_from(hostname)?;
            let connector = TlsConnector::from(UPSTREAM_TLS_CONFIG.clone());
            let tls_stream = connector.connect(server_name, tcp).await?;
            send_over(TokioIo::new(tls_stream), req).await?
        }
    };

    let (parts, body_out) = response.into_parts();
    let content_type = parts
        .headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let content_encoding = parts
        .headers
        .get(http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let (raw_bytes, response_length) = read_capped_body(body_out, DEFAULT_MAX_BODY_BYTES).await?;

    let captured_body = if body::is_textual(content_type.as_deref()) {
        let decoded = body::decompress(&raw_bytes, content_encoding.as_deref())
            .await
            .unwrap_or_default();
        Some(String::from_utf8_lossy(&decoded).to_string())
    } else {
        None
    };

    let captured_headers = headers::to_captured(&parts.headers);

    let mut forward_headers = parts.headers;
    forward_headers.remove(http::header::CONTENT_LENGTH);
    forward_headers.remove(http::header::TRANSFER_ENCODING);

    Ok((
        parts.status,
        forward_headers,
        raw_bytes,
        captured_headers,
        captured_body,
        response_length,
    ))
}

async fn send_over<IO>(io: TokioIo<IO>, req: Request<Full<Bytes>>) -> anyhow::Result<Response<Incoming>>
where
    IO: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, conn) = client_http1::handshake(io).await?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            tracing::debug!(error = %err, "upstream connection closed with error");
        }
    });
    Ok(sender.send_request(req).await?)
}

/// Reads at most `cap` bytes from `body`, stopping as soon as that many
/// have been accumulated. Returns the bytes read and their count.
async fn read_capped_body<B>(mut body: B, cap: usize) -> anyhow::Result<(Bytes, u64)>
where
    B: http_body::Body<Data = Bytes> + Unpin,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let mut buf = BytesMut::new();
    while buf.len() < cap {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Some(chunk) = frame.data_ref() {
                    let remaining = cap - buf.len();
                    let take = remaining.min(chunk.len());
                    buf.extend_from_slice(&chunk[..take]);
                    if buf.len() >= cap {
                        break;
                    }
                }
            }
            Some(Err(err)) => return Err(err.into()),
            None => break,
        }
    }
    let len = buf.len() as u64;
    Ok((buf.freeze(), len))
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .expect("static response is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_capped_body_stops_at_the_cap() {
        let body = Full::new(Bytes::from(vec![b'x'; 100]));
        let (bytes, len) = read_capped_body(body, 10).await.unwrap();
        assert_eq!(bytes.len(), 10);
        assert_eq!(len, 10);
    }

    #[tokio::test]
    async fn read_capped_body_returns_everything_under_the_cap() {
        let body = Full::new(Bytes::from_static(b"hello"));
        let (bytes, len) = read_capped_body(body, 1024).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
        assert_eq!(len, 5);
    }
}
