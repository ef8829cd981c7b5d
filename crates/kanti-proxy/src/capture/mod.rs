//! Request/response capture: the pipeline that turns a forwarded HTTP
//! exchange into a [`RequestDetails`] record.

pub mod body;
pub mod headers;
pub mod scope;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

static NEXT_ID: AtomicI64 = AtomicI64::new(1);

/// Allocates the next monotonically-increasing exchange id.
pub fn next_id() -> i64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

/// A single captured request/response exchange. Created at request time
/// with the response-side fields absent, then completed in place once the
/// upstream response (or a terminal error) arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetails {
    pub id: i64,
    pub host: String,
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: BTreeMap<String, Vec<String>>,
    pub timestamp: chrono::DateTime<Utc>,
    pub protocol: Protocol,
    pub request_body: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequestDetails {
    pub fn new_request(
        host: String,
        method: String,
        path: String,
        query: String,
        headers: BTreeMap<String, Vec<String>>,
        protocol: Protocol,
        request_body: String,
    ) -> Self {
        Self {
            id: next_id(),
            host,
            method,
            path,
            query,
            headers,
            timestamp: Utc::now(),
            protocol,
            request_body,
            status: None,
            response_headers: None,
            response_body: None,
            response_length: None,
            response_time_ms: None,
            error: None,
        }
    }

    pub fn complete_with_response(
        &mut self,
        status: u16,
        headers: BTreeMap<String, Vec<String>>,
        body: Option<String>,
        response_length: u64,
        response_time_ms: u64,
    ) {
        self.status = Some(status);
        self.response_headers = Some(headers);
        self.response_body = body;
        self.response_length = Some(response_length);
        self.response_time_ms = Some(response_time_ms);
    }

    pub fn complete_with_error(&mut self, error: impl Into<String>, response_time_ms: u64) {
        self.status = Some(0);
        self.response_length = Some(0);
        self.response_time_ms = Some(response_time_ms);
        self.error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_strictly_increasing() {
        let a = next_id();
        let b = next_id();
        assert!(b > a);
    }

    #[test]
    fn completing_with_error_sets_zero_status() {
        let mut rec = RequestDetails::new_request(
            "example.com".into(),
            "GET".into(),
            "/".into(),
            String::new(),
            BTreeMap::new(),
            Protocol::Https,
            String::new(),
        );
        rec.complete_with_error("connect timed out", 12);
        assert_eq!(rec.status, Some(0));
        assert_eq!(rec.error.as_deref(), Some("connect timed out"));
    }
}
