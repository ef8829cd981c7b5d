//! Header sanitization, browser-like defaults, and custom-header injection
//! applied to every outbound request before it is forwarded upstream.

use std::collections::BTreeMap;

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};

/// Headers never forwarded upstream; they either leak proxy topology or
/// carry proxy-specific auth that the upstream has no business seeing.
const STRIPPED: &[&str] = &[
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-real-ip",
    "via",
    "forwarded",
    "proxy-connection",
    "proxy-authorization",
];

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const DEFAULT_ACCEPT_ENCODING: &str = "gzip, br, deflate";

/// Strips hop-sensitive headers, fills in browser-like defaults for
/// anything absent, then applies `custom_headers` (which always wins).
pub fn prepare_outbound(headers: &mut HeaderMap, custom_headers: &BTreeMap<String, String>) {
    for name in STRIPPED {
        headers.remove(*name);
    }

    insert_if_absent(headers, "user-agent", DEFAULT_USER_AGENT);
    insert_if_absent(headers, "accept", DEFAULT_ACCEPT);
    insert_if_absent(headers, "accept-language", DEFAULT_ACCEPT_LANGUAGE);
    insert_if_absent(headers, "accept-encoding", DEFAULT_ACCEPT_ENCODING);

    for (name, value) in custom_headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
}

fn insert_if_absent(headers: &mut HeaderMap, name: &'static str, value: &str) {
    let name = HeaderName::from_static(name);
    if !headers.contains_key(&name) {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    }
}

/// Converts an [`http::HeaderMap`] into the multi-valued, case-normalized
/// map used in captured records.
pub fn to_captured(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers.iter() {
        let value = value.to_str().unwrap_or_default().to_string();
        out.entry(name.as_str().to_ascii_lowercase())
            .or_default()
            .push(value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_proxy_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("proxy-authorization", HeaderValue::from_static("secret"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        prepare_outbound(&mut headers, &BTreeMap::new());
        assert!(!headers.contains_key("proxy-authorization"));
        assert!(!headers.contains_key("x-forwarded-for"));
    }

    #[test]
    fn fills_defaults_only_when_absent() {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("custom-agent/1.0"));
        prepare_outbound(&mut headers, &BTreeMap::new());
        assert_eq!(headers.get("user-agent").unwrap(), "custom-agent/1.0");
        assert!(headers.contains_key("accept-encoding"));
    }

    #[test]
    fn custom_headers_override_stripped_names() {
        let mut headers = HeaderMap::new();
        let mut custom = BTreeMap::new();
        custom.insert("Proxy-Authorization".to_string(), "kept".to_string());
        prepare_outbound(&mut headers, &custom);
        assert_eq!(headers.get("proxy-authorization").unwrap(), "kept");
    }
}
