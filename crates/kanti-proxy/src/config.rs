//! Process-level and live proxy configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Assembled once at startup from CLI flags. Immutable for the process
/// lifetime; the proxy's own listen port is carried separately in
/// [`ProxyConfig`] since it can change across restarts without restarting
/// the whole process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub ipc_port: u16,
    pub proxy_port: u16,
}

impl AppConfig {
    pub fn certificates_dir(&self) -> PathBuf {
        self.data_dir.join("certificates")
    }
}

/// Live, hot-swappable proxy configuration. Held behind an
/// [`kanti_core::arc::Atomic`] so the capture pipeline never blocks on the
/// control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    pub port: u16,
    pub ssl_interception: bool,
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
    pub save_only_in_scope: bool,
    #[serde(default)]
    pub in_scope: Vec<String>,
    #[serde(default)]
    pub out_of_scope: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ca_certificate_path: Option<String>,
}

impl ProxyConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ssl_interception: true,
            custom_headers: BTreeMap::new(),
            save_only_in_scope: false,
            in_scope: Vec::new(),
            out_of_scope: Vec::new(),
            ca_certificate_path: None,
        }
    }

    /// Applies a partial update received over the control plane. Only
    /// fields present in `patch` change; `port` only takes effect on the
    /// next proxy start.
    pub fn merge(&mut self, patch: ProxyConfigPatch) {
        if let Some(port) = patch.port {
            self.port = port;
        }
        if let Some(v) = patch.ssl_interception {
            self.ssl_interception = v;
        }
        if let Some(v) = patch.custom_headers {
            self.custom_headers = v;
        }
        if let Some(v) = patch.save_only_in_scope {
            self.save_only_in_scope = v;
        }
        if let Some(v) = patch.in_scope {
            self.in_scope = v;
        }
        if let Some(v) = patch.out_of_scope {
            self.out_of_scope = v;
        }
    }

    pub fn with_ca_path(mut self, path: &Path) -> Self {
        self.ca_certificate_path = Some(path.display().to_string());
        self
    }
}

/// A partial [`ProxyConfig`] as received from `POST /api/proxy/config`.
/// Unknown fields are ignored by `serde`'s default behavior.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfigPatch {
    pub port: Option<u16>,
    pub ssl_interception: Option<bool>,
    pub custom_headers: Option<BTreeMap<String, String>>,
    pub save_only_in_scope: Option<bool>,
    pub in_scope: Option<Vec<String>>,
    pub out_of_scope: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStatus {
    pub is_running: bool,
    pub port: u16,
    pub ca_certificate_path: String,
    pub build: kanti_core::version::BuildInfo,
}

pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_STORE_CAPACITY: usize = 1000;
pub const DEFAULT_LEAF_CACHE_CAPACITY: usize = 100;
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 100;
pub const DEFAULT_OBSERVER_CHANNEL_DEPTH: usize = 100;
