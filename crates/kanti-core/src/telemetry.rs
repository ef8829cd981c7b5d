//! Global tracing setup with a runtime-adjustable filter.
//!
//! The control plane reads and mutates the live filter through
//! [`get_current_loglevel`] and [`set_level`] without requiring a process
//! restart, mirroring a typical admin `/logging` endpoint.

use std::sync::OnceLock;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;

static RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();
static DEFAULT_DIRECTIVES: OnceLock<String> = OnceLock::new();

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("invalid log directive: {0}")]
    InvalidDirective(#[from] tracing_subscriber::filter::ParseError),
    #[error("telemetry subsystem not initialized")]
    NotInitialized,
    #[error("failed to apply log filter reload")]
    ReloadFailed,
}

/// Installs the global subscriber. Safe to call more than once; only the
/// first call takes effect.
pub fn init() {
    if RELOAD_HANDLE.get().is_some() {
        return;
    }
    let default_directives = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter =
        EnvFilter::try_new(&default_directives).unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    if subscriber.try_init().is_ok() {
        let _ = RELOAD_HANDLE.set(handle);
        let _ = DEFAULT_DIRECTIVES.set(default_directives);
    }
}

pub fn get_current_loglevel() -> Result<String, TelemetryError> {
    let handle = RELOAD_HANDLE.get().ok_or(TelemetryError::NotInitialized)?;
    handle
        .with_current(|filter| filter.to_string())
        .map_err(|_| TelemetryError::ReloadFailed)
}

/// `reset = true` restores the directives active at [`init`] time; otherwise
/// `directives` is parsed and swapped in. Returns the resulting directive
/// string.
pub fn set_level(reset: bool, directives: &str) -> Result<String, TelemetryError> {
    let handle = RELOAD_HANDLE.get().ok_or(TelemetryError::NotInitialized)?;
    let new_directives = if reset {
        DEFAULT_DIRECTIVES
            .get()
            .cloned()
            .unwrap_or_else(|| "info".to_string())
    } else {
        directives.to_string()
    };
    let filter = EnvFilter::try_new(&new_directives)?;
    handle
        .reload(filter)
        .map_err(|_| TelemetryError::ReloadFailed)?;
    Ok(new_directives)
}
