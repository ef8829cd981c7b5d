use std::path::PathBuf;

use clap::Parser;
use kanti_core::signal::{ShutdownTrigger, wait_for_shutdown_signal};
use kanti_proxy::App;
use kanti_proxy::config::AppConfig;

/// Intercepting HTTP/HTTPS proxy with a loopback control plane.
#[derive(Debug, Parser)]
#[command(name = "kanti-proxy", version)]
struct Cli {
    /// Directory for persisted CA material and other on-disk state.
    #[arg(long = "data", value_name = "DIR", default_value = "./data")]
    data: PathBuf,

    /// Port the control plane listens on, bound to 127.0.0.1 only.
    #[arg(long = "ipc-port", value_name = "PORT", default_value_t = 9090)]
    ipc_port: u16,

    /// Port the intercepting proxy listens on at startup.
    #[arg(long = "proxy-port", value_name = "PORT", default_value_t = 8080)]
    proxy_port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kanti_core::telemetry::init();

    let cli = Cli::parse();
    let config = AppConfig {
        data_dir: cli.data,
        ipc_port: cli.ipc_port,
        proxy_port: cli.proxy_port,
    };

    let app = App::init(config)?;

    let (trigger, watcher) = ShutdownTrigger::new();
    let signal_trigger = trigger.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal(&signal_trigger).await;
    });

    if let Err(err) = app.run(watcher).await {
        tracing::error!(error = %err, "kanti-proxy exited with an error");
        std::process::exit(1);
    }

    Ok(())
}
