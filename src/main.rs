//! Idempotency reverse proxy.
//!
//! ```text
//!   client ──▶ request id ─▶ proxy token ─▶ orchestrator ──hit──▶ replay
//!                                               │ miss
//!                                               ▼
//!                                  single-flight ─▶ sign ─▶ origin
//!                                               │
//!                                               ▼
//!                                   put-if-absent (MemoryKv) ─▶ reply
//! ```

use std::path::PathBuf;

use clap::Parser;

use idempotent_proxy::config::watcher::ConfigWatcher;
use idempotent_proxy::lifecycle::startup;
use idempotent_proxy::observability::{logging, metrics};
use idempotent_proxy::Shutdown;

#[derive(Parser, Debug)]
#[command(name = "idempotent-proxy", version, about = "Idempotency reverse proxy")]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "IDEMPOTENT_PROXY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = startup::load(cli.config.as_deref())?;

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "idempotent-proxy starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        origin = %config.origin.base_url,
        entry_ttl_secs = config.idempotency.entry_ttl_secs,
        origin_timeout_ms = config.origin.timeout_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let prepared = startup::prepare(config).await?;

    // The watcher handle must outlive the server.
    let (_watcher, config_updates) = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => (None, tokio::sync::mpsc::unbounded_channel().1),
    };

    let shutdown = Shutdown::new();
    startup::install_signal_handlers(&shutdown);

    prepared
        .server
        .run(prepared.listener, config_updates, shutdown.subscribe())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
