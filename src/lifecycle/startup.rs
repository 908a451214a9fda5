//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging, metrics, signer and store in dependency order
//! - Bind the listener last (traffic only when ready)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{load_config, ConfigError, ProxyConfig};
use crate::http::{HttpServer, ServerError};
use crate::lifecycle::Shutdown;
use crate::signing::{RequestSigner, SigningError};
use crate::store::{MemoryKv, StoreError};

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("signer: {0}")]
    Signer(#[from] SigningError),

    #[error("cache snapshot: {0}")]
    Store(#[from] StoreError),

    #[error("server: {0}")]
    Server(#[from] ServerError),

    #[error("listener: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything `main` needs to serve traffic.
pub struct Prepared {
    pub config: ProxyConfig,
    pub server: HttpServer,
    pub listener: TcpListener,
}

/// Load the config file, or defaults when no path is given.
pub fn load(path: Option<&Path>) -> Result<ProxyConfig, StartupError> {
    match path {
        Some(path) => Ok(load_config(path)?),
        None => Ok(ProxyConfig::default()),
    }
}

/// Build the signer, store and server, then bind the listener.
pub async fn prepare(config: ProxyConfig) -> Result<Prepared, StartupError> {
    let signer = RequestSigner::from_config(&config.signing)?;
    tracing::info!(signer = %signer.address(), "Outbound requests will be signed");

    let kv = match config.idempotency.snapshot_path.as_ref().map(PathBuf::from) {
        Some(path) => MemoryKv::load_from_file(&path)?,
        None => MemoryKv::new(),
    };

    let server = HttpServer::new(config.clone(), signer, kv)?;
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    Ok(Prepared {
        config,
        server,
        listener,
    })
}

/// Spawn the signal listener for `shutdown`.
pub fn install_signal_handlers(shutdown: &Shutdown) {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        crate::lifecycle::signals::wait_for_signal(&shutdown).await;
    });
}
