//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all proxy handler
//! - Wire up middleware (tracing, timeout, request ID, proxy tokens)
//! - Bind server to listener and serve until shutdown
//! - Apply config reloads to the running orchestrator
//! - Run store housekeeping (sweeper, snapshot on shutdown)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, Request},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use url::Url;

use crate::config::ProxyConfig;
use crate::http::request::{buffer_request, RequestIdExt, RequestIdLayer};
use crate::idempotency::{Orchestrator, OrchestratorPolicy};
use crate::observability::metrics;
use crate::origin::HttpOrigin;
use crate::security::proxy_token::{proxy_token_middleware, AuthPolicy};
use crate::signing::RequestSigner;
use crate::store::MemoryKv;

/// The orchestrator as deployed: in-memory store, HTTP origin.
pub type ProxyOrchestrator = Orchestrator<MemoryKv, HttpOrigin>;

/// Errors building the server from configuration.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid origin base url: {0}")]
    OriginUrl(#[from] url::ParseError),

    #[error("invalid idempotency key header: {0}")]
    KeyHeader(String),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: ProxyOrchestrator,
    pub key_header: HeaderName,
    pub max_body_bytes: usize,
}

/// HTTP server for the idempotency proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    kv: MemoryKv,
    orchestrator: ProxyOrchestrator,
    auth: Arc<ArcSwap<AuthPolicy>>,
}

impl HttpServer {
    /// Create a new HTTP server around an existing store.
    pub fn new(config: ProxyConfig, signer: RequestSigner, kv: MemoryKv) -> Result<Self, ServerError> {
        let base_url = Url::parse(&config.origin.base_url)?;
        let key_header = HeaderName::from_bytes(config.idempotency.key_header.as_bytes())
            .map_err(|e| ServerError::KeyHeader(e.to_string()))?;

        let origin = HttpOrigin::new(
            base_url,
            Duration::from_millis(config.origin.connect_timeout_ms),
            config.origin.max_response_bytes,
        );
        let policy = OrchestratorPolicy::from_config(&config, signer);
        let orchestrator = Orchestrator::new(kv.clone(), origin, policy);
        let auth = Arc::new(ArcSwap::from_pointee(AuthPolicy::from_config(&config.auth)));

        let state = AppState {
            orchestrator: orchestrator.clone(),
            key_header,
            max_body_bytes: config.listener.max_body_bytes,
        };

        let router = Self::build_router(&config, state, auth.clone());
        Ok(Self {
            router,
            config,
            kv,
            orchestrator,
            auth,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState, auth: Arc<ArcSwap<AuthPolicy>>) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(middleware::from_fn_with_state(auth, proxy_token_middleware))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(RequestIdLayer)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Validated configs arriving on `config_updates` replace the runtime
    /// policy. Returns after `shutdown` fires and in-flight requests drain.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            origin = %self.config.origin.base_url,
            "HTTP server starting"
        );

        let sweeper = tokio::spawn(self.kv.clone().run_sweeper(
            Duration::from_secs(self.config.idempotency.sweep_interval_secs),
            shutdown.resubscribe(),
        ));

        let reloader = tokio::spawn(apply_config_updates(
            self.orchestrator.clone(),
            self.auth.clone(),
            config_updates,
            shutdown.resubscribe(),
        ));

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        let _ = sweeper.await;
        let _ = reloader.await;

        if let Some(path) = self.config.idempotency.snapshot_path.as_ref().map(PathBuf::from) {
            if let Err(e) = self.kv.save_to_file(&path) {
                tracing::error!(path = %path.display(), error = %e, "Failed to save cache snapshot");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Swap runtime policy whenever a new validated config arrives.
///
/// A config whose signer key cannot be resolved is rejected as a whole.
async fn apply_config_updates(
    orchestrator: ProxyOrchestrator,
    auth: Arc<ArcSwap<AuthPolicy>>,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(config) = update else { break };
                match RequestSigner::from_config(&config.signing) {
                    Ok(signer) => {
                        orchestrator.update_policy(OrchestratorPolicy::from_config(&config, signer));
                        auth.store(Arc::new(AuthPolicy::from_config(&config.auth)));
                        tracing::info!("Configuration reloaded");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Rejected config reload, keeping current policy");
                    }
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Main proxy handler.
/// Buffers the request and hands it to the orchestrator.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request.request_id().unwrap_or("unknown").to_string();
    let method = request.method().to_string();

    let incoming = match buffer_request(request, &state.key_header, state.max_body_bytes).await {
        Ok(incoming) => incoming,
        Err(e) => {
            tracing::info!(request_id = %request_id, error = %e, "Rejected request");
            metrics::record_request(&method, e.status_code().as_u16(), e.code(), start_time);
            return e.into_response();
        }
    };

    tracing::debug!(
        request_id = %request_id,
        method = %incoming.method,
        path = %incoming.path_and_query,
        keyed = incoming.idempotency_key.is_some(),
        "Handling request"
    );

    match state.orchestrator.handle(incoming).await {
        Ok(replay) => {
            let outcome = if replay.replayed { "replayed" } else { "forwarded" };
            tracing::debug!(request_id = %request_id, status = %replay.status, outcome, "Request complete");
            metrics::record_request(&method, replay.status.as_u16(), outcome, start_time);
            replay.into_response()
        }
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Request failed");
            metrics::record_request(&method, e.status_code().as_u16(), e.code(), start_time);
            e.into_response()
        }
    }
}
