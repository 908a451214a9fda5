//! Runtime policy of the orchestrator, derived from configuration.

use std::collections::BTreeSet;
use std::time::Duration;

use axum::http::StatusCode;

use crate::config::schema::{default_definitive_statuses, ProxyConfig};
use crate::signing::RequestSigner;

/// Origin statuses whose responses are final and may be cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitiveStatuses(BTreeSet<u16>);

impl DefinitiveStatuses {
    pub fn new(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self(statuses.into_iter().collect())
    }

    pub fn contains(&self, status: StatusCode) -> bool {
        self.0.contains(&status.as_u16())
    }
}

impl Default for DefinitiveStatuses {
    fn default() -> Self {
        Self::new(default_definitive_statuses())
    }
}

/// Per-request knobs. Swapped as a whole on config reload.
#[derive(Debug, Clone)]
pub struct OrchestratorPolicy {
    pub signer: RequestSigner,
    pub entry_ttl: Duration,
    pub origin_timeout: Duration,
    pub definitive: DefinitiveStatuses,
    pub require_key_for_safe_methods: bool,
    pub refresh_on_replay: bool,
}

impl OrchestratorPolicy {
    /// Policy with default knobs around `signer`.
    pub fn new(signer: RequestSigner) -> Self {
        Self {
            signer,
            entry_ttl: Duration::from_secs(86_400),
            origin_timeout: Duration::from_secs(10),
            definitive: DefinitiveStatuses::default(),
            require_key_for_safe_methods: false,
            refresh_on_replay: false,
        }
    }

    /// Build from a validated configuration.
    pub fn from_config(config: &ProxyConfig, signer: RequestSigner) -> Self {
        Self {
            signer,
            entry_ttl: Duration::from_secs(config.idempotency.entry_ttl_secs),
            origin_timeout: Duration::from_millis(config.origin.timeout_ms),
            definitive: DefinitiveStatuses::new(config.idempotency.definitive_statuses.iter().copied()),
            require_key_for_safe_methods: config.idempotency.require_key_for_safe_methods,
            refresh_on_replay: config.idempotency.refresh_on_replay,
        }
    }

    pub fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    pub fn with_origin_timeout(mut self, timeout: Duration) -> Self {
        self.origin_timeout = timeout;
        self
    }

    pub fn with_refresh_on_replay(mut self, refresh: bool) -> Self {
        self.refresh_on_replay = refresh;
        self
    }

    pub fn with_required_keys(mut self, required: bool) -> Self {
        self.require_key_for_safe_methods = required;
        self
    }
}
