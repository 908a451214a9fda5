//! Error taxonomy for the idempotency engine.
//!
//! Subsystems keep their own error types (`StoreError`, `OriginError`,
//! `SigningError`); they are folded into [`ProxyError`] at the orchestrator
//! boundary. Signing failures are mapped explicitly where they occur.
//! `ProxyError` is `Clone` because a single in-flight outcome is handed to
//! every waiter of that flight.

use thiserror::Error;

use crate::origin::OriginError;
use crate::store::StoreError;

/// Errors surfaced to the inbound caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    /// Missing or malformed idempotency key, or an unreadable body.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The idempotency key was already used for a different payload.
    #[error("idempotency key was already used with a different request payload")]
    IdempotencyConflict,

    /// Signature or token verification failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The origin did not answer within the configured deadline.
    #[error("origin did not respond within {0} ms")]
    UpstreamTimeout(u64),

    /// The origin could not be reached or gave a non-final answer.
    #[error("origin unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The cache store failed; no result is fabricated.
    #[error("cache store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ProxyError {
    /// Whether the caller may retry with the same idempotency key.
    ///
    /// Retryable errors never leave a cache entry behind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProxyError::UpstreamTimeout(_)
                | ProxyError::UpstreamUnavailable(_)
                | ProxyError::StoreUnavailable(_)
        )
    }

    /// Stable machine-readable code used in error bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) => "invalid_request",
            ProxyError::IdempotencyConflict => "idempotency_conflict",
            ProxyError::Unauthorized(_) => "unauthorized",
            ProxyError::UpstreamTimeout(_) => "upstream_timeout",
            ProxyError::UpstreamUnavailable(_) => "upstream_unavailable",
            ProxyError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl From<StoreError> for ProxyError {
    fn from(e: StoreError) -> Self {
        ProxyError::StoreUnavailable(e.to_string())
    }
}

impl From<OriginError> for ProxyError {
    fn from(e: OriginError) -> Self {
        ProxyError::UpstreamUnavailable(e.to_string())
    }
}

/// Result type for request handling.
pub type ProxyResult<T> = Result<T, ProxyError>;
