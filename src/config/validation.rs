//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, statuses in range)
//! - Check that addresses, URLs and keys parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use alloy::primitives::Address;
use axum::http::HeaderName;
use url::Url;

use crate::config::schema::ProxyConfig;
use crate::signing::RequestSigner;

/// One semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be > 0"));
    }

    match Url::parse(&config.origin.base_url) {
        Ok(url) if url.scheme() != "http" => errors.push(ValidationError::new(
            "origin.base_url",
            format!("unsupported scheme '{}', only http is supported", url.scheme()),
        )),
        Ok(url) if url.query().is_some() => errors.push(ValidationError::new(
            "origin.base_url",
            "must not carry a query string",
        )),
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::new("origin.base_url", e.to_string())),
    }
    if config.origin.timeout_ms == 0 {
        errors.push(ValidationError::new("origin.timeout_ms", "must be > 0"));
    }
    if config.origin.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("origin.connect_timeout_ms", "must be > 0"));
    }
    if config.origin.max_response_bytes == 0 {
        errors.push(ValidationError::new("origin.max_response_bytes", "must be > 0"));
    }

    let idem = &config.idempotency;
    if HeaderName::from_bytes(idem.key_header.as_bytes()).is_err() {
        errors.push(ValidationError::new(
            "idempotency.key_header",
            format!("'{}' is not a valid header name", idem.key_header),
        ));
    }
    if idem.entry_ttl_secs == 0 {
        errors.push(ValidationError::new("idempotency.entry_ttl_secs", "must be > 0"));
    }
    if idem.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("idempotency.sweep_interval_secs", "must be > 0"));
    }
    if idem.definitive_statuses.is_empty() {
        errors.push(ValidationError::new(
            "idempotency.definitive_statuses",
            "must list at least one status",
        ));
    }
    for status in &idem.definitive_statuses {
        if !(100..=599).contains(status) {
            errors.push(ValidationError::new(
                "idempotency.definitive_statuses",
                format!("{} is not an HTTP status", status),
            ));
        } else if *status >= 500 || *status == 401 || *status == 403 || *status == 429 {
            errors.push(ValidationError::new(
                "idempotency.definitive_statuses",
                format!("{} is transient and must not be cached", status),
            ));
        }
    }

    if let Some(key) = &config.signing.private_key {
        if RequestSigner::from_private_key(key).is_err() {
            errors.push(ValidationError::new("signing.private_key", "not a valid secp256k1 key"));
        }
    }
    if config.signing.signature_max_age_secs == 0 {
        errors.push(ValidationError::new("signing.signature_max_age_secs", "must be > 0"));
    }

    if config.auth.enabled && config.auth.trusted_agents.is_empty() {
        errors.push(ValidationError::new(
            "auth.trusted_agents",
            "must not be empty when auth is enabled",
        ));
    }
    for agent in &config.auth.trusted_agents {
        if agent.parse::<Address>().is_err() {
            errors.push(ValidationError::new(
                "auth.trusted_agents",
                format!("'{}' is not an address", agent),
            ));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&ProxyConfig::default()), Ok(()));
    }

    #[test]
    fn test_reports_all_errors() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "nowhere".to_string();
        config.origin.base_url = "https://origin.internal".to_string();
        config.idempotency.entry_ttl_secs = 0;
        config.idempotency.definitive_statuses = vec![201, 503];

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "origin.base_url",
                "idempotency.entry_ttl_secs",
                "idempotency.definitive_statuses",
            ]
        );
    }

    #[test]
    fn test_auth_requires_valid_agents() {
        let mut config = ProxyConfig::default();
        config.auth.enabled = true;
        assert!(validate_config(&config).is_err());

        config.auth.trusted_agents = vec!["0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".to_string()];
        assert!(validate_config(&config).is_ok());

        config.auth.trusted_agents.push("alice".to_string());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("alice"));
    }

    #[test]
    fn test_bad_signing_key() {
        let mut config = ProxyConfig::default();
        config.signing.private_key = Some("not-hex".to_string());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "signing.private_key");
    }

    #[test]
    fn test_display() {
        let err = ValidationError::new("origin.timeout_ms", "must be > 0");
        assert_eq!(err.to_string(), "origin.timeout_ms: must be > 0");
    }
}
