//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the idempotency proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// The single origin requests are forwarded to.
    pub origin: OriginConfig,

    /// Idempotency engine settings.
    pub idempotency: IdempotencyConfig,

    /// Outbound request signing.
    pub signing: SigningConfig,

    /// Inbound proxy-token authentication.
    pub auth: AuthConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest inbound request body buffered, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Origin configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Base URL, e.g. "http://127.0.0.1:3000". A path prefix is allowed.
    pub base_url: String,

    /// Deadline for one origin call, in milliseconds.
    pub timeout_ms: u64,

    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Largest origin response body buffered, in bytes.
    pub max_response_bytes: usize,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            timeout_ms: 10_000,
            connect_timeout_ms: 2_000,
            max_response_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Idempotency engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// Inbound header carrying the idempotency key.
    pub key_header: String,

    /// How long a cached result stays replayable, in seconds.
    pub entry_ttl_secs: u64,

    /// Origin status codes treated as definitive and cached.
    pub definitive_statuses: Vec<u16>,

    /// Reject safe-method requests that carry no key.
    pub require_key_for_safe_methods: bool,

    /// Extend an entry's TTL each time it is replayed.
    pub refresh_on_replay: bool,

    /// Interval between sweeps of expired in-memory entries, in seconds.
    pub sweep_interval_secs: u64,

    /// Where the in-memory store is snapshotted on shutdown and reloaded on start.
    pub snapshot_path: Option<String>,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            key_header: "idempotency-key".to_string(),
            entry_ttl_secs: 86_400,
            definitive_statuses: default_definitive_statuses(),
            require_key_for_safe_methods: false,
            refresh_on_replay: false,
            sweep_interval_secs: 60,
            snapshot_path: None,
        }
    }
}

/// Success, redirect (except 304) and deterministic client-error statuses.
pub fn default_definitive_statuses() -> Vec<u16> {
    let mut statuses = vec![200, 201, 202, 203, 204, 205, 207, 208, 226];
    statuses.extend((300..=308).filter(|s| *s != 304));
    statuses.extend([400, 404, 405, 409, 410, 422]);
    statuses
}

/// Signing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Hex private key. `IDEMPOTENT_PROXY_SIGNER_KEY` takes precedence.
    pub private_key: Option<String>,

    /// Oldest signature the origin should accept, in seconds.
    pub signature_max_age_secs: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            private_key: None,
            signature_max_age_secs: 60,
        }
    }
}

/// Inbound authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Require a proxy token on every inbound request.
    pub enabled: bool,

    /// Addresses whose tokens are accepted.
    pub trusted_agents: Vec<String>,
}

/// Timeout configuration for the inbound side.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.idempotency.key_header, "idempotency-key");
        assert_eq!(config.idempotency.entry_ttl_secs, 86_400);
        assert_eq!(config.signing.signature_max_age_secs, 60);
        assert!(!config.auth.enabled);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_default_statuses_exclude_transient() {
        let statuses = default_definitive_statuses();
        for definitive in [200, 201, 204, 301, 308, 400, 404, 409, 422] {
            assert!(statuses.contains(&definitive), "{} should be definitive", definitive);
        }
        for transient in [304, 401, 403, 408, 425, 429, 500, 502, 503, 504] {
            assert!(!statuses.contains(&transient), "{} should not be definitive", transient);
        }
    }

    #[test]
    fn test_partial_sections() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [origin]
            base_url = "http://10.0.0.5:8000/v1"
            timeout_ms = 2500

            [idempotency]
            definitive_statuses = [200, 201]
            refresh_on_replay = true

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.origin.base_url, "http://10.0.0.5:8000/v1");
        assert_eq!(config.origin.timeout_ms, 2500);
        assert_eq!(config.origin.connect_timeout_ms, 2_000);
        assert_eq!(config.idempotency.definitive_statuses, vec![200, 201]);
        assert!(config.idempotency.refresh_on_replay);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
