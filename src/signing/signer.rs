//! Proxy signing key.
//!
//! # Security
//! - Key material comes from configuration or `IDEMPOTENT_PROXY_SIGNER_KEY`
//! - Keys are never logged or serialized; only the address is reported

use alloy::primitives::{hex, Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::{Signature, SignerSync};
use bytes::Bytes;

use crate::clock::unix_secs;
use crate::config::schema::SigningConfig;
use crate::signing::envelope::{signing_digest, SignedEnvelope};
use crate::signing::{SigningError, SigningResult};

/// Environment variable name for the signer key.
pub const SIGNER_KEY_ENV_VAR: &str = "IDEMPOTENT_PROXY_SIGNER_KEY";

/// secp256k1 key the proxy signs outbound requests with.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    signer: PrivateKeySigner,
}

impl RequestSigner {
    /// Create a signer from a hex-encoded private key (with or without 0x prefix).
    pub fn from_private_key(private_key_hex: &str) -> SigningResult<Self> {
        let key_hex = private_key_hex
            .trim()
            .strip_prefix("0x")
            .unwrap_or(private_key_hex.trim());

        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| SigningError::InvalidKey(format!("{}", e)))?;

        tracing::info!(address = %signer.address(), "Request signer initialized");
        Ok(Self { signer })
    }

    /// Load the signer key from `IDEMPOTENT_PROXY_SIGNER_KEY`.
    pub fn from_env() -> SigningResult<Self> {
        let private_key = std::env::var(SIGNER_KEY_ENV_VAR).map_err(|_| {
            SigningError::MissingKey(format!("environment variable {} not set", SIGNER_KEY_ENV_VAR))
        })?;
        Self::from_private_key(&private_key)
    }

    /// Resolve the signer for a configuration. The environment variable wins
    /// over `signing.private_key`.
    pub fn from_config(config: &SigningConfig) -> SigningResult<Self> {
        if let Ok(private_key) = std::env::var(SIGNER_KEY_ENV_VAR) {
            return Self::from_private_key(&private_key);
        }
        match &config.private_key {
            Some(private_key) => Self::from_private_key(private_key),
            None => Err(SigningError::MissingKey(format!(
                "set {} or signing.private_key",
                SIGNER_KEY_ENV_VAR
            ))),
        }
    }

    /// Generate a fresh key.
    pub fn random() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }

    /// Identifier verifiers pin: the address derived from the public key.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Hex export of the key, for key provisioning tools only.
    pub fn private_key_hex(&self) -> String {
        hex::encode_prefixed(self.signer.to_bytes())
    }

    /// Sign a 32-byte prehash.
    pub fn sign_digest(&self, digest: &B256) -> SigningResult<Signature> {
        self.signer
            .sign_hash_sync(digest)
            .map_err(|e| SigningError::Sign(e.to_string()))
    }

    /// Sign `payload` with the current time.
    pub fn sign(&self, payload: Bytes) -> SigningResult<SignedEnvelope> {
        self.sign_at(payload, unix_secs())
    }

    /// Sign `payload` bound to an explicit timestamp (seconds).
    pub fn sign_at(&self, payload: Bytes, timestamp: u64) -> SigningResult<SignedEnvelope> {
        let digest = signing_digest(timestamp, &payload)?;
        let signature = self.sign_digest(&digest)?;
        Ok(SignedEnvelope {
            payload,
            signature,
            signer: self.address(),
            timestamp,
        })
    }
}
