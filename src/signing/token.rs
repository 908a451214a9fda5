//! Proxy tokens: short-lived credentials agents present to the proxy.
//!
//! A token is `base64url(CBOR([expire_at, agent, signature]))`, where the
//! signature covers `keccak256(CBOR([expire_at, agent]))`. The trusted set is
//! a list of signer addresses.

use alloy::primitives::{keccak256, Address, B256};
use alloy::signers::Signature;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::signing::{RequestSigner, SigningError, SigningResult, PERMITTED_DRIFT_SECS};

/// `(expire_at_secs, agent, signature)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyToken(pub u64, pub String, pub ByteBuf);

impl ProxyToken {
    pub fn expire_at(&self) -> u64 {
        self.0
    }

    pub fn agent(&self) -> &str {
        &self.1
    }
}

fn token_digest(expire_at: u64, agent: &str) -> SigningResult<B256> {
    let mut buf = Vec::with_capacity(agent.len() + 16);
    ciborium::into_writer(&(expire_at, agent), &mut buf)
        .map_err(|e| SigningError::Encoding(e.to_string()))?;
    Ok(keccak256(&buf))
}

/// Issue a token for `agent` valid until `expire_at` (seconds).
pub fn issue_token(signer: &RequestSigner, expire_at: u64, agent: &str) -> SigningResult<String> {
    let digest = token_digest(expire_at, agent)?;
    let signature = signer.sign_digest(&digest)?;
    let token = ProxyToken(
        expire_at,
        agent.to_string(),
        ByteBuf::from(signature.as_bytes().to_vec()),
    );

    let mut buf = Vec::new();
    ciborium::into_writer(&token, &mut buf).map_err(|e| SigningError::Encoding(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}

/// Decode and check a token against the trusted signer set.
pub fn verify_token(trusted: &[Address], token: &str, now_secs: u64) -> SigningResult<ProxyToken> {
    let raw = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|e| SigningError::MalformedSignature(format!("token encoding: {}", e)))?;
    let token: ProxyToken = ciborium::from_reader(raw.as_slice())
        .map_err(|e| SigningError::MalformedSignature(format!("token layout: {}", e)))?;

    if token.expire_at().saturating_add(PERMITTED_DRIFT_SECS) < now_secs {
        return Err(SigningError::Expired(token.expire_at()));
    }

    let digest = token_digest(token.expire_at(), token.agent())?;
    let signature = Signature::try_from(token.2.as_slice())
        .map_err(|e| SigningError::MalformedSignature(e.to_string()))?;
    let signer = signature
        .recover_address_from_prehash(&digest)
        .map_err(|e| SigningError::MalformedSignature(e.to_string()))?;

    if !trusted.contains(&signer) {
        return Err(SigningError::UntrustedSigner(signer));
    }
    Ok(token)
}
