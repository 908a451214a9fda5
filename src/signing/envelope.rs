//! Signed envelopes and their verification.
//!
//! The signed digest is `keccak256(CBOR([timestamp, payload]))`. Binding the
//! timestamp into the digest lets a verifier reject replays of old envelopes.

use std::time::Duration;

use alloy::primitives::{hex, keccak256, Address, B256};
use alloy::signers::Signature;
use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderValue};
use hyper::Method;
use serde_bytes::Bytes as SerdeBytes;

use crate::clock::unix_secs;
use crate::signing::{SigningError, SigningResult, PERMITTED_DRIFT_SECS};

pub const SIGNER_HEADER: &str = "x-proxy-signer";
pub const TIMESTAMP_HEADER: &str = "x-proxy-timestamp";
pub const SIGNATURE_HEADER: &str = "x-proxy-signature";

/// A payload with the proxy's signature over it.
#[derive(Debug, Clone)]
pub struct SignedEnvelope {
    pub payload: Bytes,
    pub signature: Signature,
    pub signer: Address,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl SignedEnvelope {
    /// Write signer, timestamp and signature headers. The payload itself is
    /// not transported; the receiver rebuilds it from the request.
    pub fn apply_headers(&self, headers: &mut HeaderMap) -> SigningResult<()> {
        let signer = HeaderValue::from_str(&self.signer.to_string())
            .map_err(|_| SigningError::MalformedHeader(SIGNER_HEADER))?;
        let signature = HeaderValue::from_str(&hex::encode_prefixed(self.signature.as_bytes()))
            .map_err(|_| SigningError::MalformedHeader(SIGNATURE_HEADER))?;

        headers.insert(SIGNER_HEADER, signer);
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from(self.timestamp));
        headers.insert(SIGNATURE_HEADER, signature);
        Ok(())
    }

    /// Reassemble an envelope from request headers and a rebuilt payload.
    pub fn from_headers(headers: &HeaderMap, payload: Bytes) -> SigningResult<Self> {
        let signer = header_str(headers, SIGNER_HEADER)?
            .parse::<Address>()
            .map_err(|_| SigningError::MalformedHeader(SIGNER_HEADER))?;
        let timestamp = header_str(headers, TIMESTAMP_HEADER)?
            .parse::<u64>()
            .map_err(|_| SigningError::MalformedHeader(TIMESTAMP_HEADER))?;
        let raw = hex::decode(header_str(headers, SIGNATURE_HEADER)?)
            .map_err(|_| SigningError::MalformedHeader(SIGNATURE_HEADER))?;
        let signature = Signature::try_from(raw.as_slice())
            .map_err(|e| SigningError::MalformedSignature(e.to_string()))?;

        Ok(Self {
            payload,
            signature,
            signer,
            timestamp,
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> SigningResult<&'a str> {
    headers
        .get(name)
        .ok_or(SigningError::MissingHeader(name))?
        .to_str()
        .map_err(|_| SigningError::MalformedHeader(name))
}

/// Digest the signer commits to for `payload` at `timestamp`.
pub fn signing_digest(timestamp: u64, payload: &[u8]) -> SigningResult<B256> {
    let mut buf = Vec::with_capacity(payload.len() + 16);
    ciborium::into_writer(&(timestamp, SerdeBytes::new(payload)), &mut buf)
        .map_err(|e| SigningError::Encoding(e.to_string()))?;
    Ok(keccak256(&buf))
}

/// Canonical payload for an outbound request.
///
/// Covers method, normalized path, idempotency key (empty when absent) and
/// body, so a verifier can rebuild it from the request it received.
pub fn outbound_payload(
    method: &Method,
    path: &str,
    idempotency_key: Option<&str>,
    body: &[u8],
) -> SigningResult<Bytes> {
    let mut buf = Vec::with_capacity(body.len() + path.len() + 32);
    ciborium::into_writer(
        &(
            method.as_str(),
            path,
            idempotency_key.unwrap_or(""),
            SerdeBytes::new(body),
        ),
        &mut buf,
    )
    .map_err(|e| SigningError::Encoding(e.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Origin-side verification against one pinned signer.
#[derive(Debug, Clone)]
pub struct Verifier {
    expected: Address,
    max_age_secs: u64,
}

impl Verifier {
    pub fn new(expected: Address, max_age: Duration) -> Self {
        Self {
            expected,
            max_age_secs: max_age.as_secs(),
        }
    }

    /// True when the envelope is authentic and fresh.
    pub fn verify(&self, envelope: &SignedEnvelope) -> bool {
        self.check_at(envelope, unix_secs()).is_ok()
    }

    /// Verify at an explicit time, reporting why verification failed.
    pub fn check_at(&self, envelope: &SignedEnvelope, now_secs: u64) -> SigningResult<()> {
        if envelope.timestamp.saturating_add(self.max_age_secs) < now_secs {
            return Err(SigningError::Expired(envelope.timestamp));
        }
        if envelope.timestamp > now_secs.saturating_add(PERMITTED_DRIFT_SECS) {
            return Err(SigningError::FromFuture(envelope.timestamp));
        }
        if envelope.signer != self.expected {
            return Err(SigningError::WrongSigner {
                expected: self.expected,
                actual: envelope.signer,
            });
        }

        let digest = signing_digest(envelope.timestamp, &envelope.payload)?;
        let recovered = envelope
            .signature
            .recover_address_from_prehash(&digest)
            .map_err(|e| SigningError::MalformedSignature(e.to_string()))?;

        if recovered != self.expected {
            return Err(SigningError::WrongSigner {
                expected: self.expected,
                actual: recovered,
            });
        }
        Ok(())
    }

    /// Verify a request as the origin received it.
    pub fn verify_request(
        &self,
        method: &Method,
        path: &str,
        idempotency_key: Option<&str>,
        headers: &HeaderMap,
        body: &[u8],
    ) -> SigningResult<()> {
        let payload = outbound_payload(method, path, idempotency_key, body)?;
        let envelope = SignedEnvelope::from_headers(headers, payload)?;
        self.check_at(&envelope, unix_secs())
    }
}

/// One-shot verification of `envelope` against `public_key`.
pub fn verify(envelope: &SignedEnvelope, public_key: Address, max_age: Duration) -> bool {
    Verifier::new(public_key, max_age).verify(envelope)
}
