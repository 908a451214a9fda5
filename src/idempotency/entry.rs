//! Cached origin results and their binary encoding.
//!
//! Entries are encoded as a CBOR map with short field tags. Decoding ignores
//! tags it does not know, so later versions may add fields without breaking
//! readers of older entries.

use alloy::primitives::B256;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use thiserror::Error;

use crate::idempotency::fingerprint::{ContentDigest, Fingerprint};

/// Highest entry format this build writes and understands.
pub const ENTRY_FORMAT_VERSION: u8 = 1;

/// Errors from encoding or decoding a cache entry.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode cache entry: {0}")]
    Encode(String),

    #[error("failed to decode cache entry: {0}")]
    Decode(String),

    #[error("unsupported cache entry format version {0}")]
    UnsupportedVersion(u8),
}

/// A persisted origin response. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: B256,
    pub content_digest: ContentDigest,
    pub status: u16,
    /// Header set in origin order; repeated names are kept.
    pub headers: Vec<(String, Bytes)>,
    pub body: Bytes,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

impl CacheEntry {
    /// Build an entry for `fingerprint` from an origin response.
    pub fn new(
        fingerprint: &Fingerprint,
        status: StatusCode,
        headers: &HeaderMap,
        body: Bytes,
        created_at_ms: u64,
        expires_at_ms: u64,
    ) -> Self {
        let headers = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    Bytes::copy_from_slice(value.as_bytes()),
                )
            })
            .collect();

        Self {
            fingerprint: fingerprint.id(),
            content_digest: fingerprint.content_digest(),
            status: status.as_u16(),
            headers,
            body,
            created_at_ms,
            expires_at_ms,
        }
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms <= now_ms
    }

    /// True when the entry was produced by the same operation: same method,
    /// path, key and payload.
    pub fn matches(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprint == fingerprint.id()
    }

    /// True when both entries carry the same result, ignoring expiry.
    pub fn same_result(&self, other: &CacheEntry) -> bool {
        self.fingerprint == other.fingerprint
            && self.content_digest == other.content_digest
            && self.status == other.status
            && self.headers == other.headers
            && self.body == other.body
            && self.created_at_ms == other.created_at_ms
    }

    /// Copy of this entry with a new expiry; the result payload is unchanged.
    pub fn with_expiry(&self, expires_at_ms: u64) -> Self {
        Self {
            expires_at_ms,
            ..self.clone()
        }
    }

    /// Status code; falls back to 502 if the stored value is out of range.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY)
    }

    /// Rebuild the header map. Names or values that fail to parse are skipped.
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value),
            ) else {
                tracing::warn!(header = %name, "Skipping unparseable cached header");
                continue;
            };
            map.append(name, value);
        }
        map
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let record = EntryRecord {
            version: ENTRY_FORMAT_VERSION,
            fingerprint: ByteBuf::from(self.fingerprint.to_vec()),
            content_digest: ByteBuf::from(self.content_digest.0.to_vec()),
            status: self.status,
            headers: self
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), ByteBuf::from(value.to_vec())))
                .collect(),
            body: ByteBuf::from(self.body.to_vec()),
            created_at_ms: self.created_at_ms,
            expires_at_ms: self.expires_at_ms,
        };

        let mut buf = Vec::with_capacity(self.body.len() + 128);
        ciborium::into_writer(&record, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let record: EntryRecord =
            ciborium::from_reader(data).map_err(|e| CodecError::Decode(e.to_string()))?;

        if record.version > ENTRY_FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(record.version));
        }

        Ok(Self {
            fingerprint: digest_field(&record.fingerprint, "fingerprint")?,
            content_digest: ContentDigest(digest_field(&record.content_digest, "content digest")?),
            status: record.status,
            headers: record
                .headers
                .into_iter()
                .map(|(name, value)| (name, Bytes::from(value.into_vec())))
                .collect(),
            body: Bytes::from(record.body.into_vec()),
            created_at_ms: record.created_at_ms,
            expires_at_ms: record.expires_at_ms,
        })
    }
}

fn digest_field(bytes: &[u8], field: &str) -> Result<B256, CodecError> {
    B256::try_from(bytes)
        .map_err(|_| CodecError::Decode(format!("{} must be 32 bytes, got {}", field, bytes.len())))
}

/// On-disk layout. Tags are part of the format and must never be reused.
#[derive(Serialize, Deserialize)]
struct EntryRecord {
    #[serde(rename = "v")]
    version: u8,
    #[serde(rename = "fp")]
    fingerprint: ByteBuf,
    #[serde(rename = "cd")]
    content_digest: ByteBuf,
    #[serde(rename = "st")]
    status: u16,
    #[serde(rename = "hd", default)]
    headers: Vec<(String, ByteBuf)>,
    #[serde(rename = "bd", default)]
    body: ByteBuf,
    #[serde(rename = "ca")]
    created_at_ms: u64,
    #[serde(rename = "ea")]
    expires_at_ms: u64,
}
