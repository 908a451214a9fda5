//! Request fingerprinting.
//!
//! # Responsibilities
//! - Validate the client-supplied idempotency key
//! - Classify requests into mutating and safe operations
//! - Derive the content digest and the fingerprint of a request
//!
//! # Design Decisions
//! - Keccak-256 over length-prefixed fields, so `("ab", "c")` and `("a", "bc")`
//!   never collide
//! - The entry key is derived from the idempotency key alone, so one key
//!   addresses at most one entry. The full fingerprint adds method, path and
//!   content digest; a same-key request for another operation lands on the
//!   same entry and is detected as a conflict

use std::fmt;

use alloy::primitives::{keccak256, B256};
use axum::http::Method;

use crate::error::{ProxyError, ProxyResult};

/// Longest idempotency key accepted, in bytes.
pub const MAX_KEY_LEN: usize = 255;

/// A validated client-supplied idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Parse a raw header value into a key.
    ///
    /// Keys must be non-empty, at most [`MAX_KEY_LEN`] bytes and visible ASCII.
    pub fn parse(raw: &str) -> ProxyResult<Self> {
        if raw.is_empty() {
            return Err(ProxyError::InvalidRequest(
                "idempotency key must not be empty".to_string(),
            ));
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(ProxyError::InvalidRequest(format!(
                "idempotency key exceeds {} bytes",
                MAX_KEY_LEN
            )));
        }
        if !raw.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(ProxyError::InvalidRequest(
                "idempotency key must be visible ASCII".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// Resolve the key for a request of the given class.
    ///
    /// Returns `Ok(None)` when the request may proceed without idempotency
    /// (a safe method with no key, unless keys are required everywhere).
    pub fn from_request(
        class: RequestClass,
        raw: Option<&str>,
        required_for_safe: bool,
    ) -> ProxyResult<Option<Self>> {
        match raw {
            Some(raw) => Self::parse(raw).map(Some),
            None if class == RequestClass::Mutating || required_for_safe => {
                Err(ProxyError::InvalidRequest(
                    "idempotency key is required for this request".to_string(),
                ))
            }
            None => Ok(None),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operation class of a request, decided from its method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Changes origin state; an idempotency key is mandatory.
    Mutating,
    /// Read-only; the key is optional.
    Safe,
}

impl RequestClass {
    pub fn from_method(method: &Method) -> Self {
        match *method {
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE => RequestClass::Mutating,
            _ => RequestClass::Safe,
        }
    }
}

/// Keccak-256 digest of a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest(pub B256);

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store and coordinator address: digest of the idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey(pub B256);

impl EntryKey {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    id: B256,
    entry_key: EntryKey,
    content_digest: ContentDigest,
}

impl Fingerprint {
    /// Digest over method, normalized path, key and content digest.
    pub fn id(&self) -> B256 {
        self.id
    }

    pub fn entry_key(&self) -> EntryKey {
        self.entry_key
    }

    pub fn content_digest(&self) -> ContentDigest {
        self.content_digest
    }
}

/// Digest of a request body.
pub fn content_digest(body: &[u8]) -> ContentDigest {
    ContentDigest(keccak256(body))
}

/// Fingerprint a request. Pure; identical inputs give identical output.
pub fn fingerprint(
    method: &Method,
    path: &str,
    key: &IdempotencyKey,
    body: &[u8],
) -> Fingerprint {
    let path = normalize_path(path);
    let content_digest = content_digest(body);

    let mut input = Vec::with_capacity(96 + path.len() + key.as_str().len());
    push_field(&mut input, method.as_str().as_bytes());
    push_field(&mut input, path.as_bytes());
    push_field(&mut input, key.as_str().as_bytes());
    push_field(&mut input, content_digest.0.as_slice());

    Fingerprint {
        id: keccak256(&input),
        entry_key: entry_key(key),
        content_digest,
    }
}

/// Address of the entry owned by `key`.
pub fn entry_key(key: &IdempotencyKey) -> EntryKey {
    let mut input = Vec::with_capacity(8 + key.as_str().len());
    push_field(&mut input, key.as_str().as_bytes());
    EntryKey(keccak256(&input))
}

/// Collapse repeated slashes and drop a trailing slash; the query is kept verbatim.
pub fn normalize_path(path_and_query: &str) -> String {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };

    let mut normalized = String::with_capacity(path.len() + 1);
    normalized.push('/');
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if normalized.len() > 1 {
            normalized.push('/');
        }
        normalized.push_str(segment);
    }

    if let Some(query) = query {
        normalized.push('?');
        normalized.push_str(query);
    }
    normalized
}

fn push_field(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u64).to_be_bytes());
    buf.extend_from_slice(field);
}
