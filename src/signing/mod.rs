//! Request signing subsystem.
//!
//! # Data Flow
//! ```text
//! Key material (config or environment variable)
//!     → signer.rs   (RequestSigner: secp256k1 key, digest signing)
//!     → envelope.rs (SignedEnvelope over the outbound payload + timestamp,
//!                    header transport, Verifier for the origin side)
//!     → token.rs    (proxy tokens presented by inbound agents)
//! ```
//!
//! # Security Constraints
//! - Keys are passed in explicitly; there is no process-global key state
//! - Keys are never logged; only the derived address is
//! - Verification fails closed: any parse, signer or freshness failure is an error

pub mod envelope;
pub mod signer;
pub mod token;

use alloy::primitives::Address;
use thiserror::Error;

pub use envelope::{verify, SignedEnvelope, Verifier};
pub use signer::RequestSigner;
pub use token::{issue_token, verify_token, ProxyToken};

/// Errors from signing and verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    /// Invalid private key format.
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    /// No key material was provided.
    #[error("Signer key not configured: {0}")]
    MissingKey(String),

    /// The signer refused to produce a signature.
    #[error("Signing failed: {0}")]
    Sign(String),

    /// Signature bytes could not be parsed or recovered.
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    /// Signed by a key other than the one expected.
    #[error("Signed by {actual}, expected {expected}")]
    WrongSigner { expected: Address, actual: Address },

    /// Signer is not in the trusted set.
    #[error("Signer {0} is not trusted")]
    UntrustedSigner(Address),

    /// The signed timestamp or token expiry is too old.
    #[error("Signature expired (timestamp {0})")]
    Expired(u64),

    /// The signed timestamp lies beyond the permitted clock drift.
    #[error("Signature timestamp {0} is in the future")]
    FromFuture(u64),

    /// A required header is absent.
    #[error("Missing header {0}")]
    MissingHeader(&'static str),

    /// A header is present but unparseable.
    #[error("Malformed header {0}")]
    MalformedHeader(&'static str),

    /// Canonical encoding of the signed data failed.
    #[error("Encoding failed: {0}")]
    Encoding(String),
}

/// Result type for signing operations.
pub type SigningResult<T> = Result<T, SigningError>;

/// Allowed clock skew between proxy and verifier, in seconds.
pub const PERMITTED_DRIFT_SECS: u64 = 10;
