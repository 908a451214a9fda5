//! Cache store subsystem.
//!
//! # Data Flow
//! ```text
//! Orchestrator
//!     → adapter.rs (CacheStore: typed get / put-if-absent / compare-and-swap,
//!                   entry encoding, expiry on read)
//!     → kv.rs      (KvStore trait: raw bytes + version, conditional writes)
//!     → memory.rs  (MemoryKv: DashMap-backed implementation)
//! ```
//!
//! # Design Decisions
//! - The conditional write is the only cross-context arbiter; nothing else in
//!   the store is trusted for ordering
//! - Entries past their expiry read as absent even if the backend still holds them
//! - Eviction belongs to the backend; the adapter only honors the expiry it wrote

pub mod adapter;
pub mod kv;
pub mod memory;

use thiserror::Error;

use crate::idempotency::entry::CodecError;

pub use adapter::{CacheStore, PutOutcome, StoredEntry, SwapOutcome};
pub use kv::{KvPut, KvStore, KvSwap, Versioned};
pub use memory::MemoryKv;

/// Errors from the cache store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not complete the operation.
    #[error("store backend error: {0}")]
    Backend(String),

    /// A stored record could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A swap tried to change a stored result rather than its expiry.
    #[error("stored results are immutable; only the expiry may change")]
    ResultChanged,

    /// Conditional writes kept losing to concurrent writers.
    #[error("conditional write lost {0} consecutive races")]
    Contention(u32),

    /// Snapshot file could not be read or written.
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
