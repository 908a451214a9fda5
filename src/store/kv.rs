use bytes::Bytes;
use std::future::Future;

use crate::idempotency::fingerprint::EntryKey;
use crate::store::StoreResult;

/// A raw value together with the version the backend assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Bytes,
    pub version: u64,
}

/// Result of a put-if-absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvPut {
    Stored { version: u64 },
    AlreadyExists(Versioned),
}

/// Result of a compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvSwap {
    Swapped { version: u64 },
    VersionMismatch,
}

/// External key/value store with conditional writes.
///
/// Implementations must make `put_if_absent` and `compare_and_swap` atomic
/// with respect to every other writer, including writers in other processes.
/// `expires_at_ms` is advisory: a backend may use it to reclaim records, and
/// may treat a record past its expiry as absent.
pub trait KvStore: Send + Sync + Clone + 'static {
    fn get(&self, key: EntryKey) -> impl Future<Output = StoreResult<Option<Versioned>>> + Send;

    /// Atomically create the record. Returns the occupant if one exists.
    fn put_if_absent(
        &self,
        key: EntryKey,
        value: Bytes,
        expires_at_ms: u64,
    ) -> impl Future<Output = StoreResult<KvPut>> + Send;

    /// Replace the record only if its version is still `expected_version`.
    fn compare_and_swap(
        &self,
        key: EntryKey,
        expected_version: u64,
        value: Bytes,
        expires_at_ms: u64,
    ) -> impl Future<Output = StoreResult<KvSwap>> + Send;
}
