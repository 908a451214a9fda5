//! Typed cache operations over a [`KvStore`].

use std::sync::Arc;
use std::time::Duration;

use crate::clock::unix_ms;
use crate::idempotency::entry::CacheEntry;
use crate::idempotency::fingerprint::EntryKey;
use crate::observability::metrics;
use crate::store::kv::{KvPut, KvStore, KvSwap};
use crate::store::{StoreError, StoreResult};

/// Attempts at replacing an expired occupant before giving up.
const MAX_REPLACE_ATTEMPTS: u32 = 3;

/// Result of [`CacheStore::put_if_absent`].
#[derive(Debug, Clone)]
pub enum PutOutcome {
    /// Our entry is now the stored one.
    Stored(Arc<CacheEntry>),
    /// Another writer got there first; this is their entry.
    AlreadyExists(Arc<CacheEntry>),
}

/// Result of [`CacheStore::compare_and_swap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped,
    VersionMismatch,
}

/// A live entry and the backend version it was read at.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub entry: Arc<CacheEntry>,
    pub version: u64,
}

/// Cache Store Adapter: encodes entries, honors expiry, exposes conditional writes.
#[derive(Clone)]
pub struct CacheStore<S> {
    kv: S,
}

impl<S: KvStore> CacheStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    /// Live entry for `key`, or `None` when absent or expired.
    pub async fn get(&self, key: EntryKey) -> StoreResult<Option<Arc<CacheEntry>>> {
        Ok(self.get_versioned(key).await?.map(|stored| stored.entry))
    }

    /// Like [`CacheStore::get`], also returning the version for a later swap.
    pub async fn get_versioned(&self, key: EntryKey) -> StoreResult<Option<StoredEntry>> {
        let raw = self.kv.get(key).await.inspect_err(|_| {
            metrics::record_store_error("get");
        })?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let entry = CacheEntry::decode(&raw.value)?;
        if entry.is_expired_at(unix_ms()) {
            return Ok(None);
        }

        Ok(Some(StoredEntry {
            entry: Arc::new(entry),
            version: raw.version,
        }))
    }

    /// Atomically store `entry` unless a live entry exists.
    ///
    /// An expired occupant is replaced through compare-and-swap, so a dead
    /// entry never blocks a fresh operation.
    pub async fn put_if_absent(&self, key: EntryKey, entry: CacheEntry) -> StoreResult<PutOutcome> {
        let encoded = entry.encode()?;
        let expires_at_ms = entry.expires_at_ms;
        let entry = Arc::new(entry);

        for _ in 0..MAX_REPLACE_ATTEMPTS {
            let put = self
                .kv
                .put_if_absent(key, encoded.clone(), expires_at_ms)
                .await
                .inspect_err(|_| metrics::record_store_error("put_if_absent"))?;

            let existing = match put {
                KvPut::Stored { .. } => return Ok(PutOutcome::Stored(entry)),
                KvPut::AlreadyExists(existing) => existing,
            };

            let current = CacheEntry::decode(&existing.value)?;
            if !current.is_expired_at(unix_ms()) {
                return Ok(PutOutcome::AlreadyExists(Arc::new(current)));
            }

            tracing::debug!(entry_key = %key, "Replacing expired cache entry");
            let swap = self
                .kv
                .compare_and_swap(key, existing.version, encoded.clone(), expires_at_ms)
                .await
                .inspect_err(|_| metrics::record_store_error("compare_and_swap"))?;
            if let KvSwap::Swapped { .. } = swap {
                return Ok(PutOutcome::Stored(entry));
            }
        }

        Err(StoreError::Contention(MAX_REPLACE_ATTEMPTS))
    }

    /// Replace the entry at `key` if it is still at `expected_version`.
    ///
    /// Only the expiry may change: a `new_entry` whose result differs from
    /// the stored one fails with [`StoreError::ResultChanged`]. A missing or
    /// moved entry is a `VersionMismatch`.
    pub async fn compare_and_swap(
        &self,
        key: EntryKey,
        expected_version: u64,
        new_entry: &CacheEntry,
    ) -> StoreResult<SwapOutcome> {
        let Some(current) = self.get_versioned(key).await? else {
            return Ok(SwapOutcome::VersionMismatch);
        };
        if current.version != expected_version {
            return Ok(SwapOutcome::VersionMismatch);
        }
        if !current.entry.same_result(new_entry) {
            return Err(StoreError::ResultChanged);
        }
        self.swap(key, expected_version, new_entry).await
    }

    async fn swap(
        &self,
        key: EntryKey,
        expected_version: u64,
        new_entry: &CacheEntry,
    ) -> StoreResult<SwapOutcome> {
        let encoded = new_entry.encode()?;
        let swap = self
            .kv
            .compare_and_swap(key, expected_version, encoded, new_entry.expires_at_ms)
            .await
            .inspect_err(|_| metrics::record_store_error("compare_and_swap"))?;

        Ok(match swap {
            KvSwap::Swapped { .. } => SwapOutcome::Swapped,
            KvSwap::VersionMismatch => SwapOutcome::VersionMismatch,
        })
    }

    /// Extend the life of the entry at `key` to `ttl` from now.
    ///
    /// Only the expiry changes. Returns `Ok(None)` when there is no live entry.
    pub async fn refresh(&self, key: EntryKey, ttl: Duration) -> StoreResult<Option<SwapOutcome>> {
        let Some(stored) = self.get_versioned(key).await? else {
            return Ok(None);
        };

        let expires_at_ms = unix_ms().saturating_add(ttl.as_millis() as u64);
        if expires_at_ms <= stored.entry.expires_at_ms {
            return Ok(Some(SwapOutcome::Swapped));
        }

        let refreshed = stored.entry.with_expiry(expires_at_ms);
        self.swap(key, stored.version, &refreshed)
            .await
            .map(Some)
    }
}
