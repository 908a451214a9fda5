//! In-process conditional-write store.
//!
//! Stands in for an external KV service when the proxy runs as a single
//! process, and backs the multi-context tests (several orchestrators sharing
//! one `MemoryKv` behave like several instances sharing one remote store).

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use alloy::primitives::B256;

use crate::clock::unix_ms;
use crate::idempotency::fingerprint::EntryKey;
use crate::observability::metrics;
use crate::store::kv::{KvPut, KvStore, KvSwap, Versioned};
use crate::store::{StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Record {
    value: Bytes,
    version: u64,
    expires_at_ms: u64,
}

impl Record {
    fn versioned(&self) -> Versioned {
        Versioned {
            value: self.value.clone(),
            version: self.version,
        }
    }
}

/// DashMap-backed [`KvStore`]. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: Arc<DashMap<EntryKey, Record>>,
    last_version: Arc<AtomicU64>,
}

impl MemoryKv {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn next_version(&self) -> u64 {
        self.last_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drop every record whose expiry is at or before `now_ms`.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let mut removed = 0;
        self.inner.retain(|_, record| {
            let keep = record.expires_at_ms > now_ms;
            if !keep {
                removed += 1;
            }
            keep
        });
        metrics::record_store_entries(self.inner.len());
        removed
    }

    /// Purge expired records every `interval` until shutdown.
    pub async fn run_sweeper(self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = interval.as_secs(), "Store sweeper starting");

        let mut ticker = time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.purge_expired(unix_ms());
                    if removed > 0 {
                        tracing::debug!(removed, remaining = self.inner.len(), "Purged expired cache entries");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Store sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Load a snapshot written by [`MemoryKv::save_to_file`]. A missing file
    /// yields an empty store; records already expired are skipped.
    pub fn load_from_file(path: &Path) -> StoreResult<Self> {
        let store = Self::new();
        if !path.exists() {
            return Ok(store);
        }

        let reader = BufReader::new(File::open(path)?);
        let records: Vec<SnapshotRecord> = ciborium::from_reader(reader)
            .map_err(|e| StoreError::Backend(format!("failed to decode snapshot: {}", e)))?;

        let now = unix_ms();
        let mut max_version = 0;
        for record in records {
            if record.expires_at_ms <= now {
                continue;
            }
            let Ok(key) = B256::try_from(record.key.as_slice()) else {
                tracing::warn!(len = record.key.len(), "Skipping snapshot record with malformed key");
                continue;
            };
            max_version = max_version.max(record.version);
            store.inner.insert(
                EntryKey(key),
                Record {
                    value: Bytes::from(record.value.into_vec()),
                    version: record.version,
                    expires_at_ms: record.expires_at_ms,
                },
            );
        }
        store.last_version.store(max_version, Ordering::SeqCst);

        metrics::record_store_entries(store.inner.len());
        tracing::info!(path = %path.display(), entries = store.inner.len(), "Loaded cache snapshot");
        Ok(store)
    }

    /// Write every live record to `path`.
    pub fn save_to_file(&self, path: &Path) -> StoreResult<()> {
        let now = unix_ms();
        let records: Vec<SnapshotRecord> = self
            .inner
            .iter()
            .filter(|r| r.value().expires_at_ms > now)
            .map(|r| SnapshotRecord {
                key: ByteBuf::from(r.key().as_bytes().to_vec()),
                value: ByteBuf::from(r.value().value.to_vec()),
                version: r.value().version,
                expires_at_ms: r.value().expires_at_ms,
            })
            .collect();

        let mut writer = BufWriter::new(File::create(path)?);
        ciborium::into_writer(&records, &mut writer)
            .map_err(|e| StoreError::Backend(format!("failed to encode snapshot: {}", e)))?;
        writer.flush()?;

        tracing::info!(path = %path.display(), entries = records.len(), "Saved cache snapshot");
        Ok(())
    }
}

impl KvStore for MemoryKv {
    async fn get(&self, key: EntryKey) -> StoreResult<Option<Versioned>> {
        let now = unix_ms();
        Ok(self
            .inner
            .get(&key)
            .filter(|r| r.expires_at_ms > now)
            .map(|r| r.versioned()))
    }

    async fn put_if_absent(
        &self,
        key: EntryKey,
        value: Bytes,
        expires_at_ms: u64,
    ) -> StoreResult<KvPut> {
        let now = unix_ms();
        let outcome = match self.inner.entry(key) {
            Entry::Occupied(mut occupied) if occupied.get().expires_at_ms <= now => {
                let version = self.next_version();
                occupied.insert(Record {
                    value,
                    version,
                    expires_at_ms,
                });
                KvPut::Stored { version }
            }
            Entry::Occupied(occupied) => KvPut::AlreadyExists(occupied.get().versioned()),
            Entry::Vacant(vacant) => {
                let version = self.next_version();
                vacant.insert(Record {
                    value,
                    version,
                    expires_at_ms,
                });
                KvPut::Stored { version }
            }
        };

        metrics::record_store_entries(self.inner.len());
        Ok(outcome)
    }

    async fn compare_and_swap(
        &self,
        key: EntryKey,
        expected_version: u64,
        value: Bytes,
        expires_at_ms: u64,
    ) -> StoreResult<KvSwap> {
        let Some(mut record) = self.inner.get_mut(&key) else {
            return Ok(KvSwap::VersionMismatch);
        };
        if record.version != expected_version {
            return Ok(KvSwap::VersionMismatch);
        }

        let version = self.next_version();
        *record = Record {
            value,
            version,
            expires_at_ms,
        };
        Ok(KvSwap::Swapped { version })
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotRecord {
    #[serde(rename = "k")]
    key: ByteBuf,
    #[serde(rename = "v")]
    value: ByteBuf,
    #[serde(rename = "ver")]
    version: u64,
    #[serde(rename = "ea")]
    expires_at_ms: u64,
}
