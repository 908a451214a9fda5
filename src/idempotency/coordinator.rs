//! Single-flight coordination within one proxy instance.
//!
//! # Responsibilities
//! - Elect one leader per entry key among concurrent requests
//! - Fan the leader's outcome out to every follower
//! - Release the slot when the leader finishes or is dropped
//!
//! A slot holds a `watch` receiver; the leader owns the sender inside its
//! [`LeaderGuard`]. Dropping the guard without completing closes the channel,
//! which followers observe as [`FlightResult::LeaderAborted`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

use crate::error::ProxyError;
use crate::idempotency::entry::CacheEntry;
use crate::idempotency::fingerprint::EntryKey;

/// A resolved flight: the entry every participant replays.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub entry: Arc<CacheEntry>,
    /// True when this flight's origin call produced the entry.
    pub fresh: bool,
}

/// What a flight settles to.
pub type FlightOutcome = Result<Resolution, ProxyError>;

/// What a participant observes when the flight ends.
#[derive(Debug, Clone)]
pub enum FlightResult {
    Completed(FlightOutcome),
    /// The leader went away without publishing an outcome.
    LeaderAborted,
}

struct Slot {
    id: u64,
    rx: watch::Receiver<Option<FlightOutcome>>,
}

/// Role assigned by [`SingleFlight::join`].
pub enum Join {
    /// Caller must perform the operation and complete the guard.
    Leader(LeaderGuard, FlightHandle),
    /// Another caller is leading; wait on the handle.
    Follower(FlightHandle),
}

/// Per-instance table of in-flight operations keyed by entry key.
#[derive(Clone, Default)]
pub struct SingleFlight {
    slots: Arc<DashMap<EntryKey, Slot>>,
    next_id: Arc<AtomicU64>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, becoming leader if none is in progress.
    ///
    /// Election is atomic: of any set of concurrent joiners exactly one is
    /// made leader.
    pub fn join(&self, key: EntryKey) -> Join {
        match self.slots.entry(key) {
            Entry::Occupied(occupied) => Join::Follower(FlightHandle {
                rx: occupied.get().rx.clone(),
            }),
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                vacant.insert(Slot { id, rx: rx.clone() });

                let guard = LeaderGuard {
                    key,
                    id,
                    tx: Some(tx),
                    slots: self.slots.clone(),
                };
                Join::Leader(guard, FlightHandle { rx })
            }
        }
    }

    /// Number of flights currently in progress.
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }
}

/// Leadership of one flight. Completing or dropping it frees the slot.
pub struct LeaderGuard {
    key: EntryKey,
    id: u64,
    tx: Option<watch::Sender<Option<FlightOutcome>>>,
    slots: Arc<DashMap<EntryKey, Slot>>,
}

impl LeaderGuard {
    pub fn key(&self) -> EntryKey {
        self.key
    }

    /// Publish the outcome to every waiter and release the slot.
    pub fn complete(mut self, outcome: FlightOutcome) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(outcome));
        }
        self.release();
    }

    fn release(&self) {
        // Only remove our own slot; a later flight may already own the key.
        self.slots.remove_if(&self.key, |_, slot| slot.id == self.id);
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::warn!(entry_key = %self.key, "Flight leader dropped without an outcome");
            self.release();
        }
    }
}

/// Waits for the outcome of a flight.
#[derive(Clone)]
pub struct FlightHandle {
    rx: watch::Receiver<Option<FlightOutcome>>,
}

impl FlightHandle {
    /// Suspend until the flight settles. Dropping the future only stops this
    /// waiter; the flight itself continues.
    pub async fn wait(mut self) -> FlightResult {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => match outcome.as_ref() {
                Some(outcome) => FlightResult::Completed(outcome.clone()),
                None => FlightResult::LeaderAborted,
            },
            Err(_) => FlightResult::LeaderAborted,
        }
    }
}
