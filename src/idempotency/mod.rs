//! Idempotency engine.
//!
//! # Data Flow
//! ```text
//! IncomingRequest
//!     → fingerprint.rs  (key validation, request class, fingerprint)
//!     → orchestrator.rs (lookup, conflict detection, leadership)
//!         → coordinator.rs (single-flight within this instance)
//!         → store          (conditional writes across instances)
//!         → signing/origin (forward the leader's request)
//!     → entry.rs        (what gets persisted and replayed)
//! ```
//!
//! # Design Decisions
//! - Two tiers: the coordinator deduplicates inside one instance, the store's
//!   conditional write arbitrates between instances
//! - Nothing retries inside the proxy; a client retry re-enters the flow

pub mod coordinator;
pub mod entry;
pub mod fingerprint;
pub mod orchestrator;
pub mod policy;

pub use coordinator::{FlightHandle, FlightResult, Join, LeaderGuard, Resolution, SingleFlight};
pub use entry::CacheEntry;
pub use fingerprint::{content_digest, fingerprint, EntryKey, Fingerprint, IdempotencyKey, RequestClass};
pub use orchestrator::{IncomingRequest, Orchestrator, Replay};
pub use policy::{DefinitiveStatuses, OrchestratorPolicy};
