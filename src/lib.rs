//! Idempotency reverse proxy library.
//!
//! Sits in front of an origin and guarantees that a request carrying a given
//! idempotency key is executed at most once within the entry lifetime:
//! repeats replay the stored result, concurrent duplicates share one origin
//! call, and every forwarded request carries the proxy's signature.

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod idempotency;
pub mod lifecycle;
pub mod observability;
pub mod origin;
pub mod security;
pub mod signing;
pub mod store;

pub use config::schema::ProxyConfig;
pub use error::{ProxyError, ProxyResult};
pub use http::HttpServer;
pub use idempotency::{IncomingRequest, Orchestrator, OrchestratorPolicy, Replay};
pub use lifecycle::Shutdown;
pub use signing::{RequestSigner, Verifier};
pub use store::{KvStore, MemoryKv};
