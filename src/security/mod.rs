//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → proxy_token.rs (verify agent token, when enabled)
//!     → headers.rs (strip hop-by-hop and proxy-owned headers)
//!     → Pass to the orchestrator
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any token check failure
//! - No trust in client input: signature headers are always replaced

pub mod headers;
pub mod proxy_token;
