//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID, buffer into IncomingRequest)
//!     → [orchestrator resolves the request]
//!     → response.rs (replay or JSON error)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestId, RequestIdExt, RequestIdLayer, X_REQUEST_ID};
pub use response::REPLAYED_HEADER;
pub use server::{AppState, HttpServer, ProxyOrchestrator, ServerError};
