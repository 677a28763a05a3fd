//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (router, outer layers: request id, trace, timeout, body limit)
//!     → middleware/ (telemetry, rate limit, breaker guard; after route matching)
//!     → handlers (callbacks, tasks, health, admin)
//!     → response.rs (uniform envelope)
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use response::Envelope;
pub use server::{AppState, HttpServer};

/// Optional header scoping rate limits to a client.
pub const CLIENT_ID_HEADER: &str = "x-client-id";
