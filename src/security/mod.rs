//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (fixed window per route / client)
//!     → Pass to handler
//!
//! Callback ingestion:
//!     → signature.rs (HMAC-SHA256 over the raw body)
//! ```
//!
//! # Design Decisions
//! - Checks run before any side effect
//! - Signature comparison is constant-time
//! - Limiter state is per instance; no shared counter store

pub mod rate_limit;
pub mod signature;

pub use rate_limit::{FixedWindowLimiter, RateLimitState};
pub use signature::{SignatureError, SignatureVerifier};
