//! Route identity.
//!
//! # Data Flow
//! ```text
//! Incoming request
//!     → axum matches a route template (MatchedPath)
//!     → key.rs normalizes it into a RouteKey (+ optional client id)
//!     → RouteKey scopes rate-limit windows and breaker state
//! ```
//!
//! # Design Decisions
//! - Keys use the route template, not the raw path, so `/tasks/{task_id}/cancel`
//!   is one key no matter which task is cancelled
//! - Raw paths (no template available) have id-like segments collapsed

pub mod key;

pub use key::RouteKey;
