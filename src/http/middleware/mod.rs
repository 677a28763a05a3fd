//! Route-level middleware.
//!
//! Both layers run after route matching so they can key on `MatchedPath`.

pub mod breaker_guard;
pub mod telemetry;

pub use breaker_guard::breaker_guard_middleware;
pub use telemetry::telemetry_middleware;
