//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a collaborator:
//!     → timeouts.rs (every call carries a deadline)
//!     → circuit_breaker.rs (per-RouteKey failure tracking, fast fail while open)
//!
//! Background redelivery:
//!     → backoff.rs (exponential delay with jitter)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Breaker state is an injected registry, never a global
//! - An open breaker is a fast-fail signal, not an error to log loudly

pub mod backoff;
pub mod circuit_breaker;
pub mod timeouts;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{BreakerError, CircuitBreakerRegistry, CircuitState};
pub use timeouts::{with_timeout, TimedOut};
