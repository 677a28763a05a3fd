//! Health signals.
//!
//! # Data Flow
//! ```text
//! Backlog (backlog.rs):
//!     Periodic timer
//!     → Sample job queue depth
//!     → Count consecutive breaches, alert once per episode
//!
//! Readiness (readiness.rs):
//!     GET /health/ready
//!     → database ping, queue ping, critical breakers, spool bound
//!     → ready only if every check passes
//! ```
//!
//! # Design Decisions
//! - Checks run concurrently, each with its own deadline
//! - A failing or hanging check cannot mask the others
//! - Liveness never touches a collaborator

pub mod backlog;
pub mod handlers;
pub mod readiness;

pub use backlog::{BacklogMonitor, BacklogSample, SampleOutcome};
pub use readiness::{CheckResult, HealthAggregator, ReadinessReport};
