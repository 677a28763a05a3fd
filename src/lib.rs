//! Render ingress gateway library.
//!
//! Ingress resilience (circuit breaker, rate limiter, backlog monitor,
//! telemetry retry spool) and callback ingestion for an asynchronous
//! image-generation pipeline.

pub mod admin;
pub mod callbacks;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod queue;
pub mod resilience;
pub mod routing;
pub mod security;
pub mod spool;
pub mod tasks;

pub use config::schema::GatewayConfig;
pub use error::ApiError;
pub use http::HttpServer;
pub use lifecycle::{Collaborators, Shutdown};
