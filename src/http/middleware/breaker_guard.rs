//! Circuit breaker guard for critical routes.
//!
//! While a critical route's breaker is open, requests fail fast with 503
//! without reaching the handler. Handler responses of 500 and above count
//! as failures, everything else as a success.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::http::response::Envelope;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitBreakerRegistry;
use crate::security::rate_limit::request_key;

pub async fn breaker_guard_middleware(
    State(breakers): State<Arc<CircuitBreakerRegistry>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = request_key(&request, false);
    if !breakers.is_critical(&key) {
        return next.run(request).await;
    }

    if breakers.is_open(&key) {
        metrics::record_breaker_short_circuit(&key);
        tracing::warn!(route = %key, "Circuit open, failing fast");
        return Envelope::failure(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("circuit open for {}", key.path()),
        )
        .into_response();
    }

    let response = next.run(request).await;
    if response.status().is_server_error() {
        breakers.record_failure(&key);
    } else {
        breakers.record_success(&key);
    }
    response
}
