//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ingress_requests_total` (counter): requests by route, method, status
//! - `ingress_request_duration_seconds` (histogram): latency distribution
//! - `ingress_rate_limited_total` (counter): rejected by the limiter
//! - `ingress_breaker_transitions_total` (counter): breaker state changes
//! - `ingress_breaker_short_circuits_total` (counter): calls refused while open
//! - `ingress_backlog_depth` (gauge) / `ingress_backlog_alerts_total` (counter)
//! - `ingress_spool_size` (gauge), `ingress_spool_{dropped,discarded,delivered}_total`
//! - `ingress_callbacks_total` (counter): ingestion outcomes
//! - `ingress_publish_failures_total` (counter): best-effort publish failures
//!
//! Recording is a no-op until an exporter is installed.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::resilience::circuit_breaker::CircuitState;
use crate::routing::RouteKey;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, route: &str, status: u16, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("route", route.to_string()),
        ("status", status.to_string()),
    ];
    counter!("ingress_requests_total", &labels).increment(1);
    histogram!("ingress_request_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(key: &RouteKey) {
    counter!("ingress_rate_limited_total", "route" => key.path().to_string()).increment(1);
}

pub fn record_breaker_transition(key: &RouteKey, to: CircuitState) {
    counter!(
        "ingress_breaker_transitions_total",
        "route" => key.path().to_string(),
        "to" => to.as_str()
    )
    .increment(1);
}

pub fn record_breaker_short_circuit(key: &RouteKey) {
    counter!("ingress_breaker_short_circuits_total", "route" => key.path().to_string())
        .increment(1);
}

pub fn record_backlog_depth(depth: u64) {
    gauge!("ingress_backlog_depth").set(depth as f64);
}

pub fn record_backlog_alert() {
    counter!("ingress_backlog_alerts_total").increment(1);
}

pub fn record_spool_size(size: usize) {
    gauge!("ingress_spool_size").set(size as f64);
}

pub fn record_spool_dropped() {
    counter!("ingress_spool_dropped_total").increment(1);
}

pub fn record_spool_discarded(count: u64) {
    counter!("ingress_spool_discarded_total").increment(count);
}

pub fn record_spool_delivered(count: u64) {
    counter!("ingress_spool_delivered_total").increment(count);
}

pub fn record_callback(outcome: &'static str) {
    counter!("ingress_callbacks_total", "outcome" => outcome).increment(1);
}

pub fn record_publish_failure(publisher: &'static str) {
    counter!("ingress_publish_failures_total", "publisher" => publisher).increment(1);
}
