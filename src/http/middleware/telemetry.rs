//! Per-request telemetry.
//!
//! Every completed request produces a metrics sample and a
//! [`TelemetryRecord`] handed to the recorder off the request path.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::time::Instant;

use crate::http::request::RequestIdExt;
use crate::observability::metrics;
use crate::spool::{TelemetryRecord, TelemetryRecorder};

pub async fn telemetry_middleware(
    State(recorder): State<TelemetryRecorder>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let request_id = request.request_id().map(str::to_string);

    let response = next.run(request).await;
    let status = response.status().as_u16();

    metrics::record_request(&method, &route, status, start);
    recorder.dispatch(TelemetryRecord {
        route,
        method,
        status,
        latency_ms: start.elapsed().as_millis() as u64,
        request_id,
        recorded_at: Utc::now(),
    });

    response
}
