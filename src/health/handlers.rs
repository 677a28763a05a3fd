//! Health endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::http::server::AppState;

/// `GET /health/ready`: 200 when every check passes, 503 otherwise.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.readiness().await;
    let status = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// `GET /health/live`: the process is up.
pub async fn liveness() -> impl IntoResponse {
    Json(json!({ "status": "alive" }))
}
