use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::error::ApiError;
use crate::http::response::Envelope;
use crate::http::server::AppState;
use crate::queue::CANCEL_TASK_JOB;
use crate::resilience::timeouts::with_timeout;

const MAX_TASK_ID_LEN: usize = 128;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAccepted {
    pub job_id: String,
    pub task_id: String,
}

/// `POST /tasks/{task_id}/cancel`
pub async fn cancel_task(
    State(state): State<AppState>,
    task_id: Result<Path<String>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(task_id) = task_id.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    let task_id = task_id.trim();
    if task_id.is_empty()
        || task_id.len() > MAX_TASK_ID_LEN
        || !task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        return Err(ApiError::Validation(format!("invalid task id '{}'", task_id)));
    }

    let payload = json!({
        "taskId": task_id,
        "requestedAt": Utc::now(),
    });
    let job = with_timeout(state.downstream_timeout, state.queue.add_job(CANCEL_TASK_JOB, payload))
        .await
        .map_err(|e| {
            tracing::warn!(task_id = %task_id, error = %e, "Failed to enqueue cancellation");
            ApiError::Unavailable(format!("job queue unavailable: {}", e))
        })?;

    tracing::info!(task_id = %task_id, job_id = %job.id, "Task cancellation queued");
    Ok(Envelope::with_status(
        StatusCode::ACCEPTED,
        CancelAccepted {
            job_id: job.id,
            task_id: task_id.to_string(),
        },
    )
    .into_response())
}
