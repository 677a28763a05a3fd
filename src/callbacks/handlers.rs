//! `/callbacks/scf` endpoints.

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::callbacks::store::{CallbackFilter, PageRequest};
use crate::callbacks::types::CallbackStatus;
use crate::error::ApiError;
use crate::http::response::Envelope;
use crate::http::server::AppState;
use crate::security::signature::SIGNATURE_HEADER;

/// Response header naming how the delivery was resolved.
pub const OUTCOME_HEADER: &str = "x-callback-outcome";

/// `POST /callbacks/scf`
pub async fn receive_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    let outcome = state.pipeline.ingest(&body, signature).await?;

    let mut response = Envelope::ok(outcome.event).into_response();
    response.headers_mut().insert(
        OUTCOME_HEADER,
        HeaderValue::from_static(outcome.state.as_str()),
    );
    Ok(response)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackQuery {
    pub event_id: Option<String>,
    pub task_id: Option<String>,
    pub status: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// `GET /callbacks/scf`: lookup by `eventId`, otherwise a filtered page.
pub async fn query_callbacks(
    State(state): State<AppState>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;

    if let Some(event_id) = query.event_id.as_deref().filter(|id| !id.is_empty()) {
        let event = state.pipeline.find(event_id).await?;
        return Ok(Envelope::ok(event).into_response());
    }

    let status = query
        .status
        .as_deref()
        .map(str::parse::<CallbackStatus>)
        .transpose()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let filter = CallbackFilter {
        task_id: query.task_id.filter(|t| !t.is_empty()),
        status,
    };
    let max = state.config.callbacks.max_page_size.max(1);
    let page = PageRequest::new(
        query.page.unwrap_or(1),
        query.limit.unwrap_or(PageRequest::default().limit).min(max),
    );

    let listing = state.pipeline.list(&filter, page).await?;
    Ok(Envelope::ok(listing).into_response())
}
