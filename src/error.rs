//! Request-facing error taxonomy.
//!
//! Every failure that reaches an HTTP caller is one of these variants and is
//! rendered through the shared response envelope. Downstream failures that
//! must never surface (storage probe, publication) have their own error types
//! and are downgraded to warnings where they occur.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::http::response::Envelope;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Structurally invalid input.
    #[error("{0}")]
    Validation(String),

    /// Missing or mismatched signature.
    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    NotFound(String),

    /// Structurally valid but rejected by business rules.
    #[error("{0}")]
    SemanticRejection(String),

    /// A required collaborator is unreachable or a breaker is open.
    #[error("{0}")]
    Unavailable(String),

    /// The datastore failed; surfaced to the caller as a 500.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::SemanticRejection(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind, used for metrics labels and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::Auth(_) => "auth",
            ApiError::NotFound(_) => "not_found",
            ApiError::SemanticRejection(_) => "semantic_rejection",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::Persistence(_) => "persistence",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Datastore details stay in the logs.
            ApiError::Persistence(detail) => {
                tracing::error!(error = %detail, "Persistence failure surfaced to caller");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        Envelope::failure(status, message).into_response()
    }
}
