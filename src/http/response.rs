//! Uniform response envelope.
//!
//! Every API response has the shape `{success, data|message, code}` and the
//! HTTP status always mirrors `code`, so callers branch on one structure.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub code: u16,
}

impl<T: Serialize> Envelope<T> {
    /// Successful response with HTTP 200.
    pub fn ok(data: T) -> Self {
        Self::with_status(StatusCode::OK, data)
    }

    /// Successful response with an explicit status (e.g. 202 Accepted).
    pub fn with_status(status: StatusCode, data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            code: status.as_u16(),
        }
    }
}

impl Envelope<()> {
    pub fn failure(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            code: status.as_u16(),
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Re-wrap error responses produced outside the handlers (body limit,
/// request timeout, unmatched route, wrong method) in the envelope.
///
/// JSON responses pass through untouched.
pub async fn envelope_plain_errors(response: Response) -> Response {
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .is_some_and(|v| v.as_bytes().starts_with(b"application/json"));
    if is_json {
        return response;
    }

    let (parts, _) = response.into_parts();
    let reason = status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_ascii_lowercase();
    let mut wrapped = Envelope::failure(status, reason).into_response();
    for (name, value) in parts.headers.iter() {
        if *name != header::CONTENT_TYPE && *name != header::CONTENT_LENGTH {
            wrapped.headers_mut().append(name.clone(), value.clone());
        }
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_omits_data() {
        let env = Envelope::failure(StatusCode::BAD_REQUEST, "nope");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "message": "nope", "code": 400}));
    }

    async fn body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_plain_timeout_is_wrapped() {
        let plain = StatusCode::REQUEST_TIMEOUT.into_response();
        let response = envelope_plain_errors(plain).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            body(response).await,
            serde_json::json!({"success": false, "message": "request timeout", "code": 408})
        );
    }

    #[tokio::test]
    async fn test_json_and_success_responses_pass_through() {
        let envelope = Envelope::failure(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded");
        let response = envelope_plain_errors(envelope.into_response()).await;
        assert_eq!(body(response).await["message"], "rate limit exceeded");

        let ok = (StatusCode::OK, "plain").into_response();
        let response = envelope_plain_errors(ok).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"plain");
    }

    #[test]
    fn test_status_mirrors_code() {
        let response = Envelope::with_status(StatusCode::ACCEPTED, "queued").into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
