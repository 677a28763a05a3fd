use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::response::Envelope;
use crate::http::server::AppState;

pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let expected = &state.config.admin.api_key;
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if !expected.is_empty() && token == expected => next.run(request).await,
        _ => {
            tracing::warn!(path = %request.uri().path(), "Rejected admin request");
            Envelope::failure(StatusCode::UNAUTHORIZED, "invalid admin credentials").into_response()
        }
    }
}
