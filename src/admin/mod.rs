//! Operator API.
//!
//! Read-only views of breaker, backlog and spool state behind a bearer key.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/backlog", get(get_backlog))
        .route("/admin/spool", get(get_spool))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
