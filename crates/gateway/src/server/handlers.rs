//! Axum request handlers for the host's own endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{ErrorResponse, HealthResponse};

use super::state::AppState;

/// `GET /health`: liveness check.
///
/// Returns `200 OK` while serving and `503 Service Unavailable` once
/// shutdown has begun, so load balancers drain the instance.
pub async fn health(State(state): State<AppState>) -> Response {
    let (status_code, status_str) = if state.shutdown.is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting_down")
    } else {
        (StatusCode::OK, "ok")
    };

    let body = HealthResponse {
        status: status_str.into(),
        tracing_enabled: state.tracing_enabled,
        access_log_enabled: state.access_log_enabled,
    };
    (status_code, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}
