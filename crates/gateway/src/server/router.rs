//! Axum router construction.

use std::time::Duration;

use axum::{middleware::from_fn_with_state, routing::get, Router};
use telemetry::{access_log, AccessLog};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use super::{handlers, middleware, state::AppState};

/// Build the application [`Router`] with all routes and middleware attached.
///
/// The access log, when present, runs inside the request span so its lines
/// carry the span's trace and span ids.
pub fn build(state: AppState, access: Option<AccessLog>, request_timeout: Duration) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found);

    if let Some(access) = access {
        router = router.layer(from_fn_with_state(access, access_log));
    }

    router
        .layer(TraceLayer::new_for_http().make_span_with(middleware::make_request_span))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}
