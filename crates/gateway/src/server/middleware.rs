//! Axum middleware layers applied to the router.
//!
//! Request spans continue the caller's trace when a `traceparent` header is
//! present.

use axum::{body::Body, http::Request};
use telemetry::propagation;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt as _;

/// Span factory for [`tower_http::trace::TraceLayer`].
pub fn make_request_span(request: &Request<Body>) -> Span {
    let span = tracing::info_span!(
        "http.request",
        http.request.method = %request.method(),
        url.path = %request.uri().path(),
    );
    span.set_parent(propagation::extract_context(request.headers()));
    span
}
