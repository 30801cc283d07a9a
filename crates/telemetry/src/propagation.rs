//! Trace-context propagation over HTTP headers.
//!
//! Uses whatever text-map propagator is installed globally; after
//! [`crate::otel::init_tracing`] that is W3C TraceContext + Baggage.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::{
    global,
    propagation::{Extractor, Injector},
    trace::TraceContextExt as _,
    Context,
};
use tracing_opentelemetry::OpenTelemetrySpanExt as _;

/// Read-only view of request headers for the propagator.
pub struct HeaderExtractor<'a>(pub &'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

/// Mutable view of outgoing headers for the propagator.
pub struct HeaderInjector<'a>(pub &'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
            return;
        };
        let Ok(value) = HeaderValue::from_str(&value) else {
            return;
        };
        self.0.insert(name, value);
    }
}

/// Extract the remote trace context carried by `headers`.
pub fn extract_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Inject `cx` into `headers` for an outgoing request.
pub fn inject_context(cx: &Context, headers: &mut HeaderMap) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(cx, &mut HeaderInjector(headers));
    });
}

/// Trace context for the request being handled.
///
/// Prefers the current `tracing` span (when a `tracing-opentelemetry` layer is
/// installed), then the context carried in the request headers. Returns an
/// empty context when neither has a valid span; never fails.
pub fn request_context(headers: &HeaderMap) -> Context {
    let current = tracing::Span::current().context();
    if current.span().span_context().is_valid() {
        return current;
    }
    extract_context(headers)
}
