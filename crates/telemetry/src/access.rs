//! Per-request ECS access log.
//!
//! [`AccessLogFormatter`] turns one completed request into one log line.
//! [`access_log`] is the axum middleware that gathers the request data, skips
//! configured paths, and calls the formatter after the response is produced.
//!
//! ```ignore
//! let access = AccessLog::from_config(&logging_cfg, logger);
//! let router = Router::new()
//!     .route("/", get(handler))
//!     .layer(axum::middleware::from_fn_with_state(access, access_log));
//! ```

use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, SecondsFormat, Utc};
use opentelemetry::{trace::TraceContextExt as _, Context};

use common::ExtraConfig;

use crate::{
    config::{self, ConfigError, LoggingConfig},
    logging::{Logger, Severity},
    propagation,
};

/// Data describing one completed request.
#[derive(Debug, Clone)]
pub struct AccessLogParams {
    pub method: String,
    pub host: String,
    /// Request path, with the raw query appended when present.
    pub path: String,
    pub status: u16,
    pub user_agent: String,
    pub client_ip: String,
    pub latency: Duration,
    /// When the response was produced.
    pub timestamp: DateTime<Utc>,
    /// Trace context of the request; may be empty.
    pub trace_context: Context,
}

/// Emits one ECS line per completed request through a shared [`Logger`].
///
/// Holds no per-request state; safe to call from any number of tasks.
#[derive(Debug, Clone)]
pub struct AccessLogFormatter {
    logger: Logger,
}

impl AccessLogFormatter {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    /// Write the access line for `params` at info severity.
    pub fn format(&self, params: &AccessLogParams) {
        if !self.logger.enabled(Severity::Info) {
            return;
        }

        let span = params.trace_context.span();
        let span_context = span.span_context();
        let latency =
            chrono::Duration::from_std(params.latency).unwrap_or_else(|_| chrono::Duration::zero());
        let start = params.timestamp - latency;
        let duration_ns = u64::try_from(params.latency.as_nanos()).unwrap_or(u64::MAX);

        self.logger.in_scope(|| {
            tracing::info!(
                "module" = self.logger.module(),
                "http.request.method" = %params.method,
                "http.hostname" = %params.host,
                "url.original" = %params.path,
                "http.response.status_code" = params.status,
                "user_agent.original" = %params.user_agent,
                "source.ip" = %params.client_ip,
                "event.kind" = "event",
                "event.category" = "web",
                "event.type" = "access",
                "event.duration" = duration_ns,
                "event.start" = %start.to_rfc3339_opts(SecondsFormat::Nanos, true),
                "event.end" = %params.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
                "span.id" = %span_context.span_id(),
                "trace.id" = %span_context.trace_id(),
                "{} {}",
                params.method,
                params.path,
            );
        });
    }
}

/// Access-log state for [`access_log`]: the formatter plus the skip list.
#[derive(Debug, Clone)]
pub struct AccessLog {
    formatter: Arc<AccessLogFormatter>,
    skip_paths: Arc<HashSet<String>>,
}

impl AccessLog {
    pub fn new(logger: Logger, skip_paths: impl IntoIterator<Item = String>) -> Self {
        Self {
            formatter: Arc::new(AccessLogFormatter::new(logger)),
            skip_paths: Arc::new(skip_paths.into_iter().collect()),
        }
    }

    /// Build from a resolved logging section, logging the skip-path count.
    pub fn from_config(cfg: &LoggingConfig, logger: Logger) -> Self {
        logger.info(format!(
            "telemetry: total skip paths set: {}",
            cfg.skip_paths.len()
        ));
        Self::new(logger, cfg.skip_paths.iter().cloned())
    }

    /// Whether requests to `path` bypass the access log.
    pub fn skips(&self, path: &str) -> bool {
        self.skip_paths.contains(path)
    }

    pub fn formatter(&self) -> &AccessLogFormatter {
        &self.formatter
    }
}

/// Access-log hook: build the middleware state from the service's extra config.
///
/// Returns `Ok(None)` when the namespace has no `logging` section, leaving
/// the router unchanged.
///
/// # Errors
///
/// Propagates [`ConfigError`] from resolution.
pub fn new_access_log(
    extra: &ExtraConfig,
    logger: Logger,
) -> Result<Option<AccessLog>, ConfigError> {
    let resolved = config::resolve(extra)?;
    Ok(resolved
        .logging
        .map(|cfg| AccessLog::from_config(&cfg, logger)))
}

/// Axum middleware writing one access line per completed request.
///
/// Use with [`axum::middleware::from_fn_with_state`].
pub async fn access_log(State(access): State<AccessLog>, request: Request, next: Next) -> Response {
    if access.skips(request.uri().path()) {
        return next.run(request).await;
    }

    let started = Instant::now();
    let method = request.method().to_string();
    let path = match request.uri().query() {
        Some(query) => format!("{}?{query}", request.uri().path()),
        None => request.uri().path().to_owned(),
    };
    let host = request_host(&request);
    let user_agent = header_str(request.headers(), header::USER_AGENT.as_str())
        .unwrap_or_default()
        .to_owned();
    let client_ip = client_ip(&request);
    let trace_context = propagation::request_context(request.headers());

    let response = next.run(request).await;

    let params = AccessLogParams {
        method,
        host,
        path,
        status: response.status().as_u16(),
        user_agent,
        client_ip,
        latency: started.elapsed(),
        timestamp: Utc::now(),
        trace_context,
    };
    access.formatter().format(&params);

    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn request_host(request: &Request) -> String {
    header_str(request.headers(), header::HOST.as_str())
        .map(str::to_owned)
        .or_else(|| request.uri().authority().map(ToString::to_string))
        .unwrap_or_default()
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// socket peer. Empty when none is known.
fn client_ip(request: &Request) -> String {
    let headers = request.headers();
    if let Some(first) = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_owned();
    }
    if let Some(real_ip) = header_str(headers, "x-real-ip")
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return real_ip.to_owned();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}
