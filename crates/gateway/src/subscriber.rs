//! Process-wide `tracing` subscriber for the host's own diagnostics.
//!
//! The telemetry plugin's loggers write through their own dispatchers; this
//! subscriber carries the host's `tracing` events and, when a pipeline was
//! registered, bridges request spans into OpenTelemetry.

use anyhow::{Context, Result};
use telemetry::TracingHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `log_level` when set.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_subscriber(log_level: &str, tracing: Option<&TracingHandle>) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let otel_layer =
        tracing.map(|handle| tracing_opentelemetry::layer().with_tracer(handle.tracer("gateway")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .with(otel_layer)
        .try_init()
        .context("failed to initialise tracing subscriber")?;

    Ok(())
}
