//! `gateway`: HTTP host binary wiring in the telemetry plugin.
//!
//! Startup sequence:
//! 1. Load and validate [`ServiceConfig`] from file and environment.
//! 2. Build the application logger from the telemetry namespace.
//! 3. Register the trace pipeline and its shutdown watcher.
//! 4. Install the host's `tracing` subscriber.
//! 5. Build the access-log middleware.
//! 6. Build the Axum router and serve until a termination signal.
//! 7. Once the server has drained, stop and flush the trace pipeline.

mod config;
mod server;
mod signals;
mod subscriber;

use std::net::SocketAddr;

use anyhow::Result;
use common::ServiceConfig;
use telemetry::{
    new_access_log, new_application_logger, register, AccessLog, ConfigError, HostLogger,
    Logger, LoggingError, RegisterError, Registration,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg: ServiceConfig = config::load().map_err(|e| {
        // No logger exists yet; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Application logger
    // -----------------------------------------------------------------------
    let logger = match new_application_logger(&cfg.extra_config) {
        Ok(logger) => Some(logger),
        Err(LoggingError::MissingSection | LoggingError::Config(ConfigError::NoConfig)) => None,
        Err(e) => {
            eprintln!("ERROR: telemetry logging invalid: {e}");
            return Err(e.into());
        }
    };

    // -----------------------------------------------------------------------
    // 3. Trace pipeline
    // -----------------------------------------------------------------------
    // `shutdown` drains HTTP; `trace_shutdown` stops the pipeline afterwards.
    let shutdown = CancellationToken::new();
    let trace_shutdown = CancellationToken::new();
    let host_log: &dyn HostLogger = match &logger {
        Some(logger) => logger,
        None => &telemetry::logging::TracingLogger,
    };
    let registration = match register(trace_shutdown.clone(), &cfg, host_log) {
        Ok(registration) => Some(registration),
        Err(RegisterError::MissingTracing | RegisterError::Config(ConfigError::NoConfig)) => None,
        Err(e) => match &logger {
            Some(logger) => logger.fatal(format!("telemetry: {e}")),
            None => return Err(e.into()),
        },
    };

    // -----------------------------------------------------------------------
    // 4. Host subscriber
    // -----------------------------------------------------------------------
    subscriber::init_subscriber(
        &cfg.log_level,
        registration.as_ref().map(|r| &r.tracing),
    )?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        service = %cfg.name,
        port = cfg.port,
        "gateway starting"
    );

    // -----------------------------------------------------------------------
    // 5. Access log
    // -----------------------------------------------------------------------
    let access = match &logger {
        Some(logger) => access_log_for(&cfg, logger.clone())?,
        None => None,
    };

    // -----------------------------------------------------------------------
    // 6. HTTP server
    // -----------------------------------------------------------------------
    let state = AppState::new(registration.is_some(), access.is_some(), shutdown.clone());
    let router = server::router::build(state, access, config::request_timeout(&cfg));

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = signals::cancel_after(
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signals::shutdown_signal(shutdown.clone())),
        trace_shutdown,
    )
    .await;

    // -----------------------------------------------------------------------
    // 7. Trace flush
    // -----------------------------------------------------------------------
    if let Some(Registration { shutdown, .. }) = registration {
        let outcome = shutdown.wait().await;
        info!(?outcome, "trace pipeline shutdown finished");
    }

    served?;
    Ok(())
}

fn access_log_for(cfg: &ServiceConfig, logger: Logger) -> Result<Option<AccessLog>> {
    match new_access_log(&cfg.extra_config, logger) {
        Ok(access) => Ok(access),
        Err(ConfigError::NoConfig) => {
            warn!("telemetry: access log disabled, namespace unavailable");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
