//! Register hook: tracing pipeline plus its shutdown watcher.
//!
//! # Responsibilities
//! - Resolve the telemetry namespace from the service's extra config
//! - Install the OTLP pipeline as the process-wide tracer provider
//! - Arrange a single flush-and-stop when the host cancels its signal token
//!
//! Failures are reported through the host logger and returned; the host
//! decides whether to keep serving without tracing.

use std::{sync::Arc, time::Duration};

use common::ServiceConfig;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{self, ConfigError},
    logging::HostLogger,
    otel::{self, TracingError, TracingHandle},
    shutdown::{ShutdownCoordinator, ShutdownHandle, DEFAULT_GRACE},
};

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no tracing section configured")]
    MissingTracing,

    #[error(transparent)]
    Tracing(#[from] TracingError),
}

/// Result of a successful [`register`].
#[derive(Debug)]
pub struct Registration {
    pub tracing: TracingHandle,
    pub shutdown: ShutdownHandle,
}

/// Initialise tracing for `service` and stop it when `signal` is cancelled.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns [`RegisterError::Config`] if the namespace does not resolve,
/// [`RegisterError::MissingTracing`] if it has no `tracing` section, and
/// [`RegisterError::Tracing`] if the pipeline cannot be built. In every case
/// no global state has been changed and no shutdown task is running.
pub fn register(
    signal: CancellationToken,
    service: &ServiceConfig,
    log: &dyn HostLogger,
) -> Result<Registration, RegisterError> {
    register_with_grace(signal, service, log, DEFAULT_GRACE)
}

/// [`register`] with an explicit grace period for the final flush.
///
/// # Errors
///
/// See [`register`].
pub fn register_with_grace(
    signal: CancellationToken,
    service: &ServiceConfig,
    log: &dyn HostLogger,
    grace: Duration,
) -> Result<Registration, RegisterError> {
    let resolved = config::resolve(&service.extra_config).map_err(|e| {
        log.error(&format_args!("telemetry: {e}"));
        RegisterError::from(e)
    })?;

    let Some(tracing_cfg) = resolved.tracing else {
        log.debug(&"telemetry: tracing section absent, tracing disabled");
        return Err(RegisterError::MissingTracing);
    };

    let handle = otel::init_tracing(&tracing_cfg).map_err(|e| {
        log.error(&format_args!("telemetry: unable to initialise tracing: {e}"));
        RegisterError::from(e)
    })?;

    log.info(&format_args!(
        "telemetry: exporting spans for {} to {}",
        tracing_cfg.attributes.service, tracing_cfg.export_url
    ));

    let shutdown = ShutdownCoordinator::spawn(Arc::new(handle.clone()), signal, grace);
    Ok(Registration {
        tracing: handle,
        shutdown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fmt, sync::Mutex};

    use serde_json::json;

    #[derive(Default)]
    struct RecordingLogger {
        lines: Mutex<Vec<(&'static str, String)>>,
    }

    impl RecordingLogger {
        fn record(&self, level: &'static str, message: &dyn fmt::Display) {
            self.lines.lock().unwrap().push((level, message.to_string()));
        }

        fn lines(&self) -> Vec<(&'static str, String)> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl HostLogger for RecordingLogger {
        fn debug(&self, message: &dyn fmt::Display) {
            self.record("debug", message);
        }
        fn info(&self, message: &dyn fmt::Display) {
            self.record("info", message);
        }
        fn warning(&self, message: &dyn fmt::Display) {
            self.record("warning", message);
        }
        fn error(&self, message: &dyn fmt::Display) {
            self.record("error", message);
        }
        fn critical(&self, message: &dyn fmt::Display) {
            self.record("critical", message);
        }
        fn fatal(&self, message: &dyn fmt::Display) -> ! {
            panic!("fatal: {message}");
        }
    }

    fn service(namespace: serde_json::Value) -> ServiceConfig {
        let mut extra = common::ExtraConfig::new();
        extra.insert(config::NAMESPACE.into(), namespace);
        ServiceConfig::default().with_extra_config(extra)
    }

    #[test]
    fn missing_namespace_is_reported() {
        let log = RecordingLogger::default();
        let err =
            register(CancellationToken::new(), &ServiceConfig::default(), &log).unwrap_err();
        assert!(matches!(err, RegisterError::Config(ConfigError::NoConfig)));
        assert_eq!(log.lines()[0].0, "error");
    }

    #[test]
    fn missing_tracing_section_is_reported() {
        let log = RecordingLogger::default();
        let svc = service(json!({"logging": {"level": "INFO", "module": "svc"}}));
        let err = register(CancellationToken::new(), &svc, &log).unwrap_err();
        assert!(matches!(err, RegisterError::MissingTracing));
    }

    #[test]
    fn malformed_tracing_section_is_reported() {
        let log = RecordingLogger::default();
        let svc = service(json!({"tracing": {"attributes": {"service": 7}}}));
        let err = register(CancellationToken::new(), &svc, &log).unwrap_err();
        assert!(matches!(err, RegisterError::Config(ConfigError::Malformed(_))));
        assert!(log.lines()[0].1.contains("exporter_url"), "{:?}", log.lines());
    }

    #[test]
    fn invalid_exporter_url_is_reported() {
        let log = RecordingLogger::default();
        let svc = service(json!({"tracing": {"exporter_url": "collector without scheme"}}));
        let err = register(CancellationToken::new(), &svc, &log).unwrap_err();
        assert!(matches!(
            err,
            RegisterError::Tracing(TracingError::InvalidEndpoint { .. })
        ));
        let lines = log.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, "error");
        assert!(lines[0].1.contains("unable to initialise tracing"));
    }
}
