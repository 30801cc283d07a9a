//! Telemetry plugin for the gateway host.
//!
//! The host calls three hooks, all driven by the namespace stored under
//! [`config::NAMESPACE`] in a service's extra config:
//!
//! - [`logging::new_application_logger`] builds the leveled ECS logger.
//! - [`access::new_access_log`] builds the per-request access-log middleware.
//! - [`lifecycle::register`] installs the OTLP trace pipeline and arranges its
//!   shutdown when the host cancels its signal token.
//!
//! Any hook whose section is absent leaves that concern unconfigured.

pub mod access;
pub mod config;
pub mod lifecycle;
pub mod logging;
pub mod otel;
pub mod propagation;
pub mod shutdown;

pub use access::{access_log, new_access_log, AccessLog, AccessLogFormatter, AccessLogParams};
pub use config::{ConfigError, TelemetryConfig, NAMESPACE};
pub use lifecycle::{register, register_with_grace, RegisterError, Registration};
pub use logging::{new_application_logger, HostLogger, Logger, LoggingError, Severity};
pub use otel::{init_tracing, TracingError, TracingHandle};
pub use shutdown::{ShutdownCoordinator, ShutdownHandle, ShutdownOutcome, ShutdownState};
