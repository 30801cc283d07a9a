//! Leveled application logger rendering ECS JSON lines.
//!
//! A [`Logger`] owns its own `tracing` dispatcher, so it works whether or not
//! the host installed a global subscriber. Calls below the configured
//! threshold return before any formatting happens.
//!
//! # Severities
//!
//! | config name | [`Severity`] |
//! |---|---|
//! | `DEBUG` | `Debug` |
//! | `INFO` | `Info` |
//! | `WARNING` | `Warning` |
//! | `ERROR` | `Error` |
//! | `CRITICAL` | `Fatal` |

pub mod ecs;

use std::{fmt, io::Write as _, sync::Arc};

use thiserror::Error;
use tracing::{dispatcher, level_filters::LevelFilter, Dispatch};
use tracing_subscriber::{fmt::MakeWriter, layer::SubscriberExt, Layer};

use crate::config::{self, ConfigError, LoggingConfig};
use common::ExtraConfig;

pub use ecs::{EcsFormatter, FATAL_TARGET};

/// Errors from logger construction.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The configured level is not one of the known severity names.
    #[error("unknown log level: {0}")]
    UnknownLevel(String),

    /// The telemetry namespace could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The namespace resolved but has no `logging` section.
    #[error("telemetry config has no logging section")]
    MissingSection,
}

/// Ordered log severity. `Fatal` is the strictest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Map a configuration level name to a severity.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            "CRITICAL" => Some(Self::Fatal),
            _ => None,
        }
    }

    fn level_filter(self) -> LevelFilter {
        match self {
            Self::Debug => LevelFilter::DEBUG,
            Self::Info => LevelFilter::INFO,
            Self::Warning => LevelFilter::WARN,
            Self::Error | Self::Fatal => LevelFilter::ERROR,
        }
    }
}

/// Logger collaborator handed to lifecycle hooks by the host.
pub trait HostLogger: Send + Sync {
    fn debug(&self, message: &dyn fmt::Display);
    fn info(&self, message: &dyn fmt::Display);
    fn warning(&self, message: &dyn fmt::Display);
    fn error(&self, message: &dyn fmt::Display);
    fn critical(&self, message: &dyn fmt::Display);
    fn fatal(&self, message: &dyn fmt::Display) -> !;
}

/// Leveled logger bound to a module tag.
///
/// Cheap to clone; clones share the same writer and dispatcher.
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
    threshold: Severity,
    module: Arc<str>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("threshold", &self.threshold)
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// Build a logger writing ECS lines to stdout.
    ///
    /// # Errors
    ///
    /// Returns [`LoggingError::UnknownLevel`] if `cfg.level` is not a known
    /// severity name.
    pub fn new(cfg: &LoggingConfig) -> Result<Self, LoggingError> {
        Self::with_writer(cfg, std::io::stdout)
    }

    /// Build a logger writing ECS lines to `make_writer`.
    ///
    /// # Errors
    ///
    /// Returns [`LoggingError::UnknownLevel`] if `cfg.level` is not a known
    /// severity name.
    pub fn with_writer<W>(cfg: &LoggingConfig, make_writer: W) -> Result<Self, LoggingError>
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let threshold = Severity::from_name(&cfg.level)
            .ok_or_else(|| LoggingError::UnknownLevel(cfg.level.clone()))?;

        let formatter = EcsFormatter::new(cfg.ecs_formatter.clone().unwrap_or_default());
        let layer = tracing_subscriber::fmt::layer()
            .event_format(formatter)
            .with_writer(make_writer)
            .with_filter(threshold.level_filter());

        Ok(Self {
            dispatch: Dispatch::new(tracing_subscriber::registry().with(layer)),
            threshold,
            module: Arc::from(cfg.module.as_str()),
        })
    }

    /// Module tag attached to every line.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Configured threshold.
    pub fn threshold(&self) -> Severity {
        self.threshold
    }

    /// Whether a call at `severity` would be written.
    pub fn enabled(&self, severity: Severity) -> bool {
        severity >= self.threshold
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.log(Severity::Debug, &message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(Severity::Info, &message);
    }

    pub fn warning(&self, message: impl fmt::Display) {
        self.log(Severity::Warning, &message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(Severity::Error, &message);
    }

    /// Always written, at error severity.
    pub fn critical(&self, message: impl fmt::Display) {
        self.emit(Severity::Error, &message);
    }

    /// Write the message, flush stdout and exit the process with status 1.
    ///
    /// Only for unrecoverable startup failures.
    pub fn fatal(&self, message: impl fmt::Display) -> ! {
        self.emit(Severity::Fatal, &message);
        let _ = std::io::stdout().flush();
        std::process::exit(1)
    }

    /// Run `f` with this logger's dispatcher as the thread's default.
    ///
    /// Used by the access log to emit its own field set.
    pub(crate) fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        dispatcher::with_default(&self.dispatch, f)
    }

    fn log(&self, severity: Severity, message: &dyn fmt::Display) {
        if !self.enabled(severity) {
            return;
        }
        self.emit(severity, message);
    }

    fn emit(&self, severity: Severity, message: &dyn fmt::Display) {
        let module = &*self.module;
        self.in_scope(|| match severity {
            Severity::Debug => tracing::debug!(module, "{message}"),
            Severity::Info => tracing::info!(module, "{message}"),
            Severity::Warning => tracing::warn!(module, "{message}"),
            Severity::Error => tracing::error!(module, "{message}"),
            Severity::Fatal => tracing::error!(target: FATAL_TARGET, module, "{message}"),
        });
    }
}

impl HostLogger for Logger {
    fn debug(&self, message: &dyn fmt::Display) {
        self.log(Severity::Debug, message);
    }

    fn info(&self, message: &dyn fmt::Display) {
        self.log(Severity::Info, message);
    }

    fn warning(&self, message: &dyn fmt::Display) {
        self.log(Severity::Warning, message);
    }

    fn error(&self, message: &dyn fmt::Display) {
        self.log(Severity::Error, message);
    }

    fn critical(&self, message: &dyn fmt::Display) {
        self.emit(Severity::Error, message);
    }

    fn fatal(&self, message: &dyn fmt::Display) -> ! {
        Logger::fatal(self, message)
    }
}

/// [`HostLogger`] forwarding to whatever global `tracing` subscriber is set.
///
/// For hosts that run without a telemetry `logging` section.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl HostLogger for TracingLogger {
    fn debug(&self, message: &dyn fmt::Display) {
        tracing::debug!("{message}");
    }

    fn info(&self, message: &dyn fmt::Display) {
        tracing::info!("{message}");
    }

    fn warning(&self, message: &dyn fmt::Display) {
        tracing::warn!("{message}");
    }

    fn error(&self, message: &dyn fmt::Display) {
        tracing::error!("{message}");
    }

    fn critical(&self, message: &dyn fmt::Display) {
        tracing::error!("{message}");
    }

    fn fatal(&self, message: &dyn fmt::Display) -> ! {
        tracing::error!(target: FATAL_TARGET, "{message}");
        let _ = std::io::stdout().flush();
        std::process::exit(1)
    }
}

/// Resolve the telemetry namespace and build the application logger.
///
/// # Errors
///
/// Returns [`LoggingError::Config`] if the namespace cannot be resolved,
/// [`LoggingError::MissingSection`] if it has no `logging` section, and
/// [`LoggingError::UnknownLevel`] for an unrecognised level.
pub fn new_application_logger(extra: &ExtraConfig) -> Result<Logger, LoggingError> {
    let telemetry = config::resolve(extra)?;
    let logging = telemetry.logging.ok_or(LoggingError::MissingSection)?;
    Logger::new(&logging)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory writer for asserting on rendered lines.

    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use serde_json::Value;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    pub(crate) struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl CaptureWriter {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }

        /// Parse every non-empty line as a JSON object.
        pub(crate) fn lines(&self) -> Vec<Value> {
            self.contents()
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    impl io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CaptureWriter {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }
}
