//! Shared fixtures for the telemetry integration tests.

use std::{fmt, sync::Mutex};

use common::{ExtraConfig, ServiceConfig};
use telemetry::{HostLogger, NAMESPACE};

/// Host logger that keeps every message in memory.
#[derive(Default)]
pub struct RecordingLogger {
    lines: Mutex<Vec<(&'static str, String)>>,
}

#[allow(dead_code)]
impl RecordingLogger {
    pub fn lines(&self) -> Vec<(&'static str, String)> {
        self.lines.lock().unwrap().clone()
    }

    pub fn at(&self, level: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    fn record(&self, level: &'static str, message: &dyn fmt::Display) {
        self.lines.lock().unwrap().push((level, message.to_string()));
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

/// A service whose extra config holds `namespace` under the telemetry key.
pub fn service_with(namespace: serde_json::Value) -> ServiceConfig {
    let mut extra = ExtraConfig::new();
    extra.insert(NAMESPACE.into(), namespace);
    ServiceConfig::default().with_extra_config(extra)
}
