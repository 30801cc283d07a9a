//! Service-wide configuration document handed to plugins by the host.
//!
//! Plugins never see the host's full configuration schema. They receive the
//! [`ExtraConfig`] map and look up their own namespace key inside it.

use serde::{Deserialize, Serialize};

/// Untyped per-service "extra config": namespace key → arbitrary nested value.
pub type ExtraConfig = serde_json::Map<String, serde_json::Value>;

/// Service configuration as seen by plugins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Human-readable service name.
    #[serde(default = "default_name")]
    pub name: String,

    /// Port the HTTP server listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// `EnvFilter` directive for the host's own diagnostic log.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Namespaced plugin settings.
    #[serde(default)]
    pub extra_config: ExtraConfig,
}

fn default_name() -> String {
    "gateway".into()
}
fn default_port() -> u16 {
    8080
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            log_level: default_log_level(),
            extra_config: ExtraConfig::new(),
        }
    }
}

impl ServiceConfig {
    /// Return a copy of this configuration with `extra_config` replaced.
    pub fn with_extra_config(mut self, extra_config: ExtraConfig) -> Self {
        self.extra_config = extra_config;
        self
    }
}
