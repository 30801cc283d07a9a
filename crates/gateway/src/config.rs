//! Configuration loading and validation for the gateway host.
//!
//! Values come from an optional JSON file (path in `GATEWAY_CONFIG`, default
//! `gateway.json`) overlaid with `GATEWAY_*` environment variables. Nested
//! keys use a double underscore, e.g. `GATEWAY_EXTRA_CONFIG__...`.

use std::time::Duration;

use anyhow::{Context, Result};
use common::ServiceConfig;
use config::{Environment, File, FileFormat};

/// Config file used when `GATEWAY_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "gateway.json";

/// Load and validate the service configuration.
///
/// # Errors
///
/// Returns an error if a source cannot be read or parsed, or if validation
/// fails.
pub fn load() -> Result<ServiceConfig> {
    let path = std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    load_from(&path)
}

/// Load from `path` (if it exists) plus the environment.
///
/// # Errors
///
/// See [`load`].
pub fn load_from(path: &str) -> Result<ServiceConfig> {
    let cfg = config::Config::builder()
        .add_source(File::new(path, FileFormat::Json).required(false))
        .add_source(
            Environment::with_prefix("GATEWAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("failed to build configuration from {path}"))?;

    let service: ServiceConfig = cfg
        .try_deserialize()
        .context("failed to deserialise configuration")?;

    validate(&service)?;
    Ok(service)
}

/// Per-request timeout derived from the service configuration.
pub fn request_timeout(service: &ServiceConfig) -> Duration {
    Duration::from_secs(service.timeout_secs)
}

fn validate(service: &ServiceConfig) -> Result<()> {
    if service.name.trim().is_empty() {
        anyhow::bail!("name is required and must not be empty");
    }
    if service.port == 0 {
        anyhow::bail!("port must be > 0");
    }
    if service.timeout_secs == 0 {
        anyhow::bail!("timeout_secs must be > 0");
    }
    Ok(())
}
