//! Shared application state injected into every Axum handler.

use tokio_util::sync::CancellationToken;

/// Application state shared across all request handlers.
#[derive(Clone, Default)]
pub struct AppState {
    /// Whether a trace export pipeline was registered.
    pub tracing_enabled: bool,
    /// Whether the access-log middleware is mounted.
    pub access_log_enabled: bool,
    /// Cancelled once the process starts shutting down.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        tracing_enabled: bool,
        access_log_enabled: bool,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            tracing_enabled,
            access_log_enabled,
            shutdown,
        }
    }
}
