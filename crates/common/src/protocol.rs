//! Response bodies served by the gateway host itself.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"not_found"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status: `"ok"` or `"shutting_down"`.
    pub status: String,
    /// Whether a trace export pipeline is installed.
    pub tracing_enabled: bool,
    /// Whether per-request access logging is active.
    pub access_log_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_new() {
        let e = ErrorResponse::new("not_found", "no such route");
        assert_eq!(e.code, "not_found");
        assert!(e.message.contains("no such route"));
    }

    #[test]
    fn health_response_field_names() {
        let h = HealthResponse {
            status: "ok".into(),
            tracing_enabled: true,
            access_log_enabled: false,
        };
        let value = serde_json::to_value(&h).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["tracing_enabled"], true);
        assert_eq!(value["access_log_enabled"], false);
    }
}
