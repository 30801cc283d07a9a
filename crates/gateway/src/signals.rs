//! OS signal handling.
//!
//! Ctrl-C and SIGTERM cancel the server token, which starts the graceful
//! drain. The telemetry shutdown watcher has its own token, cancelled by
//! [`cancel_after`] once the server has returned, so spans from requests
//! still in flight at signal time are exported.

use std::future::IntoFuture;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Resolve when a termination signal arrives or `token` is cancelled
/// elsewhere, cancelling `token` on the way out.
pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
        _ = token.cancelled() => info!("shutdown requested"),
    }

    token.cancel();
}

/// Await `serve`, then cancel `after`.
pub async fn cancel_after<F: IntoFuture>(serve: F, after: CancellationToken) -> F::Output {
    let output = serve.await;
    after.cancel();
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_when_token_cancelled() {
        let token = CancellationToken::new();
        let waiter = tokio::spawn(shutdown_signal(token.clone()));

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("shutdown_signal did not resolve")
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn trace_token_outlives_http_drain() {
        let http = CancellationToken::new();
        let trace = CancellationToken::new();

        let drain = {
            let http = http.clone();
            let trace = trace.clone();
            async move {
                http.cancelled().await;
                tokio::time::sleep(Duration::from_millis(50)).await;
                // Requests still draining must find the trace token intact.
                assert!(!trace.is_cancelled());
                "drained"
            }
        };

        http.cancel();
        assert_eq!(cancel_after(drain, trace.clone()).await, "drained");
        assert!(trace.is_cancelled());
    }
}
