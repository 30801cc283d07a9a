//! Stop the trace pipeline once, when the host signals shutdown.
//!
//! [`ShutdownCoordinator::spawn`] parks a task on a [`CancellationToken`].
//! When the token is cancelled the pipeline is flushed and shut down on a
//! dedicated thread, bounded by a grace period. A flush still running when the
//! grace period ends is abandoned and does not hold the runtime open. Cancelling
//! again, or from several places at once, never runs the shutdown a second time.

use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use opentelemetry::trace::TraceError;
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Grace period used by [`crate::lifecycle::register`].
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Something that can flush and stop span export.
#[cfg_attr(test, mockall::automock)]
pub trait TracePipeline: Send + Sync + 'static {
    /// Flush buffered spans and release exporter resources. Blocking.
    fn shutdown(&self) -> Result<(), TraceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownState {
    Running = 0,
    ShuttingDown = 1,
    Stopped = 2,
}

impl ShutdownState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }
}

/// How the shutdown task finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The pipeline flushed and stopped cleanly.
    Completed,
    /// The pipeline reported an error; it is logged and carried here.
    Failed(String),
    /// The grace period elapsed first. Unexported spans may be lost.
    TimedOut,
    /// Another caller had already started the shutdown.
    Skipped,
}

pub struct ShutdownCoordinator {
    pipeline: Arc<dyn TracePipeline>,
    state: Arc<AtomicU8>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Start the task that waits on `signal` and then stops `pipeline`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        pipeline: Arc<dyn TracePipeline>,
        signal: CancellationToken,
        grace: Duration,
    ) -> ShutdownHandle {
        let state = Arc::new(AtomicU8::new(ShutdownState::Running as u8));
        let coordinator = Self {
            pipeline,
            state: state.clone(),
            grace,
        };

        let waiter = signal.clone();
        let task = tokio::spawn(async move {
            waiter.cancelled().await;
            coordinator.run_once().await
        });

        ShutdownHandle {
            state,
            signal,
            task,
        }
    }

    async fn run_once(&self) -> ShutdownOutcome {
        if self
            .state
            .compare_exchange(
                ShutdownState::Running as u8,
                ShutdownState::ShuttingDown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return ShutdownOutcome::Skipped;
        }

        info!(grace_ms = millis(self.grace), "shutting down trace pipeline");

        let outcome = match self.start_flush() {
            Ok(result) => self.await_flush(result).await,
            Err(e) => {
                error!(error = %e, "unable to start trace pipeline shutdown thread");
                ShutdownOutcome::Failed(e.to_string())
            }
        };

        self.state.store(ShutdownState::Stopped as u8, Ordering::Release);
        outcome
    }

    /// Run the blocking shutdown on a detached thread.
    ///
    /// The runtime never joins this thread, so an overrunning flush cannot
    /// delay runtime teardown.
    fn start_flush(&self) -> std::io::Result<oneshot::Receiver<Result<(), TraceError>>> {
        let (tx, rx) = oneshot::channel();
        let pipeline = Arc::clone(&self.pipeline);
        std::thread::Builder::new()
            .name("trace-shutdown".into())
            .spawn(move || {
                let _ = tx.send(pipeline.shutdown());
            })?;
        Ok(rx)
    }

    async fn await_flush(
        &self,
        result: oneshot::Receiver<Result<(), TraceError>>,
    ) -> ShutdownOutcome {
        match tokio::time::timeout(self.grace, result).await {
            Ok(Ok(Ok(()))) => {
                info!("trace pipeline stopped");
                ShutdownOutcome::Completed
            }
            Ok(Ok(Err(e))) => {
                error!(error = %e, "trace pipeline shutdown failed");
                ShutdownOutcome::Failed(e.to_string())
            }
            Ok(Err(_)) => {
                error!("trace pipeline shutdown thread exited without a result");
                ShutdownOutcome::Failed("trace pipeline shutdown thread panicked".into())
            }
            Err(_) => {
                error!(
                    grace_ms = millis(self.grace),
                    "trace pipeline shutdown exceeded grace period"
                );
                ShutdownOutcome::TimedOut
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Handle to a spawned [`ShutdownCoordinator`] task.
#[derive(Debug)]
pub struct ShutdownHandle {
    state: Arc<AtomicU8>,
    signal: CancellationToken,
    task: JoinHandle<ShutdownOutcome>,
}

impl ShutdownHandle {
    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Cancel the signal token. Idempotent.
    pub fn trigger(&self) {
        self.signal.cancel();
    }

    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    /// Wait for the shutdown task to finish.
    ///
    /// Only returns after the signal has been cancelled.
    pub async fn wait(self) -> ShutdownOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => ShutdownOutcome::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::atomic::AtomicUsize, time::Instant};

    fn counting_pipeline(
        calls: Arc<AtomicUsize>,
        result: fn() -> Result<(), TraceError>,
    ) -> MockTracePipeline {
        let mut pipeline = MockTracePipeline::new();
        pipeline.expect_shutdown().times(1).returning(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            result()
        });
        pipeline
    }

    #[tokio::test]
    async fn runs_once_on_repeated_cancel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = counting_pipeline(calls.clone(), || Ok(()));
        let token = CancellationToken::new();

        let handle = ShutdownCoordinator::spawn(Arc::new(pipeline), token.clone(), DEFAULT_GRACE);
        assert_eq!(handle.state(), ShutdownState::Running);

        token.cancel();
        token.cancel();
        handle.trigger();

        assert_eq!(handle.wait().await, ShutdownOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_cancels_run_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = counting_pipeline(calls.clone(), || Ok(()));
        let token = CancellationToken::new();
        let handle = ShutdownCoordinator::spawn(Arc::new(pipeline), token.clone(), DEFAULT_GRACE);

        let cancellers: Vec<_> = (0..8)
            .map(|_| {
                let token = token.clone();
                tokio::spawn(async move { token.cancel() })
            })
            .collect();
        for canceller in cancellers {
            canceller.await.unwrap();
        }

        assert_eq!(handle.wait().await, ShutdownOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pipeline_error_is_reported() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = counting_pipeline(calls, || {
            Err(TraceError::Other("collector unreachable".into()))
        });
        let token = CancellationToken::new();
        let handle = ShutdownCoordinator::spawn(Arc::new(pipeline), token.clone(), DEFAULT_GRACE);

        token.cancel();
        match handle.wait().await {
            ShutdownOutcome::Failed(msg) => assert!(msg.contains("collector unreachable"), "{msg}"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn grace_period_bounds_shutdown() {
        let mut pipeline = MockTracePipeline::new();
        pipeline.expect_shutdown().times(1).returning(|| {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        });
        let token = CancellationToken::new();
        let handle = ShutdownCoordinator::spawn(
            Arc::new(pipeline),
            token.clone(),
            Duration::from_millis(20),
        );
        let state = handle.state.clone();

        token.cancel();
        assert_eq!(handle.wait().await, ShutdownOutcome::TimedOut);
        assert_eq!(
            ShutdownState::from_u8(state.load(Ordering::Acquire)),
            ShutdownState::Stopped
        );
    }

    #[test]
    fn abandoned_flush_does_not_hold_the_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut pipeline = MockTracePipeline::new();
        pipeline.expect_shutdown().returning(|| {
            std::thread::sleep(Duration::from_secs(3));
            Ok(())
        });

        let outcome = runtime.block_on(async {
            let token = CancellationToken::new();
            let handle = ShutdownCoordinator::spawn(
                Arc::new(pipeline),
                token.clone(),
                Duration::from_millis(50),
            );
            token.cancel();
            handle.wait().await
        });
        assert_eq!(outcome, ShutdownOutcome::TimedOut);

        let started = Instant::now();
        drop(runtime);
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "runtime teardown took {:?}",
            started.elapsed()
        );
    }

    struct PanickingPipeline;

    impl TracePipeline for PanickingPipeline {
        fn shutdown(&self) -> Result<(), TraceError> {
            panic!("exporter poisoned")
        }
    }

    #[tokio::test]
    async fn panicking_pipeline_is_reported_as_failure() {
        let token = CancellationToken::new();
        let handle =
            ShutdownCoordinator::spawn(Arc::new(PanickingPipeline), token.clone(), DEFAULT_GRACE);

        token.cancel();
        assert!(matches!(handle.wait().await, ShutdownOutcome::Failed(_)));
    }

    #[test]
    fn grace_millis_saturate() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn unbounded_grace_still_completes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = counting_pipeline(calls.clone(), || Ok(()));
        let token = CancellationToken::new();
        let handle = ShutdownCoordinator::spawn(Arc::new(pipeline), token.clone(), Duration::MAX);

        token.cancel();
        assert_eq!(handle.wait().await, ShutdownOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_run_is_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let coordinator = ShutdownCoordinator {
            pipeline: Arc::new(counting_pipeline(calls.clone(), || Ok(()))),
            state: Arc::new(AtomicU8::new(ShutdownState::Running as u8)),
            grace: DEFAULT_GRACE,
        };

        assert_eq!(coordinator.run_once().await, ShutdownOutcome::Completed);
        assert_eq!(coordinator.run_once().await, ShutdownOutcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_shutdown_without_signal() {
        let mut pipeline = MockTracePipeline::new();
        pipeline.expect_shutdown().times(0);
        let handle = ShutdownCoordinator::spawn(
            Arc::new(pipeline),
            CancellationToken::new(),
            DEFAULT_GRACE,
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.state(), ShutdownState::Running);
    }
}
