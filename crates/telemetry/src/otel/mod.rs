//! OTLP span export pipeline: exporter, batching, resource, global install.

mod queue;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use axum::http::Uri;
use opentelemetry::{
    global,
    propagation::TextMapCompositePropagator,
    trace::{TraceError, TracerProvider as _},
    KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    export::trace::SpanExporter,
    propagation::{BaggagePropagator, TraceContextPropagator},
    trace::{self as sdktrace, Sampler, TracerProvider},
    Resource,
};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{info, warn};

use self::queue::{QueueConfig, QueueProcessor};
use crate::{
    config::{ResourceAttributes, TracingConfig},
    shutdown::TracePipeline,
};

/// Spans buffered before the oldest ones are dropped.
pub const MAX_QUEUE_SIZE: usize = 2048;

/// Spans sent per export call.
pub const MAX_EXPORT_BATCH_SIZE: usize = 512;

/// Delay between two scheduled exports.
pub const SCHEDULED_DELAY: Duration = Duration::from_secs(5);

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// Id of the pipeline currently installed as the global provider, 0 if none.
static INSTALLED_PIPELINE: AtomicU64 = AtomicU64::new(0);

/// Errors from tracing pipeline construction.
#[derive(Debug, Error)]
pub enum TracingError {
    /// The exporter URL is not an absolute `http`/`https` URI.
    #[error("invalid exporter url {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// The OTLP exporter could not be built.
    #[error("failed to build span exporter: {0}")]
    Exporter(#[from] TraceError),

    /// No Tokio runtime is available to run the export worker.
    #[error("trace pipeline requires a Tokio runtime")]
    NoRuntime,
}

/// Owner of a trace pipeline.
///
/// Clones share the pipeline. The handle holds the only strong reference to
/// its provider besides the global slot, so [`TracePipeline::shutdown`]
/// actually closes export: spans started afterwards, through this handle or
/// any tracer it handed out, are not recorded.
#[derive(Debug, Clone)]
pub struct TracingHandle {
    inner: Arc<Pipeline>,
}

#[derive(Debug)]
struct Pipeline {
    id: u64,
    provider: Mutex<Option<TracerProvider>>,
    processor: QueueProcessor,
}

impl Pipeline {
    fn provider(&self) -> MutexGuard<'_, Option<TracerProvider>> {
        self.provider.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TracingHandle {
    /// Build a batching, always-sampling pipeline without installing it.
    ///
    /// # Errors
    ///
    /// See [`init_tracing`].
    pub fn build(cfg: &TracingConfig) -> Result<Self, TracingError> {
        validate_endpoint(&cfg.export_url)?;
        let runtime = Handle::try_current().map_err(|_| TracingError::NoRuntime)?;

        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(cfg.export_url.clone())
            .build_span_exporter()?;

        Ok(Self::with_exporter(
            Box::new(exporter),
            &cfg.attributes,
            QueueConfig::default(),
            &runtime,
        ))
    }

    fn with_exporter(
        exporter: Box<dyn SpanExporter>,
        attributes: &ResourceAttributes,
        queue: QueueConfig,
        runtime: &Handle,
    ) -> Self {
        let processor = QueueProcessor::start(exporter, queue, runtime);

        let trace_config = sdktrace::Config::default()
            .with_sampler(Sampler::AlwaysOn)
            .with_resource(service_resource(attributes));
        let provider = TracerProvider::builder()
            .with_span_processor(processor.clone())
            .with_config(trace_config)
            .build();

        Self {
            inner: Arc::new(Pipeline {
                id: NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed),
                provider: Mutex::new(Some(provider)),
                processor,
            }),
        }
    }

    /// SDK tracer, suitable for a `tracing_opentelemetry` layer.
    ///
    /// After shutdown the returned tracer produces non-recording spans.
    pub fn tracer(&self, name: &'static str) -> sdktrace::Tracer {
        match self.inner.provider().as_ref() {
            Some(provider) => provider.tracer(name),
            None => TracerProvider::default().tracer(name),
        }
    }

    /// Whether the export queue has been closed.
    pub fn is_shut_down(&self) -> bool {
        self.inner.processor.is_closed()
    }

    fn install(&self) {
        let Some(provider) = self.inner.provider().as_ref().cloned() else {
            return;
        };
        INSTALLED_PIPELINE.store(self.inner.id, Ordering::Release);
        global::set_tracer_provider(provider);
    }
}

impl TracePipeline for TracingHandle {
    /// Flush and close the export queue, then release the provider.
    ///
    /// The global tracer provider is reset only while this pipeline is the one
    /// [`init_tracing`] installed most recently.
    fn shutdown(&self) -> Result<(), TraceError> {
        let closed = self.inner.processor.close();
        let dropped = self.inner.processor.dropped();
        if dropped > 0 {
            warn!(dropped, "spans evicted from the full export queue");
        }
        let provider = self.inner.provider().take();
        if INSTALLED_PIPELINE
            .compare_exchange(self.inner.id, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            global::shutdown_tracer_provider();
        }
        drop(provider);
        closed
    }
}

/// Build the pipeline described by `cfg` and install it process-wide.
///
/// Installs the provider as the global tracer provider and W3C TraceContext
/// plus Baggage as the global propagator. Nothing global is touched when an
/// error is returned. Must be called from within a Tokio runtime.
///
/// Meant to be called once per process. A later call replaces the global
/// provider; shutting down an earlier handle then leaves the global alone.
///
/// # Errors
///
/// Returns [`TracingError::InvalidEndpoint`] for an unusable `export_url`,
/// [`TracingError::NoRuntime`] outside a Tokio runtime and
/// [`TracingError::Exporter`] if the OTLP exporter cannot be built.
pub fn init_tracing(cfg: &TracingConfig) -> Result<TracingHandle, TracingError> {
    let handle = TracingHandle::build(cfg)?;

    handle.install();
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    info!(
        endpoint = %cfg.export_url,
        service = %cfg.attributes.service,
        environment = %cfg.attributes.environment,
        "trace pipeline installed"
    );
    Ok(handle)
}

fn service_resource(attributes: &ResourceAttributes) -> Resource {
    Resource::new(vec![
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            attributes.service.clone(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ),
        KeyValue::new("environment", attributes.environment.clone()),
        KeyValue::new("ID", attributes.id.clone()),
    ])
}

fn validate_endpoint(url: &str) -> Result<(), TracingError> {
    let invalid = |reason: &str| TracingError::InvalidEndpoint {
        url: url.to_owned(),
        reason: reason.to_owned(),
    };

    let uri: Uri = url.parse().map_err(|_| invalid("not a valid URI"))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => return Err(invalid("scheme must be http or https")),
    }
    if uri.host().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(())
}
