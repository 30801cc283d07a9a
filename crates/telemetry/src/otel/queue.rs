//! Bounded span queue in front of the OTLP exporter.
//!
//! Finished spans are buffered in a ring of `max_queue_size` entries. Once the
//! ring is full every new span evicts the oldest buffered one. A worker task on
//! the Tokio runtime drains the ring in batches, either on a timer or as soon
//! as a full batch is waiting.

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc as std_mpsc, Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use opentelemetry::{
    global,
    trace::{TraceError, TraceResult},
    Context,
};
use opentelemetry_sdk::{
    export::trace::{SpanData, SpanExporter},
    trace::{Span, SpanProcessor},
};
use tokio::{
    runtime::Handle,
    sync::{mpsc, Notify},
    time::{self, Instant, MissedTickBehavior},
};

use super::{MAX_EXPORT_BATCH_SIZE, MAX_QUEUE_SIZE, SCHEDULED_DELAY};

#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueConfig {
    pub max_queue_size: usize,
    pub max_export_batch_size: usize,
    pub scheduled_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: MAX_QUEUE_SIZE,
            max_export_batch_size: MAX_EXPORT_BATCH_SIZE,
            scheduled_delay: SCHEDULED_DELAY,
        }
    }
}

/// Fixed-capacity FIFO that evicts its oldest entry on overflow.
#[derive(Debug)]
pub(crate) struct SpanQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped: u64,
}

impl<T> SpanQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append `item`, returning the entry evicted to make room for it.
    pub(crate) fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.dropped += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Remove up to `max` of the oldest entries.
    pub(crate) fn next_batch(&mut self, max: usize) -> Vec<T> {
        let n = self.items.len().min(max);
        self.items.drain(..n).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// Entries evicted so far.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }
}

enum Command {
    Flush(std_mpsc::SyncSender<TraceResult<()>>),
    Shutdown(Option<std_mpsc::SyncSender<TraceResult<()>>>),
}

struct Shared {
    queue: Mutex<SpanQueue<SpanData>>,
    batch_ready: Notify,
    closed: AtomicBool,
    batch_size: usize,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, SpanQueue<SpanData>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a batch if at least `threshold` spans are waiting.
    fn take_batch(&self, threshold: usize) -> Vec<SpanData> {
        let mut queue = self.queue();
        if queue.len() < threshold.max(1) {
            return Vec::new();
        }
        queue.next_batch(self.batch_size)
    }
}

/// [`SpanProcessor`] feeding a drop-oldest [`SpanQueue`].
///
/// Clones share one queue and one export worker.
#[derive(Clone)]
pub(crate) struct QueueProcessor {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl fmt::Debug for QueueProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueProcessor")
            .field("queued", &self.shared.queue().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl QueueProcessor {
    /// Start the export worker on `runtime` and return the processor feeding it.
    pub(crate) fn start(
        exporter: Box<dyn SpanExporter>,
        config: QueueConfig,
        runtime: &Handle,
    ) -> Self {
        let batch_size = config.max_export_batch_size.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(SpanQueue::new(config.max_queue_size)),
            batch_ready: Notify::new(),
            closed: AtomicBool::new(false),
            batch_size,
        });
        let (commands, rx) = mpsc::unbounded_channel();
        runtime.spawn(run(Arc::clone(&shared), exporter, rx, config.scheduled_delay));
        Self { shared, commands }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.shared.queue().dropped()
    }

    /// Export everything queued, shut the exporter down and refuse new spans.
    ///
    /// Blocks until the worker has finished. Returns `Ok` if already closed.
    pub(crate) fn close(&self) -> TraceResult<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.request(|reply| Command::Shutdown(Some(reply)))
    }

    fn request(
        &self,
        command: impl FnOnce(std_mpsc::SyncSender<TraceResult<()>>) -> Command,
    ) -> TraceResult<()> {
        let (reply, response) = std_mpsc::sync_channel(1);
        self.commands
            .send(command(reply))
            .map_err(|_| worker_gone())?;
        response.recv().map_err(|_| worker_gone())?
    }
}

impl SpanProcessor for QueueProcessor {
    fn on_start(&self, _span: &mut Span, _cx: &Context) {}

    fn on_end(&self, span: SpanData) {
        if self.is_closed() {
            return;
        }
        let ready = {
            let mut queue = self.shared.queue();
            queue.push(span);
            queue.len() >= self.shared.batch_size
        };
        if ready {
            self.shared.batch_ready.notify_one();
        }
    }

    fn force_flush(&self) -> TraceResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.request(Command::Flush)
    }

    // Reached when the last provider reference drops, possibly on a runtime
    // thread, so the worker is signalled but not awaited.
    fn shutdown(&mut self) -> TraceResult<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.commands
            .send(Command::Shutdown(None))
            .map_err(|_| worker_gone())
    }
}

fn worker_gone() -> TraceError {
    TraceError::from("span export worker is not running")
}

fn report(result: TraceResult<()>) {
    if let Err(err) = result {
        global::handle_error(err);
    }
}

async fn run(
    shared: Arc<Shared>,
    mut exporter: Box<dyn SpanExporter>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    delay: Duration,
) {
    let delay = delay.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(Instant::now() + delay, delay);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => report(export(&shared, exporter.as_mut(), 1).await),
            _ = shared.batch_ready.notified() => {
                report(export(&shared, exporter.as_mut(), shared.batch_size).await);
            }
            command = commands.recv() => match command {
                Some(Command::Flush(reply)) => {
                    let _ = reply.send(export(&shared, exporter.as_mut(), 1).await);
                }
                Some(Command::Shutdown(reply)) => {
                    let result = export(&shared, exporter.as_mut(), 1).await;
                    exporter.shutdown();
                    match reply {
                        Some(reply) => {
                            let _ = reply.send(result);
                        }
                        None => report(result),
                    }
                    break;
                }
                None => {
                    report(export(&shared, exporter.as_mut(), 1).await);
                    exporter.shutdown();
                    break;
                }
            }
        }
    }
}

/// Export batches while at least `threshold` spans are queued.
async fn export(
    shared: &Shared,
    exporter: &mut dyn SpanExporter,
    threshold: usize,
) -> TraceResult<()> {
    loop {
        let batch = shared.take_batch(threshold);
        if batch.is_empty() {
            return Ok(());
        }
        exporter.export(batch).await?;
    }
}
