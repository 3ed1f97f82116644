use crate::bulk::{BulkOperations, BulkRequest};
use crate::record::LogRecord;
use crate::sink::BulkSinkBoxed;
use bulk_emitter::{
    BatchEmitter, BulkEmitter, EmitterConfig, EmitterError, FailoverPolicy, MetricsSnapshot,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, warn};

/// Error types for the log shipper
#[derive(Debug, Error)]
pub enum ShipperError {
    /// The embedded emitter could not start
    #[error("emitter error: {0}")]
    Emitter(#[from] EmitterError),
    /// A shipper setting is out of range
    #[error("invalid shipper config: {0}")]
    InvalidConfig(&'static str),
    /// Constructed outside a tokio runtime
    #[error("no tokio runtime available")]
    NoRuntime,
    /// A background task failed to complete
    #[error("task join error: {0}")]
    TaskJoin(String),
}

/// Thread-safe metrics for the send side (uses atomics)
#[derive(Debug, Default)]
pub struct ShipperMetrics {
    /// Requests accepted by the sink
    pub requests_sent: AtomicU64,
    /// Records inside accepted requests
    pub records_sent: AtomicU64,
    /// Requests the sink failed
    pub send_errors: AtomicU64,
    /// Requests refused because the channel was full or closed
    pub requests_refused: AtomicU64,
    /// Records handed to the failover policy
    pub records_failed_over: AtomicU64,
    /// Current in-flight sends
    pub inflight_sends: AtomicU64,
}

impl ShipperMetrics {
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub fn records_sent(&self) -> u64 {
        self.records_sent.load(Ordering::Relaxed)
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors.load(Ordering::Relaxed)
    }

    pub fn requests_refused(&self) -> u64 {
        self.requests_refused.load(Ordering::Relaxed)
    }

    pub fn records_failed_over(&self) -> u64 {
        self.records_failed_over.load(Ordering::Relaxed)
    }

    pub fn inflight_sends(&self) -> u64 {
        self.inflight_sends.load(Ordering::Relaxed)
    }

    fn record_success(&self, records: u64) {
        self.records_sent.fetch_add(records, Ordering::Relaxed);
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_refused(&self) {
        self.requests_refused.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_inflight(&self) {
        self.inflight_sends.fetch_add(1, Ordering::Relaxed);
    }

    fn dec_inflight(&self) {
        self.inflight_sends.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Configuration for the log shipper
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Batching thresholds for the embedded emitter
    pub emitter: EmitterConfig,
    /// Requests buffered between the emitter and the send task
    pub channel_capacity: usize,
    /// Maximum concurrent sink sends
    pub max_concurrent_sends: usize,
    /// Payload bytes pre-allocated per request
    pub capacity_hint_bytes: usize,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            emitter: EmitterConfig::default().with_thread_name("log-shipper-flush"),
            channel_capacity: 64,
            max_concurrent_sends: 4,
            capacity_hint_bytes: 64 * 1024,
        }
    }
}

impl ShipperConfig {
    pub fn with_emitter(mut self, emitter: EmitterConfig) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_max_concurrent_sends(mut self, max: usize) -> Self {
        self.max_concurrent_sends = max;
        self
    }

    pub fn validate(&self) -> Result<(), ShipperError> {
        if self.channel_capacity == 0 {
            return Err(ShipperError::InvalidConfig("channel_capacity must be > 0"));
        }
        if self.max_concurrent_sends == 0 {
            return Err(ShipperError::InvalidConfig(
                "max_concurrent_sends must be > 0",
            ));
        }
        self.emitter.validate().map_err(EmitterError::from)?;
        Ok(())
    }
}

/// Hands every record of `request` to the failover policy.
fn fail_over(
    failover: &dyn FailoverPolicy<String>,
    metrics: &ShipperMetrics,
    request: &BulkRequest,
) {
    for line in request.lines() {
        failover.deliver(line.to_owned());
    }
    metrics
        .records_failed_over
        .fetch_add(request.len() as u64, Ordering::Relaxed);
}

/// Batches log records on producer threads and ships them to an async sink.
///
/// Producers call [`log`](Self::log) from any thread, including threads
/// outside the runtime. The embedded [`BulkEmitter`] cuts a [`BulkRequest`]
/// by size or time and its callback hands the request to a bounded channel
/// without blocking. A consumer task sends requests concurrently, up to
/// `max_concurrent_sends` at a time.
///
/// A request that cannot be queued (channel full or closed) or that the sink
/// fails is passed to the failover policy one record at a time.
pub struct LogShipper {
    emitter: Option<BulkEmitter<BulkOperations>>,
    ops: BulkOperations,
    consumer_task: Option<JoinHandle<()>>,
    metrics: Arc<ShipperMetrics>,
}

impl LogShipper {
    /// Creates a shipper. Must be called from within a tokio runtime.
    pub fn new(
        config: ShipperConfig,
        sink: Arc<dyn BulkSinkBoxed>,
        failover: Arc<dyn FailoverPolicy<String>>,
    ) -> Result<Self, ShipperError> {
        config.validate()?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ShipperError::NoRuntime)?;

        let metrics = Arc::new(ShipperMetrics::default());
        let (tx, rx) = mpsc::channel::<BulkRequest>(config.channel_capacity);

        let consumer_task = runtime.spawn(run_consumer(
            rx,
            sink,
            Arc::clone(&failover),
            Arc::clone(&metrics),
            config.max_concurrent_sends,
        ));

        let ops = BulkOperations::new(config.capacity_hint_bytes);
        let listener_metrics = Arc::clone(&metrics);
        // On error the listener drops its sender and the consumer task exits.
        let emitter = BulkEmitter::new(config.emitter, ops.clone(), move |request: BulkRequest| {
            // Every record failed to serialize; nothing to ship.
            if request.is_empty() {
                return true;
            }
            match tx.try_send(request) {
                Ok(()) => true,
                Err(TrySendError::Full(request)) => {
                    warn!(records = request.len(), "send queue full, failing over request");
                    listener_metrics.record_refused();
                    fail_over(&*failover, &listener_metrics, &request);
                    false
                }
                Err(TrySendError::Closed(request)) => {
                    warn!(records = request.len(), "send task gone, failing over request");
                    listener_metrics.record_refused();
                    fail_over(&*failover, &listener_metrics, &request);
                    false
                }
            }
        })?;

        Ok(Self {
            emitter: Some(emitter),
            ops,
            consumer_task: Some(consumer_task),
            metrics,
        })
    }

    /// Queues a record for the next request.
    pub fn log(&self, record: LogRecord) {
        if let Some(emitter) = &self.emitter {
            emitter.add(record);
        }
    }

    /// Cuts a request from whatever is pending now.
    pub fn flush(&self) {
        if let Some(emitter) = &self.emitter {
            emitter.flush();
        }
    }

    /// Counters of the embedded emitter.
    pub fn emitter_metrics(&self) -> Option<MetricsSnapshot> {
        self.emitter.as_ref().map(BulkEmitter::metrics)
    }

    /// Send-side metrics (shared with the consumer task).
    pub fn metrics(&self) -> &Arc<ShipperMetrics> {
        &self.metrics
    }

    /// Records dropped because they failed to serialize.
    pub fn serialization_errors(&self) -> u64 {
        self.ops.serialization_errors()
    }

    /// Flushes pending records and waits until every queued request is sent
    /// or failed over.
    pub async fn shutdown(mut self) -> Result<(), ShipperError> {
        if let Some(emitter) = self.emitter.take() {
            // Joining the timer thread blocks.
            tokio::task::spawn_blocking(move || {
                let outcome = emitter.shutdown();
                debug!(?outcome, "emitter drained");
                drop(emitter);
            })
            .await
            .map_err(|e| ShipperError::TaskJoin(e.to_string()))?;
        }

        if let Some(task) = self.consumer_task.take() {
            task.await
                .map_err(|e| ShipperError::TaskJoin(e.to_string()))?;
        }

        Ok(())
    }
}

impl BatchEmitter<LogRecord> for LogShipper {
    fn add(&self, item: LogRecord) {
        self.log(item);
    }
}

/// Receives requests until every sender is dropped, then waits for in-flight
/// sends.
async fn run_consumer(
    mut rx: mpsc::Receiver<BulkRequest>,
    sink: Arc<dyn BulkSinkBoxed>,
    failover: Arc<dyn FailoverPolicy<String>>,
    metrics: Arc<ShipperMetrics>,
    max_concurrent: usize,
) {
    let send_semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut send_tasks: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            Some(result) = send_tasks.join_next(), if !send_tasks.is_empty() => {
                if let Err(e) = result {
                    error!(error = %e, "send task panicked");
                }
            }

            received = rx.recv() => {
                let Some(request) = received else { break };
                let Ok(permit) = Arc::clone(&send_semaphore).acquire_owned().await else {
                    fail_over(&*failover, &metrics, &request);
                    break;
                };

                let sink = Arc::clone(&sink);
                let failover = Arc::clone(&failover);
                let metrics = Arc::clone(&metrics);
                metrics.inc_inflight();

                send_tasks.spawn(async move {
                    let records = request.len() as u64;
                    match sink.send_boxed(request.clone()).await {
                        Ok(()) => metrics.record_success(records),
                        Err(e) => {
                            warn!(sink = sink.name(), records, error = %e, "bulk send failed");
                            metrics.record_error();
                            fail_over(&*failover, &metrics, &request);
                        }
                    }
                    metrics.dec_inflight();
                    drop(permit);
                });
            }
        }
    }

    while let Some(result) = send_tasks.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "send task panicked during shutdown");
        }
    }
    debug!("log shipper consumer stopped");
}
