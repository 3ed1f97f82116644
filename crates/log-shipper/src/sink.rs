use crate::bulk::BulkRequest;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Error types for bulk send operations
#[derive(Debug, Error, Clone)]
pub enum SinkError {
    /// I/O error writing to the destination
    #[error("io error: {0}")]
    Io(String),
    /// The destination refused the request
    #[error("request rejected: {0}")]
    Rejected(String),
    /// All retry attempts exhausted
    #[error("all retry attempts exhausted after {attempts} tries")]
    RetriesExhausted { attempts: u32 },
}

impl SinkError {
    /// Returns `true` if sending the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Rejected(_))
    }
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Destination for bulk requests.
///
/// Uses native async fn in traits. For dynamic dispatch use [`BulkSinkBoxed`].
pub trait BulkSink: Send + Sync {
    /// Sends one request.
    fn send(&self, request: BulkRequest) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Returns the sink name for logging.
    fn name(&self) -> &str;
}

/// Object-safe version of [`BulkSink`].
pub trait BulkSinkBoxed: Send + Sync {
    /// Sends one request (boxed future for object safety).
    fn send_boxed(
        &self,
        request: BulkRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>>;

    /// Returns the sink name for logging.
    fn name(&self) -> &str;
}

/// Blanket implementation: any BulkSink can be used as BulkSinkBoxed
impl<T: BulkSink> BulkSinkBoxed for T {
    fn send_boxed(
        &self,
        request: BulkRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + '_>> {
        Box::pin(self.send(request))
    }

    fn name(&self) -> &str {
        BulkSink::name(self)
    }
}

/// Writes each payload to stdout.
pub struct StdoutSink {
    verbose: bool,
}

impl StdoutSink {
    /// With `verbose == false` only a one-line summary per request is printed.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl BulkSink for StdoutSink {
    async fn send(&self, request: BulkRequest) -> Result<(), SinkError> {
        if self.verbose {
            print!("{}", request.payload());
        } else {
            println!(
                "bulk request: {} records, {} bytes",
                request.len(),
                request.byte_len()
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

/// Discards every request (benchmarking).
pub struct NullSink;

impl BulkSink for NullSink {
    async fn send(&self, _request: BulkRequest) -> Result<(), SinkError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Appends payloads to a local NDJSON file.
pub struct NdjsonFileSink {
    path: PathBuf,
    /// Serializes appends so payloads from concurrent sends never interleave.
    write_lock: tokio::sync::Mutex<()>,
}

impl NdjsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl BulkSink for NdjsonFileSink {
    async fn send(&self, request: BulkRequest) -> Result<(), SinkError> {
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(request.payload().as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "ndjson-file"
    }
}

/// Keeps every accepted request in memory. Can be told to fail the next sends.
#[derive(Default)]
pub struct MemorySink {
    requests: Mutex<Vec<BulkRequest>>,
    failures_left: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` sends fail with [`SinkError::Rejected`].
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Accepted requests, in send order.
    pub fn requests(&self) -> Vec<BulkRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Total records across accepted requests.
    pub fn record_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(BulkRequest::len)
            .sum()
    }
}

impl BulkSink for MemorySink {
    async fn send(&self, request: BulkRequest) -> Result<(), SinkError> {
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SinkError::Rejected("injected failure".into()));
        }
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
