//! NDJSON bulk payloads built on the producer thread.
//!
//! [`BulkOperations`] plugs into [`BulkEmitter`](bulk_emitter::BulkEmitter) as
//! the batch factory. Each record is serialized as it is added, so the flush
//! path only moves a finished buffer and the async side never touches
//! `LogRecord`s.

use crate::record::LogRecord;
use bulk_emitter::{BatchBuilder, BatchOperations};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Immutable newline-delimited JSON payload, one record per line.
///
/// Cloning is cheap (the payload is shared), which retrying sinks rely on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkRequest {
    payload: Arc<str>,
    lines: usize,
}

impl BulkRequest {
    /// Number of records in the payload.
    #[inline]
    pub fn len(&self) -> usize {
        self.lines
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    /// The full payload, each line terminated by `\n`.
    #[inline]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Size of the payload in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.payload.len()
    }

    /// Iterates over the serialized records.
    pub fn lines(&self) -> impl Iterator<Item = &str> + '_ {
        self.payload.lines()
    }
}

/// Accumulator producing a [`BulkRequest`].
#[derive(Debug)]
pub struct BulkRequestBuilder {
    payload: String,
    lines: usize,
    serialization_errors: Arc<AtomicU64>,
}

impl BatchBuilder for BulkRequestBuilder {
    type Item = LogRecord;
    type Batch = BulkRequest;

    fn add(&mut self, record: LogRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => {
                self.payload.push_str(&line);
                self.payload.push('\n');
                self.lines += 1;
            }
            Err(e) => {
                self.serialization_errors.fetch_add(1, Ordering::Relaxed);
                warn!(logger = %record.logger, error = %e, "dropping unserializable record");
            }
        }
    }

    fn build(self) -> BulkRequest {
        BulkRequest {
            payload: Arc::from(self.payload),
            lines: self.lines,
        }
    }
}

/// Batch factory for [`LogRecord`]s.
///
/// Clones share the serialization error counter.
#[derive(Debug, Clone)]
pub struct BulkOperations {
    capacity_hint_bytes: usize,
    serialization_errors: Arc<AtomicU64>,
}

impl BulkOperations {
    /// Creates a factory; each builder pre-allocates `capacity_hint_bytes`.
    pub fn new(capacity_hint_bytes: usize) -> Self {
        Self {
            capacity_hint_bytes,
            serialization_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records dropped because they failed to serialize.
    pub fn serialization_errors(&self) -> u64 {
        self.serialization_errors.load(Ordering::Relaxed)
    }
}

impl Default for BulkOperations {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

impl BatchOperations for BulkOperations {
    type Item = LogRecord;
    type Batch = BulkRequest;
    type Builder = BulkRequestBuilder;

    fn create_batch_builder(&self) -> BulkRequestBuilder {
        BulkRequestBuilder {
            payload: String::with_capacity(self.capacity_hint_bytes),
            lines: 0,
            serialization_errors: Arc::clone(&self.serialization_errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;

    #[test]
    fn test_builder_writes_one_line_per_record() {
        let ops = BulkOperations::new(0);
        let mut builder = ops.create_batch_builder();
        builder.add(LogRecord::new(Level::Info, "app", "first"));
        builder.add(LogRecord::new(Level::Error, "app", "second"));

        let request = builder.build();
        assert_eq!(request.len(), 2);
        assert!(request.payload().ends_with('\n'));

        let messages: Vec<String> = request
            .lines()
            .map(|line| serde_json::from_str::<LogRecord>(line).unwrap().message)
            .collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert_eq!(ops.serialization_errors(), 0);
    }

    #[test]
    fn test_unserializable_record_is_counted_and_skipped() {
        let ops = BulkOperations::new(0);
        let mut builder = ops.create_batch_builder();
        builder.add(LogRecord::new(Level::Info, "app", "kept"));
        builder.add(LogRecord::new(Level::Info, "app", "dropped").with_field("ratio", f64::NAN));

        let request = builder.build();
        assert_eq!(request.len(), 1);
        assert_eq!(request.lines().count(), 1);
        assert!(!request.payload().contains("dropped"));
        assert_eq!(ops.serialization_errors(), 1);
    }

    #[test]
    fn test_empty_builder_builds_empty_request() {
        let request = BulkOperations::default().create_batch_builder().build();
        assert!(request.is_empty());
        assert_eq!(request.byte_len(), 0);
        assert_eq!(request.lines().count(), 0);
    }

    #[test]
    fn test_clone_shares_payload() {
        let ops = BulkOperations::new(0);
        let mut builder = ops.create_batch_builder();
        builder.add(LogRecord::new(Level::Debug, "app", "x"));
        let request = builder.build();
        let copy = request.clone();
        assert!(Arc::ptr_eq(&request.payload, &copy.payload));
    }
}
