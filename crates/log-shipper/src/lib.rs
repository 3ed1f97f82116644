//! Log Shipper
//!
//! Ships structured log records to a bulk endpoint. Records are batched on the
//! producing threads by [`bulk_emitter::BulkEmitter`], serialized to NDJSON as
//! they arrive, and sent by an async task to any [`BulkSink`].
//!
//! Uses native async traits (no `#[async_trait]` macro).

pub mod bulk;
pub mod failover;
pub mod record;
pub mod retry;
pub mod shipper;
pub mod sink;

// Re-export main types
pub use bulk::{BulkOperations, BulkRequest, BulkRequestBuilder};
pub use failover::{LoggingFailover, MemoryFailover};
pub use record::{FieldValue, Level, LogRecord};
pub use retry::{RetryConfig, RetryingSink};
pub use shipper::{LogShipper, ShipperConfig, ShipperError, ShipperMetrics};
pub use sink::{BulkSink, BulkSinkBoxed, MemorySink, NdjsonFileSink, NullSink, SinkError, StdoutSink};
