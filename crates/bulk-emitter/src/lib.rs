//! Bulk Emitter - Size- and Time-Triggered Batch Scheduling
//!
//! Collects items (typically log records) from many producer threads into
//! batches and hands each finalized batch to a single delivery callback. A
//! batch is cut when the item count reaches `max_size` or when the periodic
//! timer fires, whichever comes first.
//!
//! # Key Properties
//!
//! - No item is lost or delivered twice, whatever the number of producers
//! - Deliveries for one emitter never run concurrently
//! - Empty batches are never delivered (idle timer ticks are no-ops)
//! - The producer that fills a batch delivers it (back-pressure)
//! - A failing or panicking callback loses only its own batch
//!
//! # Example
//!
//! ```
//! use bulk_emitter::{Batch, BulkEmitter, EmitterConfig, VecBatchOperations};
//! use std::sync::Arc;
//! use std::thread;
//! use std::time::Duration;
//!
//! let emitter = Arc::new(
//!     BulkEmitter::new(
//!         EmitterConfig::new(100, Duration::from_millis(250)),
//!         VecBatchOperations::<String>::with_capacity_hint(100),
//!         |batch: Batch<String>| {
//!             println!("shipping {} records", batch.len());
//!             true
//!         },
//!     )
//!     .unwrap(),
//! );
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|id| {
//!         let emitter = Arc::clone(&emitter);
//!         thread::spawn(move || {
//!             for seq in 0..50 {
//!                 emitter.add(format!("producer {} record {}", id, seq));
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! // Flush-on-shutdown delivers whatever is still pending.
//! emitter.shutdown();
//! ```

mod batch;
mod config;
mod emitter;
mod error;
mod invariants;
mod listener;
mod metrics;
mod timer;

pub use batch::{Batch, BatchBuilder, BatchOperations, VecBatchBuilder, VecBatchOperations};
pub use config::{EmitterConfig, ShutdownPolicy};
pub use emitter::{BatchEmitter, BulkEmitter, BulkEmitterBuilder, FlushOutcome};
pub use error::{ConfigError, EmitterError};
pub use listener::{BoxedListener, FailoverPolicy, ListenerChain, NoopFailoverPolicy};
pub use metrics::{FlushTrigger, MetricsSnapshot};
