//! Failover policies for records the sink could not take.
//!
//! Items arrive here one serialized record (NDJSON line) at a time, after the
//! emitter's callback or the send task gave up on a request.

use bulk_emitter::FailoverPolicy;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

/// Bounded in-memory store of failed records.
///
/// When full, the oldest record is evicted and counted as dropped.
#[derive(Debug)]
pub struct MemoryFailover {
    capacity: usize,
    records: Mutex<VecDeque<String>>,
    dropped: AtomicU64,
}

impl MemoryFailover {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            dropped: AtomicU64::new(0),
        }
    }

    /// Records currently held.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records evicted because the store was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Removes and returns everything held, oldest first.
    pub fn drain(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }
}

impl FailoverPolicy<String> for MemoryFailover {
    fn deliver(&self, item: String) {
        if self.capacity == 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.len() >= self.capacity {
            records.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        records.push_back(item);
    }
}

/// Logs every failed record at `WARN` and drops it.
#[derive(Debug, Default)]
pub struct LoggingFailover {
    logged: AtomicU64,
}

impl LoggingFailover {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logged(&self) -> u64 {
        self.logged.load(Ordering::Relaxed)
    }
}

impl FailoverPolicy<String> for LoggingFailover {
    fn deliver(&self, item: String) {
        self.logged.fetch_add(1, Ordering::Relaxed);
        warn!(record = %item, "record failed over");
    }
}
