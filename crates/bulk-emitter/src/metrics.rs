//! Emitter counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// What caused a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// An `add` pushed the pending count to `max_size`.
    Size,
    /// The periodic timer fired.
    Timer,
    /// [`BulkEmitter::flush`](crate::BulkEmitter::flush) was called directly.
    Manual,
    /// Final drain during shutdown.
    Shutdown,
}

/// Thread-safe counters updated by producers, the timer and flushes.
///
/// All updates are `Relaxed`; values are for monitoring, not synchronization.
#[derive(Debug, Default)]
pub(crate) struct EmitterMetrics {
    items_added: AtomicU64,
    size_flushes: AtomicU64,
    timer_flushes: AtomicU64,
    manual_flushes: AtomicU64,
    shutdown_flushes: AtomicU64,
    empty_flushes: AtomicU64,
    batches_delivered: AtomicU64,
    items_delivered: AtomicU64,
    deliveries_rejected: AtomicU64,
    deliveries_panicked: AtomicU64,
    items_discarded: AtomicU64,
}

impl EmitterMetrics {
    #[inline]
    pub(crate) fn record_add(&self) {
        self.items_added.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt(&self, trigger: FlushTrigger) {
        let counter = match trigger {
            FlushTrigger::Size => &self.size_flushes,
            FlushTrigger::Timer => &self.timer_flushes,
            FlushTrigger::Manual => &self.manual_flushes,
            FlushTrigger::Shutdown => &self.shutdown_flushes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_empty(&self) {
        self.empty_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self, items: u64) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.items_delivered.fetch_add(items, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.deliveries_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panicked(&self) {
        self.deliveries_panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self, items: u64) {
        self.items_discarded.fetch_add(items, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_added: self.items_added.load(Ordering::Relaxed),
            size_flushes: self.size_flushes.load(Ordering::Relaxed),
            timer_flushes: self.timer_flushes.load(Ordering::Relaxed),
            manual_flushes: self.manual_flushes.load(Ordering::Relaxed),
            shutdown_flushes: self.shutdown_flushes.load(Ordering::Relaxed),
            empty_flushes: self.empty_flushes.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            items_delivered: self.items_delivered.load(Ordering::Relaxed),
            deliveries_rejected: self.deliveries_rejected.load(Ordering::Relaxed),
            deliveries_panicked: self.deliveries_panicked.load(Ordering::Relaxed),
            items_discarded: self.items_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of an emitter's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Items accepted by `add`.
    pub items_added: u64,
    /// Flush attempts caused by the size threshold.
    pub size_flushes: u64,
    /// Flush attempts caused by the timer, including the tick at construction.
    pub timer_flushes: u64,
    /// Direct `flush()` calls.
    pub manual_flushes: u64,
    /// Drains performed by `shutdown()`.
    pub shutdown_flushes: u64,
    /// Flush attempts that found nothing pending.
    pub empty_flushes: u64,
    /// Batches handed to the listener (whatever it returned).
    pub batches_delivered: u64,
    /// Items contained in delivered batches.
    pub items_delivered: u64,
    /// Deliveries where the listener returned `false`.
    pub deliveries_rejected: u64,
    /// Deliveries where the listener panicked.
    pub deliveries_panicked: u64,
    /// Items dropped by [`ShutdownPolicy::Discard`](crate::ShutdownPolicy::Discard).
    pub items_discarded: u64,
}

impl MetricsSnapshot {
    /// Total flush attempts regardless of trigger.
    pub fn flush_attempts(&self) -> u64 {
        self.size_flushes + self.timer_flushes + self.manual_flushes + self.shutdown_flushes
    }
}
