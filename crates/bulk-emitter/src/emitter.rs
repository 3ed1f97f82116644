//! The size- and time-triggered batch scheduler.
//!
//! # Protocol
//!
//! Two locks, always taken in this order (flush lock, then accumulator lock):
//!
//! - the **accumulator lock** guards the live builder and is held only for
//!   one `add` (append + count increment) or one swap;
//! - the **flush lock** guards the delivery callback and is held for a whole
//!   flush: check, swap, finalize, deliver.
//!
//! The pending count is incremented and reset while holding the accumulator
//! lock, so it always equals the number of items in the live builder. A flush
//! that reads zero there has nothing to deliver and returns; this is what makes
//! racing threshold triggers (and idle timer ticks) harmless no-ops.
//!
//! Producers only contend with a flush for the brief swap. The producer whose
//! `add` crosses `max_size` runs the flush itself and therefore waits for the
//! delivery to finish: a full batch is paid for by the thread that filled it.

#[cfg(debug_assertions)]
use crate::invariants::{
    debug_assert_bounded_pending, debug_assert_exclusive_flush, debug_assert_nonempty_delivery,
};
use crate::batch::{BatchBuilder, BatchOperations};
use crate::config::{EmitterConfig, ShutdownPolicy};
use crate::error::{ConfigError, EmitterError};
use crate::listener::BoxedListener;
use crate::metrics::{EmitterMetrics, FlushTrigger, MetricsSnapshot};
use crate::timer::{FlushTimer, TickControl};
use crossbeam_utils::CachePadded;
use std::panic::{self, AssertUnwindSafe};
#[cfg(debug_assertions)]
use std::sync::atomic::AtomicBool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Anything that accepts items for batched delivery.
pub trait BatchEmitter<T>: Send + Sync {
    /// Accepts one item. Never fails.
    fn add(&self, item: T);
}

/// Result of a single flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending; the listener was not called.
    Empty,
    /// The listener accepted a batch of `items`.
    Delivered { items: usize },
    /// The listener returned `false` for a batch of `items`.
    Rejected { items: usize },
    /// Finalizing or delivering a batch of `items` panicked.
    Panicked { items: usize },
}

impl FlushOutcome {
    /// Number of items that left the emitter in this flush.
    pub fn items(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Delivered { items } | Self::Rejected { items } | Self::Panicked { items } => {
                *items
            }
        }
    }

    /// Returns `true` if the listener was invoked (successfully or not).
    pub fn is_delivery(&self) -> bool {
        !matches!(self, Self::Empty)
    }
}

#[inline]
fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the emitter handle and its timer thread.
struct EmitterInner<O: BatchOperations> {
    ops: O,
    max_size: usize,
    shutdown_policy: ShutdownPolicy,
    /// Items in the live builder. Only changed under `builder`'s lock.
    pending: CachePadded<AtomicUsize>,
    builder: Mutex<O::Builder>,
    /// The flush critical section. Owns the delivery callback.
    listener: Mutex<BoxedListener<O::Batch>>,
    metrics: EmitterMetrics,
    #[cfg(debug_assertions)]
    flushing: AtomicBool,
    #[cfg(debug_assertions)]
    adders: AtomicUsize,
}

impl<O: BatchOperations> EmitterInner<O> {
    /// Appends under the accumulator lock and returns the new pending count.
    fn append(&self, item: O::Item) -> usize {
        let mut builder = lock(&self.builder);
        builder.add(item);
        let pending = self.pending.fetch_add(1, Ordering::AcqRel) + 1;

        #[cfg(debug_assertions)]
        debug_assert_bounded_pending!(
            pending,
            self.max_size + self.adders.load(Ordering::Acquire)
        );

        pending
    }

    /// Swaps in a fresh builder if anything is pending.
    ///
    /// Returns the detached builder and the number of items it holds.
    fn detach(&self) -> Option<(O::Builder, usize)> {
        let mut current = lock(&self.builder);
        let pending = self.pending.swap(0, Ordering::AcqRel);
        if pending == 0 {
            return None;
        }
        let fresh = self.ops.create_batch_builder();
        Some((std::mem::replace(&mut *current, fresh), pending))
    }

    fn flush(&self, trigger: FlushTrigger) -> FlushOutcome {
        self.metrics.record_attempt(trigger);

        let mut listener = lock(&self.listener);

        #[cfg(debug_assertions)]
        debug_assert_exclusive_flush!(self.flushing.swap(true, Ordering::AcqRel));

        let outcome = match self.detach() {
            None => {
                self.metrics.record_empty();
                FlushOutcome::Empty
            }
            Some((builder, items)) => {
                #[cfg(debug_assertions)]
                debug_assert_nonempty_delivery!(items);

                Self::deliver(&mut listener, builder, items, trigger, &self.metrics)
            }
        };

        #[cfg(debug_assertions)]
        self.flushing.store(false, Ordering::Release);

        outcome
    }

    fn deliver(
        listener: &mut BoxedListener<O::Batch>,
        builder: O::Builder,
        items: usize,
        trigger: FlushTrigger,
        metrics: &EmitterMetrics,
    ) -> FlushOutcome {
        let result = panic::catch_unwind(AssertUnwindSafe(|| listener(builder.build())));
        match result {
            Ok(true) => {
                metrics.record_delivered(items as u64);
                debug!(?trigger, items, "batch delivered");
                FlushOutcome::Delivered { items }
            }
            Ok(false) => {
                metrics.record_delivered(items as u64);
                metrics.record_rejected();
                warn!(?trigger, items, "listener rejected batch");
                FlushOutcome::Rejected { items }
            }
            Err(_) => {
                metrics.record_panicked();
                error!(?trigger, items, "listener panicked, batch lost");
                FlushOutcome::Panicked { items }
            }
        }
    }

    fn discard(&self) -> usize {
        let _listener = lock(&self.listener);
        match self.detach() {
            Some((builder, items)) => {
                drop(builder);
                self.metrics.record_discarded(items as u64);
                warn!(items, "pending items discarded on shutdown");
                items
            }
            None => 0,
        }
    }
}

/// Batches items from many producers and delivers them to one listener.
///
/// A flush happens when an `add` brings the pending count to `max_size`, or
/// every `interval` on a background timer thread owned by this emitter,
/// whichever comes first. Empty flushes never reach the listener.
///
/// The emitter is `Sync`; share it between producers with an `Arc`.
///
/// The listener is called with the flush lock held. It must not call back
/// into the same emitter (`add` crossing the threshold, `flush`, `shutdown`),
/// or it will deadlock.
///
/// # Example
///
/// ```
/// use bulk_emitter::{Batch, BulkEmitter, VecBatchOperations};
/// use std::time::Duration;
///
/// let emitter = BulkEmitter::builder(VecBatchOperations::<u32>::new())
///     .max_size(2)
///     .interval(Duration::from_secs(1))
///     .listener(|batch: Batch<u32>| {
///         println!("delivering {:?}", batch.items());
///         true
///     })
///     .build()
///     .unwrap();
///
/// emitter.add(1);
/// emitter.add(2); // reaches max_size: delivered on this thread
/// emitter.shutdown();
/// ```
pub struct BulkEmitter<O: BatchOperations> {
    inner: Arc<EmitterInner<O>>,
    interval: Duration,
    timer: Mutex<Option<FlushTimer>>,
}

impl<O: BatchOperations> BulkEmitter<O> {
    /// Creates an emitter and starts its timer.
    ///
    /// An initial flush attempt runs before this returns (time zero of the
    /// schedule); timer ticks follow every `config.interval`.
    pub fn new<F>(config: EmitterConfig, ops: O, listener: F) -> Result<Self, EmitterError>
    where
        F: FnMut(O::Batch) -> bool + Send + 'static,
    {
        Self::with_boxed_listener(config, ops, Box::new(listener))
    }

    /// Starts a builder around the given batch factory.
    pub fn builder(ops: O) -> BulkEmitterBuilder<O> {
        BulkEmitterBuilder {
            config: EmitterConfig::default(),
            ops,
            listener: None,
        }
    }

    fn with_boxed_listener(
        config: EmitterConfig,
        ops: O,
        listener: BoxedListener<O::Batch>,
    ) -> Result<Self, EmitterError> {
        config.validate()?;

        let builder = ops.create_batch_builder();
        let inner = Arc::new(EmitterInner {
            ops,
            max_size: config.max_size,
            shutdown_policy: config.shutdown_policy,
            pending: CachePadded::new(AtomicUsize::new(0)),
            builder: Mutex::new(builder),
            listener: Mutex::new(listener),
            metrics: EmitterMetrics::default(),
            #[cfg(debug_assertions)]
            flushing: AtomicBool::new(false),
            #[cfg(debug_assertions)]
            adders: AtomicUsize::new(0),
        });

        // Tick zero. Nothing can have been added yet, so this is always empty.
        inner.flush(FlushTrigger::Timer);

        let weak = Arc::downgrade(&inner);
        let timer = FlushTimer::spawn(&config.thread_name, config.interval, move || {
            match weak.upgrade() {
                Some(inner) => {
                    inner.flush(FlushTrigger::Timer);
                    TickControl::Continue
                }
                None => TickControl::Stop,
            }
        })?;

        debug!(
            max_size = config.max_size,
            interval = ?config.interval,
            policy = ?config.shutdown_policy,
            "bulk emitter started"
        );

        Ok(Self {
            inner,
            interval: config.interval,
            timer: Mutex::new(Some(timer)),
        })
    }

    /// Appends an item; flushes on this thread if `max_size` is reached.
    pub fn add(&self, item: O::Item) {
        #[cfg(debug_assertions)]
        self.inner.adders.fetch_add(1, Ordering::AcqRel);

        let pending = self.inner.append(item);
        self.inner.metrics.record_add();

        if pending >= self.inner.max_size {
            self.inner.flush(FlushTrigger::Size);
        }

        #[cfg(debug_assertions)]
        self.inner.adders.fetch_sub(1, Ordering::AcqRel);
    }

    /// Delivers whatever is pending now. A no-op if nothing is pending.
    pub fn flush(&self) -> FlushOutcome {
        self.inner.flush(FlushTrigger::Manual)
    }

    /// Replaces the delivery callback.
    ///
    /// Waits for an in-progress delivery to finish; the next batch goes to the
    /// new listener.
    pub fn set_listener<F>(&self, listener: F)
    where
        F: FnMut(O::Batch) -> bool + Send + 'static,
    {
        *lock(&self.inner.listener) = Box::new(listener);
    }

    /// Items added since the last flush.
    #[inline]
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Size threshold.
    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    /// Timer period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Shutdown policy.
    pub fn shutdown_policy(&self) -> ShutdownPolicy {
        self.inner.shutdown_policy
    }

    /// Current counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Returns `true` once the timer has been cancelled.
    pub fn is_shut_down(&self) -> bool {
        lock(&self.timer).is_none()
    }

    /// Cancels the timer, then drains pending items per the shutdown policy.
    ///
    /// Safe to call repeatedly. `add` keeps working afterwards, but only the
    /// size threshold, `flush()`, or a later `shutdown()` (including the one
    /// run on drop) will deliver; there are no more timer ticks.
    pub fn shutdown(&self) -> FlushOutcome {
        let timer = lock(&self.timer).take();
        if let Some(mut timer) = timer {
            timer.cancel();
            debug!("flush timer cancelled");
        }

        match self.inner.shutdown_policy {
            ShutdownPolicy::Flush => self.inner.flush(FlushTrigger::Shutdown),
            ShutdownPolicy::Discard => {
                self.inner.metrics.record_attempt(FlushTrigger::Shutdown);
                self.inner.discard();
                FlushOutcome::Empty
            }
        }
    }
}

impl<O: BatchOperations> BatchEmitter<O::Item> for BulkEmitter<O> {
    fn add(&self, item: O::Item) {
        BulkEmitter::add(self, item);
    }
}

impl<O: BatchOperations> Drop for BulkEmitter<O> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<O: BatchOperations> std::fmt::Debug for BulkEmitter<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkEmitter")
            .field("max_size", &self.inner.max_size)
            .field("interval", &self.interval)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Builder for [`BulkEmitter`].
pub struct BulkEmitterBuilder<O: BatchOperations> {
    config: EmitterConfig,
    ops: O,
    listener: Option<BoxedListener<O::Batch>>,
}

impl<O: BatchOperations> BulkEmitterBuilder<O> {
    /// Replaces the whole configuration.
    pub fn config(mut self, config: EmitterConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the size threshold.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.max_size = max_size;
        self
    }

    /// Sets the timer period.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Sets the shutdown policy.
    pub fn shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.config.shutdown_policy = policy;
        self
    }

    /// Sets the timer thread name.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Sets the delivery callback. Required.
    pub fn listener<F>(mut self, listener: F) -> Self
    where
        F: FnMut(O::Batch) -> bool + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Validates the configuration and starts the emitter.
    pub fn build(self) -> Result<BulkEmitter<O>, EmitterError> {
        let listener = self.listener.ok_or(ConfigError::MissingListener)?;
        BulkEmitter::with_boxed_listener(self.config, self.ops, listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{Batch, VecBatchOperations};
    use std::sync::Mutex as StdMutex;

    const LONG: Duration = Duration::from_secs(3600);

    fn collecting(
        max_size: usize,
    ) -> (BulkEmitter<VecBatchOperations<u32>>, Arc<StdMutex<Vec<Vec<u32>>>>) {
        let delivered = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        let emitter = BulkEmitter::builder(VecBatchOperations::new())
            .max_size(max_size)
            .interval(LONG)
            .listener(move |batch: Batch<u32>| {
                sink.lock().unwrap().push(batch.into_vec());
                true
            })
            .build()
            .unwrap();
        (emitter, delivered)
    }

    #[test]
    fn test_builder_requires_listener() {
        let result = BulkEmitter::builder(VecBatchOperations::<u32>::new()).build();
        match result {
            Err(EmitterError::Config(ConfigError::MissingListener)) => {}
            other => panic!("expected MissingListener, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = BulkEmitter::new(
            EmitterConfig::new(0, Duration::from_millis(10)),
            VecBatchOperations::<u32>::new(),
            |_| true,
        );
        assert!(matches!(
            result,
            Err(EmitterError::Config(ConfigError::ZeroMaxSize))
        ));

        let result = BulkEmitter::new(
            EmitterConfig::new(10, Duration::ZERO),
            VecBatchOperations::<u32>::new(),
            |_| true,
        );
        assert!(result.as_ref().is_err_and(EmitterError::is_config));
    }

    #[test]
    fn test_construction_runs_tick_zero() {
        let (emitter, delivered) = collecting(10);
        let snap = emitter.metrics();
        assert_eq!(snap.timer_flushes, 1);
        assert_eq!(snap.empty_flushes, 1);
        assert!(delivered.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unrepresentable_interval_relies_on_size_and_shutdown() {
        let delivered = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        let emitter = BulkEmitter::new(
            EmitterConfig::new(10, Duration::MAX),
            VecBatchOperations::<u32>::new(),
            move |batch: Batch<u32>| {
                sink.lock().unwrap().push(batch.into_vec());
                true
            },
        )
        .unwrap();

        emitter.add(7);
        std::thread::sleep(Duration::from_millis(30));
        let timer_alive = lock(&emitter.timer).as_ref().is_some_and(FlushTimer::is_running);
        assert!(timer_alive, "timer thread died");

        assert_eq!(emitter.shutdown(), FlushOutcome::Delivered { items: 1 });
        assert_eq!(*delivered.lock().unwrap(), vec![vec![7]]);
        assert_eq!(emitter.metrics().timer_flushes, 1);
    }

    #[test]
    fn test_below_threshold_stays_pending() {
        let (emitter, delivered) = collecting(10);
        for i in 0..9 {
            emitter.add(i);
        }
        assert_eq!(emitter.pending(), 9);
        assert!(delivered.lock().unwrap().is_empty());
    }

    #[test]
    fn test_threshold_flushes_on_producer_thread() {
        let (emitter, delivered) = collecting(3);
        emitter.add(1);
        emitter.add(2);
        emitter.add(3);

        assert_eq!(emitter.pending(), 0);
        assert_eq!(*delivered.lock().unwrap(), vec![vec![1, 2, 3]]);
        assert_eq!(emitter.metrics().size_flushes, 1);
    }

    #[test]
    fn test_manual_flush_is_idempotent_when_empty() {
        let (emitter, delivered) = collecting(100);
        emitter.add(42);

        assert_eq!(emitter.flush(), FlushOutcome::Delivered { items: 1 });
        assert_eq!(emitter.flush(), FlushOutcome::Empty);
        assert_eq!(emitter.flush(), FlushOutcome::Empty);
        assert_eq!(delivered.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_rejected_delivery_keeps_emitter_usable() {
        let emitter = BulkEmitter::builder(VecBatchOperations::<u32>::new())
            .max_size(2)
            .interval(LONG)
            .listener(|_| false)
            .build()
            .unwrap();

        emitter.add(1);
        emitter.add(2);
        emitter.add(3);
        assert_eq!(emitter.pending(), 1);
        assert_eq!(emitter.flush(), FlushOutcome::Rejected { items: 1 });

        let snap = emitter.metrics();
        assert_eq!(snap.deliveries_rejected, 2);
        assert_eq!(snap.items_delivered, 3);
    }

    #[test]
    fn test_panicking_listener_does_not_poison() {
        let emitter = BulkEmitter::builder(VecBatchOperations::<u32>::new())
            .max_size(1)
            .interval(LONG)
            .listener(|batch: Batch<u32>| {
                if batch[0] == 13 {
                    panic!("unlucky batch");
                }
                true
            })
            .build()
            .unwrap();

        emitter.add(13);
        emitter.add(14);

        let snap = emitter.metrics();
        assert_eq!(snap.deliveries_panicked, 1);
        assert_eq!(snap.batches_delivered, 1);
        assert_eq!(emitter.pending(), 0);
    }

    #[test]
    fn test_set_listener_replaces_previous() {
        let (emitter, first) = collecting(1);
        emitter.add(1);

        let second = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&second);
        emitter.set_listener(move |batch: Batch<u32>| {
            sink.lock().unwrap().push(batch.into_vec());
            true
        });
        emitter.add(2);

        assert_eq!(*first.lock().unwrap(), vec![vec![1]]);
        assert_eq!(*second.lock().unwrap(), vec![vec![2]]);
    }

    #[test]
    fn test_shutdown_flushes_pending() {
        let (emitter, delivered) = collecting(100);
        emitter.add(5);
        emitter.add(6);

        assert_eq!(emitter.shutdown(), FlushOutcome::Delivered { items: 2 });
        assert!(emitter.is_shut_down());
        assert_eq!(*delivered.lock().unwrap(), vec![vec![5, 6]]);
    }

    #[test]
    fn test_shutdown_discard_drops_pending() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let emitter = BulkEmitter::builder(VecBatchOperations::<u32>::new())
            .max_size(100)
            .interval(LONG)
            .shutdown_policy(ShutdownPolicy::Discard)
            .listener(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            })
            .build()
            .unwrap();

        emitter.add(1);
        emitter.add(2);
        assert_eq!(emitter.shutdown(), FlushOutcome::Empty);

        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.metrics().items_discarded, 2);
        assert_eq!(emitter.pending(), 0);
    }

    #[test]
    fn test_drop_flushes_items_added_after_shutdown() {
        let (emitter, delivered) = collecting(100);
        emitter.shutdown();
        emitter.add(9);
        drop(emitter);
        assert_eq!(*delivered.lock().unwrap(), vec![vec![9]]);
    }

    #[test]
    fn test_batch_emitter_trait_object() {
        let (emitter, delivered) = collecting(2);
        let dyn_emitter: &dyn BatchEmitter<u32> = &emitter;
        dyn_emitter.add(1);
        dyn_emitter.add(2);
        assert_eq!(*delivered.lock().unwrap(), vec![vec![1, 2]]);
    }

    #[test]
    fn test_flush_outcome_accessors() {
        assert_eq!(FlushOutcome::Empty.items(), 0);
        assert!(!FlushOutcome::Empty.is_delivery());
        assert_eq!(FlushOutcome::Rejected { items: 4 }.items(), 4);
        assert!(FlushOutcome::Panicked { items: 1 }.is_delivery());
    }
}
