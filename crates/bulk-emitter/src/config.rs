//! Emitter configuration.

use crate::error::ConfigError;
use std::time::Duration;

/// What happens to items still pending when the emitter shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownPolicy {
    /// Deliver pending items as one final batch.
    #[default]
    Flush,
    /// Drop pending items. They are counted in
    /// [`MetricsSnapshot::items_discarded`](crate::MetricsSnapshot).
    Discard,
}

/// Configuration for a [`BulkEmitter`](crate::BulkEmitter).
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Item count that triggers a flush on the producer thread.
    ///
    /// Default: 1000
    pub max_size: usize,

    /// Period of the background flush timer.
    ///
    /// Default: 1s
    pub interval: Duration,

    /// Handling of pending items on shutdown.
    ///
    /// Default: [`ShutdownPolicy::Flush`]
    pub shutdown_policy: ShutdownPolicy,

    /// Name given to the flush timer thread.
    ///
    /// Default: `"bulk-emitter-timer"`
    pub thread_name: String,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            interval: Duration::from_millis(1000),
            shutdown_policy: ShutdownPolicy::Flush,
            thread_name: String::from("bulk-emitter-timer"),
        }
    }
}

impl EmitterConfig {
    /// Creates a configuration with the given thresholds and default policy.
    pub fn new(max_size: usize, interval: Duration) -> Self {
        Self {
            max_size,
            interval,
            ..Self::default()
        }
    }

    /// Small batches flushed often.
    pub fn low_latency() -> Self {
        Self::new(100, Duration::from_millis(100))
    }

    /// Large batches, infrequent timer flushes.
    pub fn high_throughput() -> Self {
        Self::new(10_000, Duration::from_secs(5))
    }

    /// Sets the size threshold.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets the timer period.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the shutdown policy.
    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown_policy = policy;
        self
    }

    /// Sets the timer thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Checks the configuration. Zero thresholds are rejected, never defaulted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        if self.interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::EmptyThreadName);
        }
        Ok(())
    }
}
