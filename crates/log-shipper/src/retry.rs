//! Retrying sink decorator.
//!
//! Wraps any [`BulkSink`] and re-sends failed requests with capped exponential
//! backoff. The emitter never retries; this is where a deployment opts in.

use crate::bulk::BulkRequest;
use crate::sink::{BulkSink, SinkError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt (2.0 doubles the delay each retry).
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt` (0-indexed; attempt 0 has none).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// Sink wrapper that retries retryable failures.
///
/// Non-retryable errors (see [`SinkError::is_retryable`]) are returned
/// immediately.
pub struct RetryingSink<S: BulkSink> {
    inner: S,
    config: RetryConfig,
    total_retries: AtomicU64,
    recovered_sends: AtomicU64,
}

impl<S: BulkSink> RetryingSink<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
            recovered_sends: AtomicU64::new(0),
        }
    }

    /// Total retry attempts made.
    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    /// Sends that succeeded after at least one retry.
    pub fn recovered_sends(&self) -> u64 {
        self.recovered_sends.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: BulkSink> BulkSink for RetryingSink<S> {
    async fn send(&self, request: BulkRequest) -> Result<(), SinkError> {
        let max_attempts = self.config.max_retries + 1;

        for attempt in 0..max_attempts {
            let delay = self.config.delay_for_attempt(attempt);
            if !delay.is_zero() {
                debug_assert!(delay <= self.config.max_delay);
                self.total_retries.fetch_add(1, Ordering::Relaxed);
                debug!(sink = self.inner.name(), attempt, ?delay, "retrying bulk request");
                sleep(delay).await;
            }

            match self.inner.send(request.clone()).await {
                Ok(()) => {
                    if attempt > 0 {
                        self.recovered_sends.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(_) => {}
            }
        }

        Err(SinkError::RetriesExhausted {
            attempts: max_attempts,
        })
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
