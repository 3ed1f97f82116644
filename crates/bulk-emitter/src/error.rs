//! Error types for emitter construction.

use thiserror::Error;

/// Invalid emitter configuration, reported at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `max_size` must be at least 1.
    #[error("max_size must be positive")]
    ZeroMaxSize,

    /// `interval` must be non-zero.
    #[error("interval must be a positive duration")]
    ZeroInterval,

    /// No delivery listener was supplied before `build()`.
    #[error("no delivery listener configured")]
    MissingListener,

    /// The timer thread name is empty.
    #[error("timer thread name must not be empty")]
    EmptyThreadName,
}

/// Errors returned when creating a [`BulkEmitter`](crate::BulkEmitter).
#[derive(Debug, Error)]
pub enum EmitterError {
    /// The configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The OS refused to spawn the flush timer thread.
    #[error("failed to spawn flush timer: {0}")]
    TimerSpawn(#[from] std::io::Error),
}

impl EmitterError {
    /// Returns `true` if the error stems from the supplied configuration
    /// rather than the environment.
    #[inline]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
