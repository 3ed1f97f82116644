//! Debug assertion macros for emitter invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so release builds
//! pay nothing for them.

// =============================================================================
// Non-empty delivery
// =============================================================================

/// Assert that a batch about to be delivered holds at least one item.
///
/// **Invariant**: `pending == 0 → no delivery`
///
/// Used in: `EmitterInner::flush()` after the accumulator swap
macro_rules! debug_assert_nonempty_delivery {
    ($pending:expr) => {
        debug_assert!(
            $pending > 0,
            "empty batch reached the delivery path (pending count {})",
            $pending
        )
    };
}

// =============================================================================
// Single flush in progress
// =============================================================================

/// Assert that no other flush was inside the critical section.
///
/// **Invariant**: at most one flush between swap and delivery completion
///
/// Used in: `EmitterInner::flush()` on entering and leaving the critical section
macro_rules! debug_assert_exclusive_flush {
    ($was_flushing:expr) => {
        debug_assert!(
            !$was_flushing,
            "two flushes overlapped inside the flush critical section"
        )
    };
}

// =============================================================================
// Bounded overshoot
// =============================================================================

/// Assert that the pending count stays within `max_size` plus racing adds.
///
/// **Invariant**: `pending ≤ max_size + racing_producers`
///
/// Producers serialize on the accumulator lock and the one crossing the
/// threshold flushes before returning, so in a single-producer run the
/// count never exceeds `max_size`. Multiple producers can overshoot by at most
/// the number of threads that appended before the first flush swapped.
///
/// Used in: `EmitterInner::append()` (single-producer bound only)
macro_rules! debug_assert_bounded_pending {
    ($pending:expr, $limit:expr) => {
        debug_assert!(
            $pending <= $limit,
            "pending count {} exceeds bound {}",
            $pending,
            $limit
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_bounded_pending;
pub(crate) use debug_assert_exclusive_flush;
pub(crate) use debug_assert_nonempty_delivery;
