//! Errors surfaced by the allocator.
//!
//! Conflicts and transient store errors never cross this boundary on their
//! own; they are retried and only show up as `AllocationExhausted` once the
//! budget is spent.

use jersey_core::counter::InvalidReleaseReason;
use jersey_core::number::JerseyNumber;
use jersey_core::store::CounterStoreError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`crate::Allocator`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    /// Retry budget or deadline spent while the store kept reporting
    /// conflicts or transient failures.
    ///
    /// For `allocate` this is a registration failure the user has to retry.
    #[error("{operation} exhausted after {attempts} attempt(s) in {elapsed:?}: {last_error}")]
    AllocationExhausted {
        /// Operation that gave up (`allocate` or `release`).
        operation: &'static str,
        /// Attempts made.
        attempts: u32,
        /// Time spent.
        elapsed: Duration,
        /// Error of the final attempt.
        last_error: CounterStoreError,
    },

    /// The store failed in a way retrying cannot fix.
    #[error("{operation} failed: {source}")]
    AllocationFailed {
        /// Operation that failed.
        operation: &'static str,
        /// Underlying store error.
        #[source]
        source: CounterStoreError,
    },

    /// The number is not currently in use. Nothing was changed.
    #[error("Invalid release of {number}: {reason}")]
    InvalidRelease {
        /// Number the caller tried to release.
        number: JerseyNumber,
        /// Why it was rejected.
        reason: InvalidReleaseReason,
    },

    /// The counter cannot grow past the storable maximum.
    #[error("Jersey number range exhausted at {last_assigned}")]
    RangeOverflow {
        /// High-water mark of the counter.
        last_assigned: u64,
    },
}

impl AllocatorError {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AllocationExhausted { .. } => "exhausted",
            Self::AllocationFailed { .. } => "failed",
            Self::InvalidRelease { .. } => "invalid_release",
            Self::RangeOverflow { .. } => "range_overflow",
        }
    }
}

/// Error from [`crate::Allocator::allocate_for`].
#[derive(Error, Debug)]
pub enum RegistrationError<E> {
    /// No number could be allocated; `create` was never called.
    #[error(transparent)]
    Allocation(#[from] AllocatorError),

    /// `create` failed. The number was handed back unless `release_error`
    /// says otherwise.
    #[error("registration step failed for jersey number {number}: {error}")]
    Create {
        /// Number that was allocated for the failed registration.
        number: JerseyNumber,
        /// Error returned by `create`.
        error: E,
        /// Set when compensating release failed too; the number is then
        /// orphaned until an operator releases it.
        release_error: Option<AllocatorError>,
    },
}
