//! Counter store trait and related types.
//!
//! A counter store is the durable home of counter records. It offers exactly
//! what the allocator needs to stay correct across processes:
//!
//! - Create a record once (idempotent bootstrap)
//! - Read a record together with its version
//! - Replace a record only if it is still at the version that was read
//!
//! The conditional replace is the only write path. It must be atomic for a
//! single record; in-process locks are never a substitute because callers may
//! live in different processes behind a load balancer.
//!
//! # Implementations
//!
//! - `PostgresCounterStore` (in `jersey-postgres`): Production implementation
//! - `InMemoryCounterStore` (in `jersey-testing`): Fast, deterministic testing
//!
//! # Example
//!
//! ```no_run
//! use jersey_core::number::CounterKey;
//! use jersey_core::store::{CounterStore, CounterStoreError};
//!
//! async fn allocate_once<S: CounterStore>(store: &S) -> Result<u64, CounterStoreError> {
//!     let key = CounterKey::default();
//!     let snapshot = store.load(key.clone()).await?;
//!
//!     let mut next = snapshot.state.clone();
//!     let number = next.allocate().map_err(|e| CounterStoreError::DatabaseError(e.to_string()))?;
//!
//!     // Fails with ConcurrencyConflict if someone else committed first
//!     store.compare_and_swap(key, snapshot.version, next).await?;
//!     Ok(number.get())
//! }
//! ```

use crate::counter::{CounterSnapshot, CounterState};
use crate::number::{CounterKey, Version};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`CounterStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CounterStoreError>> + Send + 'a>>;

/// Errors that can occur during counter store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CounterStoreError {
    /// Optimistic concurrency conflict: the record moved past the expected version.
    ///
    /// Another writer committed between our read and our write. The attempt
    /// wrote nothing and can be retried from a fresh read.
    #[error("Concurrency conflict on {key}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The counter where the conflict occurred.
        key: CounterKey,
        /// The version we expected the record to be at.
        expected: Version,
        /// The actual current version of the record.
        actual: Version,
    },

    /// Retryable infrastructure failure (I/O, pool timeout, serialization failure).
    #[error("Transient store error: {0}")]
    Transient(String),

    /// The counter record does not exist; bootstrap it first.
    #[error("Counter not initialized: {0}")]
    NotInitialized(CounterKey),

    /// The persisted record violates the counter invariants.
    #[error("Corrupted counter {key}: {reason}")]
    CorruptedState {
        /// The counter whose record is corrupted.
        key: CounterKey,
        /// What is wrong with it.
        reason: String,
    },

    /// Non-retryable database error.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl CounterStoreError {
    /// Whether a fresh attempt may succeed where this one failed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. } | Self::Transient(_))
    }

    /// Whether this is an optimistic concurrency conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Durable storage for counter records with optimistic concurrency control.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one store is shared by every
/// allocator in the process.
///
/// # Dyn Compatibility
///
/// Methods return [`StoreFuture`] instead of using `async fn` so the trait can
/// be used as `Arc<dyn CounterStore>`.
pub trait CounterStore: Send + Sync {
    /// Create the record for `key` with the bootstrap state if it is absent.
    ///
    /// Returns the stored snapshot either way, so calling it on every start
    /// is safe.
    ///
    /// # Errors
    ///
    /// - `Transient`/`DatabaseError`: the store could not be reached or failed
    /// - `CorruptedState`: an existing record is invalid
    fn initialize(&self, key: CounterKey) -> StoreFuture<'_, CounterSnapshot>;

    /// Load the current record for `key`.
    ///
    /// # Errors
    ///
    /// - `NotInitialized`: no record exists for `key`
    /// - `CorruptedState`: the record violates the counter invariants
    /// - `Transient`/`DatabaseError`: the store could not be reached or failed
    fn load(&self, key: CounterKey) -> StoreFuture<'_, CounterSnapshot>;

    /// Replace the record for `key` with `state` if it is still at `expected`.
    ///
    /// On success the record's version becomes `expected.next()` and the
    /// committed snapshot is returned. On failure nothing is written.
    ///
    /// A retryable error must mean the write did not happen. When the outcome
    /// is unknown (the connection dropped after the write was sent),
    /// implementations resolve it before returning. If it cannot be resolved,
    /// `Transient` is still returned and a retry may act on a record that
    /// already contains this write: an allocation then strands one number and
    /// a release reports `InvalidRelease`.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the record is no longer at `expected`
    /// - `NotInitialized`: no record exists for `key`
    /// - `Transient`/`DatabaseError`: the store could not be reached or failed
    fn compare_and_swap(
        &self,
        key: CounterKey,
        expected: Version,
        state: CounterState,
    ) -> StoreFuture<'_, CounterSnapshot>;
}

impl<S: CounterStore + ?Sized> CounterStore for std::sync::Arc<S> {
    fn initialize(&self, key: CounterKey) -> StoreFuture<'_, CounterSnapshot> {
        (**self).initialize(key)
    }

    fn load(&self, key: CounterKey) -> StoreFuture<'_, CounterSnapshot> {
        (**self).load(key)
    }

    fn compare_and_swap(
        &self,
        key: CounterKey,
        expected: Version,
        state: CounterState,
    ) -> StoreFuture<'_, CounterSnapshot> {
        (**self).compare_and_swap(key, expected, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_conflict_error_display() {
        let error = CounterStoreError::ConcurrencyConflict {
            key: CounterKey::new("jersey"),
            expected: Version::new(5),
            actual: Version::new(7),
        };

        let display = format!("{error}");
        assert!(display.contains("expected version 5"));
        assert!(display.contains("found 7"));
    }

    #[test]
    fn only_conflicts_and_transient_errors_are_retryable() {
        let conflict = CounterStoreError::ConcurrencyConflict {
            key: CounterKey::default(),
            expected: Version::new(1),
            actual: Version::new(2),
        };
        assert!(conflict.is_retryable());
        assert!(conflict.is_conflict());

        let transient = CounterStoreError::Transient("connection reset".to_string());
        assert!(transient.is_retryable());
        assert!(!transient.is_conflict());

        assert!(!CounterStoreError::NotInitialized(CounterKey::default()).is_retryable());
        assert!(!CounterStoreError::DatabaseError("syntax".to_string()).is_retryable());
        assert!(
            !CounterStoreError::CorruptedState {
                key: CounterKey::default(),
                reason: "free pool contains 0".to_string(),
            }
            .is_retryable()
        );
    }
}
