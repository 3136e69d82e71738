//! The jersey number allocator.
//!
//! Every operation is a read-modify-write cycle against one counter record:
//!
//! ```text
//! ┌──────────┐  load   ┌─────────────┐ transition ┌──────────────┐  compare_and_swap
//! │  Store   │ ──────► │  snapshot   │ ─────────► │  next state  │ ─────────────────► Store
//! └──────────┘         │ (version v) │            └──────────────┘   "if still at v"
//!      ▲               └─────────────┘                                     │
//!      └──────────── conflict / transient error: back off, re-read ◄──────┘
//! ```
//!
//! Correctness comes only from the conditional write: two allocators that
//! read the same version compute the same number, and exactly one of them
//! commits. The loser re-reads and picks again.

use crate::config::AllocatorConfig;
use crate::error::{AllocatorError, RegistrationError};
use crate::metrics;
use crate::retry::{RetryError, retry_with_predicate};
use jersey_core::counter::{CounterSnapshot, CounterState, ReleaseOutcome, TransitionError};
use jersey_core::number::{CounterKey, JerseyNumber};
use jersey_core::store::{CounterStore, CounterStoreError};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const ALLOCATE: &str = "allocate";
const RELEASE: &str = "release";

/// Failure of a single read-modify-write attempt.
#[derive(Debug)]
enum AttemptError {
    Store(CounterStoreError),
    Transition(TransitionError),
}

impl AttemptError {
    const fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Transition(_) => false,
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "{e}"),
            Self::Transition(e) => write!(f, "{e}"),
        }
    }
}

/// Hands out and takes back jersey numbers for one counter.
///
/// Cheap to clone; clones share the store.
///
/// # Example
///
/// ```no_run
/// use jersey_runtime::{Allocator, AllocatorConfig};
/// use jersey_core::store::CounterStore;
/// use std::sync::Arc;
///
/// # async fn example(store: Arc<dyn CounterStore>) -> Result<(), Box<dyn std::error::Error>> {
/// let allocator = Allocator::new(store, AllocatorConfig::default());
/// allocator.bootstrap().await?;
///
/// let number = allocator.allocate().await?;
/// allocator.release(number).await?;
/// # Ok(())
/// # }
/// ```
pub struct Allocator<S: CounterStore + ?Sized> {
    store: Arc<S>,
    config: AllocatorConfig,
}

impl<S: CounterStore + ?Sized> Clone for Allocator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<S: CounterStore + ?Sized> Allocator<S> {
    /// Create an allocator over `store`.
    #[must_use]
    pub const fn new(store: Arc<S>, config: AllocatorConfig) -> Self {
        Self { store, config }
    }

    /// The counter this allocator operates on.
    #[must_use]
    pub const fn key(&self) -> &CounterKey {
        &self.config.key
    }

    /// Create the counter record if it does not exist yet.
    ///
    /// Idempotent; safe to call on every process start.
    ///
    /// # Errors
    ///
    /// - [`AllocatorError::AllocationExhausted`] if the store stayed unavailable
    /// - [`AllocatorError::AllocationFailed`] on a permanent store error
    pub async fn bootstrap(&self) -> Result<CounterSnapshot, AllocatorError> {
        let (store, key) = (&self.store, &self.config.key);
        let snapshot = retry_with_predicate(
            &self.config.retry,
            move || store.initialize(key.clone()),
            CounterStoreError::is_retryable,
        )
        .await
        .map_err(|e| store_error("bootstrap", e))?;

        info!(
            counter = %snapshot.key,
            last_assigned = snapshot.state.last_assigned(),
            free = snapshot.state.free_count(),
            version = %snapshot.version,
            "Counter ready"
        );
        Ok(snapshot)
    }

    /// Read the current record for reporting.
    ///
    /// The result is stale the moment it returns; never base a write on it.
    ///
    /// # Errors
    ///
    /// - [`AllocatorError::AllocationExhausted`] if the store stayed unavailable
    /// - [`AllocatorError::AllocationFailed`] on a permanent store error
    pub async fn snapshot(&self) -> Result<CounterSnapshot, AllocatorError> {
        let (store, key) = (&self.store, &self.config.key);
        retry_with_predicate(
            &self.config.retry,
            move || store.load(key.clone()),
            CounterStoreError::is_retryable,
        )
        .await
        .map_err(|e| store_error("snapshot", e))
    }

    /// Hand out a jersey number.
    ///
    /// Returns the smallest free number if the pool is non-empty, otherwise
    /// `last_assigned + 1`. The number is not returned again by any
    /// allocator until it is released.
    ///
    /// # Errors
    ///
    /// - [`AllocatorError::AllocationExhausted`]: too much contention or store
    ///   unavailability; the caller must not persist a participant
    /// - [`AllocatorError::AllocationFailed`]: permanent store failure
    ///   (e.g. the counter was never bootstrapped)
    /// - [`AllocatorError::RangeOverflow`]: the counter is full
    pub async fn allocate(&self) -> Result<JerseyNumber, AllocatorError> {
        let (number, snapshot) = self.mutate(ALLOCATE, CounterState::allocate).await?;

        metrics::record_allocation();
        info!(
            counter = %snapshot.key,
            number = %number,
            version = %snapshot.version,
            "Jersey number allocated"
        );
        Ok(number)
    }

    /// Return a jersey number to the counter.
    ///
    /// The number becomes eligible for reuse, or is retired below the new
    /// high-water mark if it was the top of the range and compaction is on.
    ///
    /// # Errors
    ///
    /// - [`AllocatorError::InvalidRelease`]: the number is not in use; nothing
    ///   changed, so a repeated release is harmless
    /// - [`AllocatorError::AllocationExhausted`]/[`AllocatorError::AllocationFailed`]:
    ///   the release did not happen and may be retried
    pub async fn release(&self, number: JerseyNumber) -> Result<ReleaseOutcome, AllocatorError> {
        let policy = self.config.compaction;
        let result = self
            .mutate(RELEASE, |state: &mut CounterState| state.release(number, policy))
            .await;

        match result {
            Ok((outcome, snapshot)) => {
                metrics::record_release(outcome.as_str());
                info!(
                    counter = %snapshot.key,
                    number = %number,
                    outcome = outcome.as_str(),
                    last_assigned = snapshot.state.last_assigned(),
                    version = %snapshot.version,
                    "Jersey number released"
                );
                Ok(outcome)
            }
            Err(AllocatorError::InvalidRelease { number, reason }) => {
                metrics::record_invalid_release(reason.as_str());
                warn!(
                    counter = %self.config.key,
                    number = %number,
                    reason = %reason,
                    "Ignoring invalid release"
                );
                Err(AllocatorError::InvalidRelease { number, reason })
            }
            Err(e) => Err(e),
        }
    }

    /// Allocate a number and run `create` with it, handing the number back if
    /// `create` fails.
    ///
    /// Use this when the participant record lives in a different store than
    /// the counter, so both cannot commit in one transaction. The compensating
    /// release is best effort: if it fails too, the error carries
    /// `release_error` and the number stays allocated until released by hand.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::Allocation`] if no number could be allocated
    /// - [`RegistrationError::Create`] if `create` failed
    pub async fn allocate_for<F, Fut, T, E>(&self, create: F) -> Result<(JerseyNumber, T), RegistrationError<E>>
    where
        F: FnOnce(JerseyNumber) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let number = self.allocate().await?;

        match create(number).await {
            Ok(value) => Ok((number, value)),
            Err(error) => {
                warn!(
                    counter = %self.config.key,
                    number = %number,
                    error = %error,
                    "Registration step failed, releasing jersey number"
                );
                let release_error = self.release(number).await.err();
                if let Some(e) = &release_error {
                    error!(
                        counter = %self.config.key,
                        number = %number,
                        error = %e,
                        "Compensating release failed, jersey number is orphaned"
                    );
                }
                Err(RegistrationError::Create {
                    number,
                    error,
                    release_error,
                })
            }
        }
    }

    /// Apply `transition` to the current state and commit it with CAS,
    /// retrying conflicts and transient errors within the retry budget.
    async fn mutate<T, F>(
        &self,
        operation: &'static str,
        transition: F,
    ) -> Result<(T, CounterSnapshot), AllocatorError>
    where
        F: Fn(&mut CounterState) -> Result<T, TransitionError>,
    {
        let started = Instant::now();
        let attempts = &AtomicU32::new(0);
        let transition = &transition;
        let key = &self.config.key;

        let result = retry_with_predicate(
            &self.config.retry,
            move || async move {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                let outcome = self.attempt(key, transition).await;
                if let Err(AttemptError::Store(e)) = &outcome {
                    if e.is_retryable() {
                        metrics::record_attempt_error(operation, e.is_conflict());
                    }
                    debug!(counter = %key, operation, attempt, error = %e, "Attempt failed");
                }
                outcome
            },
            AttemptError::is_retryable,
        )
        .await;

        match result {
            Ok((value, snapshot)) => {
                metrics::record_commit(
                    operation,
                    attempts.load(Ordering::Relaxed),
                    started.elapsed(),
                    &snapshot.state,
                );
                Ok((value, snapshot))
            }
            Err(RetryError::Permanent {
                error: AttemptError::Transition(e),
                ..
            }) => Err(match e {
                TransitionError::InvalidRelease { number, reason } => {
                    AllocatorError::InvalidRelease { number, reason }
                }
                TransitionError::RangeOverflow { last_assigned } => {
                    AllocatorError::RangeOverflow { last_assigned }
                }
            }),
            Err(RetryError::Permanent {
                error: AttemptError::Store(source),
                ..
            }) => Err(AllocatorError::AllocationFailed { operation, source }),
            Err(RetryError::Exhausted {
                attempts,
                elapsed,
                last_error,
            }) => {
                metrics::record_exhausted(operation);
                let last_error = match last_error {
                    AttemptError::Store(e) => e,
                    AttemptError::Transition(e) => CounterStoreError::DatabaseError(e.to_string()),
                };
                Err(AllocatorError::AllocationExhausted {
                    operation,
                    attempts,
                    elapsed,
                    last_error,
                })
            }
        }
    }

    /// One read-modify-write cycle. Writes nothing unless the CAS succeeds.
    async fn attempt<T, F>(
        &self,
        key: &CounterKey,
        transition: &F,
    ) -> Result<(T, CounterSnapshot), AttemptError>
    where
        F: Fn(&mut CounterState) -> Result<T, TransitionError>,
    {
        let snapshot = self
            .store
            .load(key.clone())
            .await
            .map_err(AttemptError::Store)?;

        let mut next = snapshot.state;
        let value = transition(&mut next).map_err(AttemptError::Transition)?;

        let committed = self
            .store
            .compare_and_swap(key.clone(), snapshot.version, next)
            .await
            .map_err(AttemptError::Store)?;

        Ok((value, committed))
    }
}

fn store_error(operation: &'static str, error: RetryError<CounterStoreError>) -> AllocatorError {
    match error {
        RetryError::Permanent { error, .. } => AllocatorError::AllocationFailed {
            operation,
            source: error,
        },
        RetryError::Exhausted {
            attempts,
            elapsed,
            last_error,
        } => AllocatorError::AllocationExhausted {
            operation,
            attempts,
            elapsed,
            last_error,
        },
    }
}
