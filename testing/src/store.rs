//! In-memory counter store for fast, deterministic tests.
//!
//! Behaves like the Postgres store (same version semantics, same errors) and
//! adds knobs the database cannot offer on demand:
//! - [`Fault`] injection on the next compare-and-swap
//! - artificial latency to widen the read-to-write race window
//! - counters for CAS attempts and observed conflicts

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only poisoned locks panic

use jersey_core::counter::{CounterSnapshot, CounterState};
use jersey_core::environment::{Clock, SystemClock};
use jersey_core::number::{CounterKey, Version};
use jersey_core::store::{CounterStore, CounterStoreError, StoreFuture};
use jersey_core::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A failure to report from the next `compare_and_swap` instead of writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Report a concurrency conflict as if another writer got there first.
    Conflict,
    /// Report a retryable infrastructure error.
    Transient,
    /// Report a permanent database error.
    Unavailable,
}

#[derive(Debug, Clone)]
struct Record {
    state: CounterState,
    version: Version,
    updated_at: DateTime<Utc>,
}

impl Record {
    fn snapshot(&self, key: &CounterKey) -> CounterSnapshot {
        CounterSnapshot {
            key: key.clone(),
            state: self.state.clone(),
            version: self.version,
            updated_at: self.updated_at,
        }
    }
}

struct Inner {
    records: Mutex<HashMap<CounterKey, Record>>,
    faults: Mutex<VecDeque<Fault>>,
    cas_attempts: AtomicU64,
    conflicts: AtomicU64,
}

/// HashMap-backed [`CounterStore`].
///
/// Clones share the same records, so a test can keep a handle for
/// inspection while the allocator owns another.
///
/// # Example
///
/// ```
/// use jersey_testing::{Fault, InMemoryCounterStore};
/// use jersey_core::store::CounterStore;
/// use jersey_core::{CounterKey, CounterState};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryCounterStore::new();
/// let key = CounterKey::default();
///
/// let snapshot = store.initialize(key.clone()).await?;
/// store.inject(Fault::Conflict);
///
/// let err = store
///     .compare_and_swap(key, snapshot.version, CounterState::new())
///     .await
///     .unwrap_err();
/// assert!(err.is_conflict());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryCounterStore {
    inner: Arc<Inner>,
    clock: Arc<dyn Clock>,
    latency: Option<Duration>,
}

impl std::fmt::Debug for InMemoryCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCounterStore")
            .field("counters", &self.inner.records.lock().unwrap().len())
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCounterStore {
    /// Create an empty store using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(HashMap::new()),
                faults: Mutex::new(VecDeque::new()),
                cas_attempts: AtomicU64::new(0),
                conflicts: AtomicU64::new(0),
            }),
            clock: Arc::new(SystemClock),
            latency: None,
        }
    }

    /// Stamp commits with `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Sleep for `latency` before every read and write.
    ///
    /// Simulates a network round trip so concurrent allocators overlap.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Put `state` under `key` at the initial version, replacing any record.
    pub fn seed(&self, key: CounterKey, state: CounterState) {
        let record = Record {
            state,
            version: Version::INITIAL,
            updated_at: self.clock.now(),
        };
        self.inner.records.lock().unwrap().insert(key, record);
    }

    /// Current state of `key`, if it exists.
    #[must_use]
    pub fn state(&self, key: &CounterKey) -> Option<CounterState> {
        self.inner
            .records
            .lock()
            .unwrap()
            .get(key)
            .map(|r| r.state.clone())
    }

    /// Current version of `key`, if it exists.
    #[must_use]
    pub fn version(&self, key: &CounterKey) -> Option<Version> {
        self.inner.records.lock().unwrap().get(key).map(|r| r.version)
    }

    /// Queue a fault for an upcoming `compare_and_swap`.
    ///
    /// Faults are consumed in order, one per call.
    pub fn inject(&self, fault: Fault) {
        self.inner.faults.lock().unwrap().push_back(fault);
    }

    /// Faults not consumed yet.
    #[must_use]
    pub fn pending_faults(&self) -> usize {
        self.inner.faults.lock().unwrap().len()
    }

    /// Number of `compare_and_swap` calls, including failed ones.
    #[must_use]
    pub fn cas_attempts(&self) -> u64 {
        self.inner.cas_attempts.load(Ordering::Relaxed)
    }

    /// Number of conflicts reported, injected or real.
    #[must_use]
    pub fn conflicts(&self) -> u64 {
        self.inner.conflicts.load(Ordering::Relaxed)
    }

    /// Remove every record and fault and reset the counters.
    pub fn clear(&self) {
        self.inner.records.lock().unwrap().clear();
        self.inner.faults.lock().unwrap().clear();
        self.inner.cas_attempts.store(0, Ordering::Relaxed);
        self.inner.conflicts.store(0, Ordering::Relaxed);
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn conflict(&self, key: CounterKey, expected: Version, actual: Version) -> CounterStoreError {
        self.inner.conflicts.fetch_add(1, Ordering::Relaxed);
        CounterStoreError::ConcurrencyConflict {
            key,
            expected,
            actual,
        }
    }
}

impl CounterStore for InMemoryCounterStore {
    fn initialize(&self, key: CounterKey) -> StoreFuture<'_, CounterSnapshot> {
        Box::pin(async move {
            self.delay().await;
            let mut records = self.inner.records.lock().unwrap();
            let record = records.entry(key.clone()).or_insert_with(|| Record {
                state: CounterState::new(),
                version: Version::INITIAL,
                updated_at: self.clock.now(),
            });
            Ok(record.snapshot(&key))
        })
    }

    fn load(&self, key: CounterKey) -> StoreFuture<'_, CounterSnapshot> {
        Box::pin(async move {
            self.delay().await;
            let records = self.inner.records.lock().unwrap();
            records
                .get(&key)
                .map(|r| r.snapshot(&key))
                .ok_or(CounterStoreError::NotInitialized(key))
        })
    }

    fn compare_and_swap(
        &self,
        key: CounterKey,
        expected: Version,
        state: CounterState,
    ) -> StoreFuture<'_, CounterSnapshot> {
        Box::pin(async move {
            self.delay().await;
            self.inner.cas_attempts.fetch_add(1, Ordering::Relaxed);

            let fault = self.inner.faults.lock().unwrap().pop_front();
            match fault {
                Some(Fault::Conflict) => return Err(self.conflict(key, expected, expected.next())),
                Some(Fault::Transient) => {
                    return Err(CounterStoreError::Transient("injected transient fault".into()));
                }
                Some(Fault::Unavailable) => {
                    return Err(CounterStoreError::DatabaseError("injected outage".into()));
                }
                None => {}
            }

            let mut records = self.inner.records.lock().unwrap();
            let Some(record) = records.get_mut(&key) else {
                return Err(CounterStoreError::NotInitialized(key));
            };
            if record.version != expected {
                let actual = record.version;
                drop(records);
                return Err(self.conflict(key, expected, actual));
            }

            record.state = state;
            record.version = expected.next();
            record.updated_at = self.clock.now();
            Ok(record.snapshot(&key))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::test_clock;

    #[tokio::test]
    async fn initialize_creates_record_once() {
        let store = InMemoryCounterStore::new().with_clock(test_clock());
        let key = CounterKey::default();

        let first = store.initialize(key.clone()).await.unwrap();
        assert_eq!(first.state, CounterState::new());
        assert_eq!(first.version, Version::INITIAL);
        assert_eq!(first.updated_at, test_clock().now());

        let mut state = CounterState::new();
        state.allocate().unwrap();
        store
            .compare_and_swap(key.clone(), first.version, state.clone())
            .await
            .unwrap();

        let again = store.initialize(key).await.unwrap();
        assert_eq!(again.state, state);
        assert_eq!(again.version, Version::new(1));
    }

    #[tokio::test]
    async fn load_missing_counter_is_not_initialized() {
        let store = InMemoryCounterStore::new();
        let err = store.load(CounterKey::new("nope")).await.unwrap_err();
        assert_eq!(err, CounterStoreError::NotInitialized(CounterKey::new("nope")));
    }

    #[tokio::test]
    async fn stale_version_is_rejected_without_writing() {
        let store = InMemoryCounterStore::new();
        let key = CounterKey::default();
        let snapshot = store.initialize(key.clone()).await.unwrap();

        let mut winner = snapshot.state.clone();
        winner.allocate().unwrap();
        store
            .compare_and_swap(key.clone(), snapshot.version, winner.clone())
            .await
            .unwrap();

        let mut loser = snapshot.state.clone();
        loser.allocate().unwrap();
        loser.allocate().unwrap();
        let err = store
            .compare_and_swap(key.clone(), snapshot.version, loser)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            CounterStoreError::ConcurrencyConflict {
                key: key.clone(),
                expected: Version::INITIAL,
                actual: Version::new(1),
            }
        );
        assert_eq!(store.state(&key), Some(winner));
        assert_eq!(store.conflicts(), 1);
        assert_eq!(store.cas_attempts(), 2);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_in_order() {
        let store = InMemoryCounterStore::new();
        let key = CounterKey::default();
        let snapshot = store.initialize(key.clone()).await.unwrap();

        store.inject(Fault::Transient);
        store.inject(Fault::Unavailable);
        assert_eq!(store.pending_faults(), 2);

        let first = store
            .compare_and_swap(key.clone(), snapshot.version, CounterState::new())
            .await
            .unwrap_err();
        assert!(first.is_retryable());

        let second = store
            .compare_and_swap(key.clone(), snapshot.version, CounterState::new())
            .await
            .unwrap_err();
        assert!(!second.is_retryable());

        assert_eq!(store.pending_faults(), 0);
        assert_eq!(store.version(&key), Some(Version::INITIAL));
    }

    #[tokio::test]
    async fn clones_share_records() {
        let store = InMemoryCounterStore::new();
        let handle = store.clone();
        store.seed(CounterKey::default(), CounterState::from_parts(3, [2]).unwrap());

        assert_eq!(
            handle.state(&CounterKey::default()),
            Some(CounterState::from_parts(3, [2]).unwrap())
        );

        handle.clear();
        assert_eq!(store.state(&CounterKey::default()), None);
    }
}
