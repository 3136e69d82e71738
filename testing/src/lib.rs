//! # Jersey Testing
//!
//! Testing utilities for the jersey number allocator.
//!
//! This crate provides:
//! - [`InMemoryCounterStore`]: a `CounterStore` with fault injection and latency
//! - [`FixedClock`]: deterministic time
//! - Assertion helpers for counter invariants
//! - proptest strategies for operation sequences
//!
//! ## Example
//!
//! ```ignore
//! use jersey_testing::{Fault, InMemoryCounterStore};
//! use jersey_runtime::{Allocator, AllocatorConfig};
//!
//! #[tokio::test]
//! async fn retries_through_a_conflict() {
//!     let store = InMemoryCounterStore::new();
//!     let allocator = Allocator::new(Arc::new(store.clone()), AllocatorConfig::default());
//!     allocator.bootstrap().await.unwrap();
//!
//!     store.inject(Fault::Conflict);
//!     assert_eq!(allocator.allocate().await.unwrap().get(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use jersey_core::environment::Clock;

mod store;

pub use store::{Fault, InMemoryCounterStore};

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use jersey_testing::mocks::FixedClock;
    /// use jersey_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Install a test-friendly tracing subscriber once per process.
    ///
    /// Honors `RUST_LOG`; output goes through the test harness capture.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Assertions over counter invariants.
pub mod assertions {
    use jersey_core::counter::CounterState;
    use std::collections::HashSet;

    /// Assert that `state` is internally consistent and that the numbers it
    /// considers in use are exactly `held`.
    ///
    /// `held` is the set of numbers callers currently own. Together with the
    /// free pool it must partition `1..=last_assigned`.
    ///
    /// # Panics
    ///
    /// Panics with a description of the first violation found.
    #[allow(clippy::panic)] // Assertion helper
    pub fn assert_partition(state: &CounterState, held: &HashSet<u64>) {
        if let Err(violation) = state.check_invariants() {
            panic!("counter invariant violated: {violation}");
        }

        let free: HashSet<u64> = state.free_numbers_raw().into_iter().collect();
        if let Some(overlap) = held.intersection(&free).next() {
            panic!("{overlap} is both held and free");
        }

        for number in 1..=state.last_assigned() {
            assert!(
                held.contains(&number) || free.contains(&number),
                "{number} is neither held nor free (last_assigned {})",
                state.last_assigned()
            );
        }
        if let Some(stray) = held.iter().find(|&&n| n > state.last_assigned()) {
            panic!(
                "{stray} is held but above last_assigned {}",
                state.last_assigned()
            );
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// One caller-level operation against a counter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Op {
        /// Allocate a number and hold it.
        Allocate,
        /// Release the held number at this index (modulo the held count).
        ReleaseHeld(usize),
        /// Release an arbitrary number, valid or not.
        ReleaseRaw(u64),
    }

    /// Sequences of operations, biased towards valid ones.
    pub fn ops(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
        let op = prop_oneof![
            4 => Just(Op::Allocate),
            3 => any::<usize>().prop_map(Op::ReleaseHeld),
            1 => (1_u64..64).prop_map(Op::ReleaseRaw),
        ];
        proptest::collection::vec(op, 0..max_len)
    }
}

// Re-export commonly used items
pub use assertions::assert_partition;
pub use mocks::{FixedClock, test_clock};
