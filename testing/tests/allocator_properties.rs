//! Allocator-level invariants over random operation sequences and under
//! concurrent load with injected faults.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code

use jersey_core::counter::{CounterState, ReleaseOutcome};
use jersey_core::{CounterKey, JerseyNumber};
use jersey_runtime::{Allocator, AllocatorConfig, AllocatorError, RetryPolicy};
use jersey_testing::helpers::init_test_tracing;
use jersey_testing::properties::{Op, ops};
use jersey_testing::{Fault, InMemoryCounterStore, assert_partition};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn config() -> AllocatorConfig {
    AllocatorConfig {
        retry: RetryPolicy::builder()
            .max_retries(1_000)
            .initial_delay(Duration::from_micros(50))
            .max_delay(Duration::from_millis(2))
            .deadline(Duration::from_secs(30))
            .build(),
        ..AllocatorConfig::default()
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sequential_operations_keep_the_partition(sequence in ops(60)) {
        runtime().block_on(async {
            let store = InMemoryCounterStore::new();
            let allocator = Allocator::new(Arc::new(store.clone()), config());
            allocator.bootstrap().await.unwrap();
            let key = CounterKey::default();
            let mut held: HashSet<u64> = HashSet::new();

            for op in sequence {
                let before = store.state(&key).unwrap();
                match op {
                    Op::Allocate => {
                        let number = allocator.allocate().await.unwrap().get();
                        let expected = before
                            .free_numbers()
                            .first()
                            .map_or(before.last_assigned() + 1, |n| n.get());
                        prop_assert_eq!(number, expected);
                        prop_assert!(held.insert(number));
                    }
                    Op::ReleaseHeld(index) => {
                        if held.is_empty() {
                            continue;
                        }
                        let mut sorted: Vec<u64> = held.iter().copied().collect();
                        sorted.sort_unstable();
                        let number = sorted[index % sorted.len()];
                        let outcome = allocator
                            .release(JerseyNumber::new(number).unwrap())
                            .await
                            .unwrap();
                        held.remove(&number);
                        if let ReleaseOutcome::Compacted { last_assigned, .. } = outcome {
                            prop_assert_eq!(
                                last_assigned,
                                held.iter().copied().max().unwrap_or(0)
                            );
                        }
                    }
                    Op::ReleaseRaw(number) => {
                        let result = allocator.release(JerseyNumber::new(number).unwrap()).await;
                        if held.remove(&number) {
                            prop_assert!(result.is_ok());
                        } else {
                            let rejected = matches!(result, Err(AllocatorError::InvalidRelease { .. }));
                            prop_assert!(rejected);
                            prop_assert_eq!(store.state(&key).unwrap(), before);
                        }
                    }
                }
                assert_partition(&store.state(&key).unwrap(), &held);
            }
            Ok(())
        })?;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_churn_with_faults_never_duplicates() {
    init_test_tracing();
    let store = InMemoryCounterStore::new().with_latency(Duration::from_micros(100));
    let allocator = Allocator::new(Arc::new(store.clone()), config());
    allocator.bootstrap().await.unwrap();

    for i in 0..30 {
        store.inject(if i % 3 == 0 { Fault::Transient } else { Fault::Conflict });
    }

    let handles: Vec<_> = (0..32)
        .map(|task| {
            let allocator = allocator.clone();
            tokio::spawn(async move {
                let mut kept = Vec::new();
                for round in 0..10 {
                    let number = allocator.allocate().await.unwrap();
                    if (task + round) % 2 == 0 {
                        allocator.release(number).await.unwrap();
                    } else {
                        kept.push(number.get());
                    }
                }
                kept
            })
        })
        .collect();

    let mut held = HashSet::new();
    for handle in handles {
        for number in handle.await.unwrap() {
            assert!(held.insert(number), "{number} handed out twice");
        }
    }

    assert_eq!(store.pending_faults(), 0);
    let state = store.state(&CounterKey::default()).unwrap();
    assert_partition(&state, &held);
    assert_eq!(state.in_use_count(), held.len() as u64);
}

#[tokio::test]
async fn registration_spike_fills_range_densely() {
    let store = InMemoryCounterStore::new();
    store.seed(
        CounterKey::default(),
        CounterState::from_parts(10, [2, 5, 7]).unwrap(),
    );
    let allocator = Allocator::new(Arc::new(store.clone()), config());

    let mut numbers = Vec::new();
    for _ in 0..5 {
        numbers.push(allocator.allocate().await.unwrap().get());
    }

    assert_eq!(numbers, vec![2, 5, 7, 11, 12]);
}
