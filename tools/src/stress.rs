//! Registration spike simulation.
//!
//! Fires `concurrency` allocations at once and checks that no number was
//! handed out twice. Useful against a real database to size the retry budget.

use jersey_core::store::CounterStore;
use jersey_runtime::Allocator;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Result of a stress run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StressReport {
    /// Allocations attempted.
    pub requested: usize,
    /// Numbers handed out, ascending.
    pub allocated: Vec<u64>,
    /// Numbers handed out more than once. Must be empty.
    pub duplicates: Vec<u64>,
    /// Failed allocations by error kind.
    pub failures: BTreeMap<&'static str, usize>,
    /// Numbers released again at the end of the run.
    pub released: usize,
    /// Wall-clock time of the run in milliseconds.
    pub elapsed_ms: u64,
}

impl StressReport {
    /// Whether every allocation succeeded and all numbers are distinct.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty() && self.failures.is_empty()
    }
}

/// Run `concurrency` concurrent allocations; release them afterwards when
/// `release` is set.
pub async fn run_stress<S>(allocator: &Allocator<S>, concurrency: usize, release: bool) -> StressReport
where
    S: CounterStore + ?Sized + 'static,
{
    let started = Instant::now();
    let allocator = Arc::new(allocator.clone());

    let handles: Vec<_> = (0..concurrency)
        .map(|_| {
            let allocator = Arc::clone(&allocator);
            tokio::spawn(async move { allocator.allocate().await })
        })
        .collect();

    let mut report = StressReport {
        requested: concurrency,
        ..StressReport::default()
    };
    let mut seen = HashSet::new();
    let mut handed_out = Vec::new();

    for handle in handles {
        match handle.await {
            Ok(Ok(number)) => {
                if !seen.insert(number.get()) {
                    report.duplicates.push(number.get());
                }
                report.allocated.push(number.get());
                handed_out.push(number);
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Stress allocation failed");
                *report.failures.entry(e.kind()).or_default() += 1;
            }
            Err(e) => {
                warn!(error = %e, "Stress task panicked");
                *report.failures.entry("panicked").or_default() += 1;
            }
        }
    }
    report.allocated.sort_unstable();
    report.duplicates.sort_unstable();

    if release {
        for number in handed_out {
            match allocator.release(number).await {
                Ok(_) => report.released += 1,
                Err(e) => warn!(
                    counter = %allocator.key(),
                    number = %number,
                    error = %e,
                    "Stress release failed"
                ),
            }
        }
    }

    report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(
        counter = %allocator.key(),
        requested = report.requested,
        allocated = report.allocated.len(),
        duplicates = report.duplicates.len(),
        released = report.released,
        elapsed_ms = report.elapsed_ms,
        "Stress run finished"
    );
    report
}
