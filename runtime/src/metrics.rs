//! Prometheus metrics for the allocator.
//!
//! Metrics are emitted through the `metrics` facade on every operation; they
//! are no-ops until a recorder is installed. [`MetricsExporter`] installs the
//! Prometheus recorder and renders the text exposition format.
//!
//! # Example
//!
//! ```rust,no_run
//! use jersey_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! // ... allocate some numbers ...
//!
//! if let Some(text) = exporter.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use jersey_core::counter::CounterState;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder handle.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that has not installed a recorder yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the recorder cannot be built or installed.
    ///
    /// # Note
    ///
    /// Only one global recorder can exist per process. If one is already
    /// installed (e.g. by another test), this logs a warning and succeeds
    /// without a handle.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
                    5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                register_metrics();
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if no recorder was installed by this exporter.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "jersey_allocations_total",
        "Total number of jersey numbers handed out"
    );
    describe_counter!(
        "jersey_releases_total",
        "Total number of jersey numbers returned, by outcome"
    );
    describe_counter!(
        "jersey_invalid_releases_total",
        "Total number of rejected releases, by reason"
    );
    describe_counter!(
        "jersey_conflicts_total",
        "Optimistic concurrency conflicts observed, by operation"
    );
    describe_counter!(
        "jersey_transient_errors_total",
        "Transient store errors observed, by operation"
    );
    describe_counter!(
        "jersey_exhausted_total",
        "Operations that gave up after spending their retry budget"
    );
    describe_histogram!(
        "jersey_allocate_duration_seconds",
        "Time taken by allocate, including retries"
    );
    describe_histogram!(
        "jersey_release_duration_seconds",
        "Time taken by release, including retries"
    );
    describe_histogram!("jersey_attempts", "Store attempts per successful operation");
    describe_gauge!(
        "jersey_last_assigned",
        "High-water mark after the last commit"
    );
    describe_gauge!(
        "jersey_free_pool_size",
        "Free pool size after the last commit"
    );
}

/// Record a store error seen by one attempt of `operation`.
pub fn record_attempt_error(operation: &'static str, conflict: bool) {
    if conflict {
        counter!("jersey_conflicts_total", "operation" => operation).increment(1);
    } else {
        counter!("jersey_transient_errors_total", "operation" => operation).increment(1);
    }
}

/// Record a committed operation.
#[allow(clippy::cast_precision_loss)] // Gauges are f64; counters far below 2^52 in practice
pub fn record_commit(operation: &'static str, attempts: u32, elapsed: Duration, state: &CounterState) {
    histogram!(format!("jersey_{operation}_duration_seconds")).record(elapsed.as_secs_f64());
    histogram!("jersey_attempts", "operation" => operation).record(f64::from(attempts));
    gauge!("jersey_last_assigned").set(state.last_assigned() as f64);
    gauge!("jersey_free_pool_size").set(state.free_count() as f64);
}

/// Record a successful allocation.
pub fn record_allocation() {
    counter!("jersey_allocations_total").increment(1);
}

/// Record a successful release.
pub fn record_release(outcome: &'static str) {
    counter!("jersey_releases_total", "outcome" => outcome).increment(1);
}

/// Record a rejected release.
pub fn record_invalid_release(reason: &'static str) {
    counter!("jersey_invalid_releases_total", "reason" => reason).increment(1);
}

/// Record an operation that ran out of budget.
pub fn record_exhausted(operation: &'static str) {
    counter!("jersey_exhausted_total", "operation" => operation).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_is_none_before_install() {
        let exporter = MetricsExporter::new();
        assert!(exporter.handle().is_none());
        assert!(exporter.render().is_none());
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_allocation();
        record_release("pooled");
        record_invalid_release("already_free");
        record_attempt_error("allocate", true);
        record_attempt_error("allocate", false);
        record_exhausted("release");
        record_commit("allocate", 2, Duration::from_millis(3), &CounterState::new());
    }
}
