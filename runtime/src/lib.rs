//! # Jersey Runtime
//!
//! Allocator runtime for jersey numbers.
//!
//! This crate turns the pure [`CounterState`](jersey_core::CounterState)
//! transitions into durable, concurrency-safe operations over any
//! [`CounterStore`](jersey_core::CounterStore).
//!
//! ## Core Components
//!
//! - **Allocator**: `allocate`, `release`, `allocate_for`, `snapshot`, `bootstrap`
//! - **Retry**: exponential backoff with jitter, bounded by attempts and a deadline
//! - **Config**: environment-driven retry and compaction settings
//! - **Metrics**: Prometheus counters, histograms and gauges
//!
//! ## Example
//!
//! ```ignore
//! use jersey_runtime::{Allocator, AllocatorConfig};
//! use jersey_postgres::PostgresCounterStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(PostgresCounterStore::new(&database_url).await?);
//! let allocator = Allocator::new(store, AllocatorConfig::from_env());
//! allocator.bootstrap().await?;
//!
//! let number = allocator.allocate().await?;
//! ```

/// The allocator and its compare-and-swap retry loop
pub mod allocator;

/// Environment-driven configuration
pub mod config;

/// Error types surfaced to callers
pub mod error;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

pub use allocator::Allocator;
pub use config::AllocatorConfig;
pub use error::{AllocatorError, RegistrationError};
pub use retry::{RetryError, RetryPolicy};
