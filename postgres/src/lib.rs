//! `PostgreSQL` counter store for the jersey number allocator.
//!
//! This crate provides [`PostgresCounterStore`], the production
//! implementation of the `CounterStore` trait from `jersey-core`:
//!
//! - One row per counter key in `jersey_counters`
//! - Optimistic concurrency via a `version` column and conditional `UPDATE`
//! - Connection pooling through sqlx
//! - Embedded migrations
//!
//! # Example
//!
//! ```ignore
//! use jersey_postgres::PostgresCounterStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresCounterStore::new("postgres://localhost/jersey").await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod store;

pub use store::PostgresCounterStore;
