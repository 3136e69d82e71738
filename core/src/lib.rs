//! # Jersey Core
//!
//! Core types for the jersey number allocator.
//!
//! Every event participant gets a unique, compact, positive integer printed on
//! their bib. Numbers released by deleted or rejected participants are reused
//! (smallest first) before new ones are minted, so the printed range stays
//! dense.
//!
//! ## Core Concepts
//!
//! - **`CounterState`**: high-water mark plus free pool, with pure
//!   `allocate`/`release` transitions
//! - **`CounterSnapshot`**: a state as read from a store, with its version
//! - **`CounterStore`**: durable storage with compare-and-swap on the version
//! - **`Clock`**: injected time source
//!
//! ## Architecture
//!
//! ```text
//! Caller ──► Allocator (jersey-runtime) ──► CounterStore (load + compare_and_swap)
//!                 │                                │
//!                 └── CounterState transitions ◄───┘
//! ```
//!
//! The retry loop lives in `jersey-runtime`; this crate has no I/O.

pub use chrono::{DateTime, Utc};

pub mod counter;
pub mod environment;
pub mod number;
pub mod store;

pub use counter::{
    CompactionPolicy, CounterSnapshot, CounterState, InvalidReleaseReason, InvariantViolation,
    ReleaseOutcome, TransitionError, MAX_NUMBER,
};
pub use number::{CounterKey, JerseyNumber, Version};
pub use store::{CounterStore, CounterStoreError, StoreFuture};
