//! Counter state and its pure transitions.
//!
//! `CounterState` is the data half of the persisted counter record: the
//! high-water mark and the free pool. Its `allocate` and `release` methods are
//! deterministic, side-effect-free transitions. Durability and concurrency
//! control are the store's job (see [`crate::store`]); the allocator runtime
//! loads a snapshot, applies one transition to a copy and commits it with a
//! compare-and-swap on the snapshot's version.
//!
//! # Invariants
//!
//! Between completed operations a state satisfies:
//!
//! 1. The free pool has no duplicates (guaranteed by `BTreeSet`).
//! 2. Every free number lies in `1..=last_assigned`.
//! 3. In-use numbers are exactly `{1..=last_assigned} \ free`.
//! 4. `last_assigned <= MAX_NUMBER`, the largest value the stores can persist.
//!
//! # Example
//!
//! ```
//! use jersey_core::counter::{CompactionPolicy, CounterState};
//! use jersey_core::number::JerseyNumber;
//!
//! let mut state = CounterState::new();
//! let first = state.allocate().unwrap();
//! let second = state.allocate().unwrap();
//! assert_eq!((first.get(), second.get()), (1, 2));
//!
//! state.release(first, CompactionPolicy::Enabled).unwrap();
//! assert_eq!(state.allocate().unwrap(), first); // reuse before growth
//! ```

use crate::number::{CounterKey, JerseyNumber, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Largest number a counter may hand out.
///
/// Stores persist numbers as signed 64-bit integers.
#[allow(clippy::cast_sign_loss)]
pub const MAX_NUMBER: u64 = i64::MAX as u64;

/// Whether releasing the highest number lowers the high-water mark.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompactionPolicy {
    /// Releasing the top number lowers `last_assigned`, cascading through
    /// free numbers directly below it.
    #[default]
    Enabled,
    /// Every released number goes to the free pool.
    Disabled,
}

impl CompactionPolicy {
    /// Build a policy from a boolean flag.
    #[must_use]
    pub const fn from_enabled(enabled: bool) -> Self {
        if enabled { Self::Enabled } else { Self::Disabled }
    }

    /// Whether compaction is enabled.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }
}

/// Why a release was rejected.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidReleaseReason {
    /// The number was never handed out (or was compacted away).
    AboveHighWaterMark {
        /// High-water mark at the time of the release.
        last_assigned: u64,
    },
    /// The number is already in the free pool.
    AlreadyFree,
}

impl InvalidReleaseReason {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AboveHighWaterMark { .. } => "above_high_water_mark",
            Self::AlreadyFree => "already_free",
        }
    }
}

impl std::fmt::Display for InvalidReleaseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AboveHighWaterMark { last_assigned } => {
                write!(f, "number is above the high-water mark {last_assigned}")
            }
            Self::AlreadyFree => write!(f, "number is already free"),
        }
    }
}

/// Errors produced by a state transition.
///
/// Transition errors are permanent for the state they were computed against;
/// retrying against the same state yields the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// Release of a number that is not currently in use.
    #[error("Invalid release of {number}: {reason}")]
    InvalidRelease {
        /// The number the caller tried to release.
        number: JerseyNumber,
        /// Why it was rejected.
        reason: InvalidReleaseReason,
    },

    /// The next number would not fit the storable range.
    #[error("Number range exhausted at {last_assigned}")]
    RangeOverflow {
        /// High-water mark that cannot grow further.
        last_assigned: u64,
    },
}

/// A state that violates one of the counter invariants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Zero appears in the free pool.
    #[error("free pool contains 0")]
    ZeroInFreePool,

    /// A free number lies above the high-water mark.
    #[error("free number {number} exceeds last assigned {last_assigned}")]
    FreeAboveHighWaterMark {
        /// Offending free number.
        number: u64,
        /// High-water mark of the state.
        last_assigned: u64,
    },

    /// The same number appears twice in persisted free numbers.
    #[error("free pool lists {0} more than once")]
    DuplicateFreeNumber(u64),

    /// The high-water mark is outside the storable range.
    #[error("last assigned {0} is outside the storable range")]
    HighWaterMarkOutOfRange(u64),
}

/// What a successful release did to the counter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseOutcome {
    /// The number was added to the free pool.
    Pooled {
        /// Released number.
        number: JerseyNumber,
    },
    /// The number was the top of the range and the high-water mark dropped.
    Compacted {
        /// Released number.
        number: JerseyNumber,
        /// Free numbers directly below it that were retired as well.
        retired: Vec<JerseyNumber>,
        /// High-water mark after compaction.
        last_assigned: u64,
    },
}

impl ReleaseOutcome {
    /// The number that was released.
    #[must_use]
    pub const fn number(&self) -> JerseyNumber {
        match self {
            Self::Pooled { number } | Self::Compacted { number, .. } => *number,
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pooled { .. } => "pooled",
            Self::Compacted { .. } => "compacted",
        }
    }
}

/// High-water mark plus free pool of one counter.
///
/// Only [`CounterState::from_parts`] builds a state from external data, so
/// the type is serializable but deliberately not deserializable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CounterState {
    last_assigned: u64,
    free_numbers: BTreeSet<JerseyNumber>,
}

impl CounterState {
    /// The bootstrap state: nothing assigned, nothing free.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_assigned: 0,
            free_numbers: BTreeSet::new(),
        }
    }

    /// Rebuild a state from persisted parts, validating every invariant.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantViolation`] if the parts describe a corrupted record:
    /// zero or duplicate free numbers, free numbers above `last_assigned`, or a
    /// high-water mark outside the storable range.
    pub fn from_parts(
        last_assigned: u64,
        free_numbers: impl IntoIterator<Item = u64>,
    ) -> Result<Self, InvariantViolation> {
        if last_assigned > MAX_NUMBER {
            return Err(InvariantViolation::HighWaterMarkOutOfRange(last_assigned));
        }

        let mut free = BTreeSet::new();
        for raw in free_numbers {
            let number = JerseyNumber::new(raw).ok_or(InvariantViolation::ZeroInFreePool)?;
            if raw > last_assigned {
                return Err(InvariantViolation::FreeAboveHighWaterMark {
                    number: raw,
                    last_assigned,
                });
            }
            if !free.insert(number) {
                return Err(InvariantViolation::DuplicateFreeNumber(raw));
            }
        }

        Ok(Self {
            last_assigned,
            free_numbers: free,
        })
    }

    /// Highest number handed out and not compacted away.
    #[must_use]
    pub const fn last_assigned(&self) -> u64 {
        self.last_assigned
    }

    /// Numbers available for reuse, smallest first.
    #[must_use]
    pub const fn free_numbers(&self) -> &BTreeSet<JerseyNumber> {
        &self.free_numbers
    }

    /// Number of entries in the free pool.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free_numbers.len()
    }

    /// Number of numbers currently in use.
    #[must_use]
    pub fn in_use_count(&self) -> u64 {
        self.last_assigned - self.free_numbers.len() as u64
    }

    /// Whether `number` is currently held by a participant.
    #[must_use]
    pub fn is_in_use(&self, number: JerseyNumber) -> bool {
        number.get() <= self.last_assigned && !self.free_numbers.contains(&number)
    }

    /// Iterate the numbers currently in use, ascending.
    pub fn in_use(&self) -> impl Iterator<Item = JerseyNumber> + '_ {
        (1..=self.last_assigned)
            .filter_map(JerseyNumber::new)
            .filter(|n| !self.free_numbers.contains(n))
    }

    /// Free numbers as plain integers, ascending (the persisted layout).
    #[must_use]
    pub fn free_numbers_raw(&self) -> Vec<u64> {
        self.free_numbers.iter().map(|n| n.get()).collect()
    }

    /// Hand out a number: the smallest free one, or `last_assigned + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::RangeOverflow`] when the pool is empty and
    /// the high-water mark is already at [`MAX_NUMBER`].
    pub fn allocate(&mut self) -> Result<JerseyNumber, TransitionError> {
        if let Some(number) = self.free_numbers.pop_first() {
            return Ok(number);
        }

        let next = self
            .last_assigned
            .checked_add(1)
            .filter(|n| *n <= MAX_NUMBER)
            .and_then(JerseyNumber::new)
            .ok_or(TransitionError::RangeOverflow {
                last_assigned: self.last_assigned,
            })?;

        self.last_assigned = next.get();
        Ok(next)
    }

    /// Return a number to the counter.
    ///
    /// With compaction enabled, releasing the current top lowers the
    /// high-water mark and keeps lowering it while the new top is free.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::InvalidRelease`] if the number is above the
    /// high-water mark or already free. The state is left unchanged.
    pub fn release(
        &mut self,
        number: JerseyNumber,
        policy: CompactionPolicy,
    ) -> Result<ReleaseOutcome, TransitionError> {
        if number.get() > self.last_assigned {
            return Err(TransitionError::InvalidRelease {
                number,
                reason: InvalidReleaseReason::AboveHighWaterMark {
                    last_assigned: self.last_assigned,
                },
            });
        }
        if self.free_numbers.contains(&number) {
            return Err(TransitionError::InvalidRelease {
                number,
                reason: InvalidReleaseReason::AlreadyFree,
            });
        }

        if policy.is_enabled() && number.get() == self.last_assigned {
            self.last_assigned -= 1;
            let mut retired = Vec::new();
            while let Some(top) = JerseyNumber::new(self.last_assigned) {
                if !self.free_numbers.remove(&top) {
                    break;
                }
                retired.push(top);
                self.last_assigned -= 1;
            }
            return Ok(ReleaseOutcome::Compacted {
                number,
                retired,
                last_assigned: self.last_assigned,
            });
        }

        self.free_numbers.insert(number);
        Ok(ReleaseOutcome::Pooled { number })
    }

    /// Check every invariant.
    ///
    /// States built through [`CounterState::new`], [`CounterState::from_parts`]
    /// and the transitions always pass; this is for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvariantViolation`] found.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.last_assigned > MAX_NUMBER {
            return Err(InvariantViolation::HighWaterMarkOutOfRange(
                self.last_assigned,
            ));
        }
        if let Some(max) = self.free_numbers.last() {
            if max.get() > self.last_assigned {
                return Err(InvariantViolation::FreeAboveHighWaterMark {
                    number: max.get(),
                    last_assigned: self.last_assigned,
                });
            }
        }
        Ok(())
    }
}

/// A counter record as read from a store: state plus concurrency metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Which counter this is.
    pub key: CounterKey,
    /// High-water mark and free pool.
    pub state: CounterState,
    /// Version the record was at when read.
    pub version: Version,
    /// Time of the last successful commit.
    pub updated_at: DateTime<Utc>,
}
