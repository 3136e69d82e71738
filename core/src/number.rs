//! Counter identification, jersey numbers and version tokens.
//!
//! This module defines the strong types used throughout the allocator:
//! `CounterKey` names a counter record, `JerseyNumber` is a positive number
//! handed to a participant, and `Version` is the optimistic concurrency token
//! of a counter record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;
use thiserror::Error;

/// Error type for `CounterKey` parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid counter key: {0}")]
pub struct ParseCounterKeyError(String);

/// Error type for `JerseyNumber` parsing and conversion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseJerseyNumberError {
    /// Jersey numbers start at 1.
    #[error("Jersey number must be positive")]
    Zero,

    /// Value is negative (only reachable from signed storage types).
    #[error("Jersey number must be positive, got {0}")]
    Negative(i64),

    /// Input is not an integer.
    #[error("Invalid jersey number: {0}")]
    Invalid(String),
}

/// Identifier of a counter record.
///
/// A store can hold several independent counters, e.g. one per event:
/// - `"jersey"` (the default)
/// - `"marathon-2025"`
/// - `"event-7f3a"`
///
/// # Validation
///
/// - `FromStr::from_str()`: Validates input (rejects empty strings)
/// - `From::from()` and `new()`: No validation (for internal use with trusted input)
///
/// # Examples
///
/// ```
/// use jersey_core::number::CounterKey;
///
/// let key = CounterKey::new("marathon-2025");
/// assert_eq!(key.as_str(), "marathon-2025");
///
/// let parsed: CounterKey = "jersey".parse().unwrap();
/// assert_eq!(parsed, CounterKey::default());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CounterKey(String);

impl CounterKey {
    /// Key used when the deployment runs a single counter.
    pub const DEFAULT: &'static str = "jersey";

    /// Create a new `CounterKey` from a string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the `CounterKey` into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for CounterKey {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CounterKey {
    type Err = ParseCounterKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ParseCounterKeyError(
                "Counter key cannot be empty".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for CounterKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CounterKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for CounterKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A jersey number: the positive integer printed on a participant's bib.
///
/// Zero is never a valid jersey number; a counter whose high-water mark is
/// zero has handed out nothing yet.
///
/// # Examples
///
/// ```
/// use jersey_core::number::JerseyNumber;
///
/// let n = JerseyNumber::new(7).unwrap();
/// assert_eq!(n.get(), 7);
/// assert!(JerseyNumber::new(0).is_none());
///
/// let parsed: JerseyNumber = "42".parse().unwrap();
/// assert_eq!(parsed.get(), 42);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct JerseyNumber(NonZeroU64);

impl JerseyNumber {
    /// The first number a fresh counter hands out.
    pub const FIRST: Self = Self(NonZeroU64::MIN);

    /// Create a jersey number, returning `None` for zero.
    #[must_use]
    pub const fn new(value: u64) -> Option<Self> {
        match NonZeroU64::new(value) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    /// Get the numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for JerseyNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JerseyNumber {
    type Err = ParseJerseyNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| ParseJerseyNumberError::Invalid(s.to_string()))?;
        Self::try_from(value)
    }
}

impl TryFrom<u64> for JerseyNumber {
    type Error = ParseJerseyNumberError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(ParseJerseyNumberError::Zero)
    }
}

impl TryFrom<i64> for JerseyNumber {
    type Error = ParseJerseyNumberError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        let unsigned = u64::try_from(value).map_err(|_| ParseJerseyNumberError::Negative(value))?;
        Self::try_from(unsigned)
    }
}

impl From<JerseyNumber> for u64 {
    fn from(number: JerseyNumber) -> Self {
        number.get()
    }
}

/// Version token for optimistic concurrency control.
///
/// Every successful commit of a counter record increments its version by one.
/// A writer commits only if the record is still at the version it read:
///
/// - Read the record at version `v`
/// - Compute the new state
/// - Commit "if version is still `v`", which sets it to `v + 1`
///
/// A concurrent writer that committed first makes the commit fail with a
/// conflict, and the loser re-reads.
///
/// # Examples
///
/// ```
/// use jersey_core::number::Version;
///
/// let v0 = Version::INITIAL;
/// let v1 = v0.next();
/// assert_eq!(v1, Version::new(1));
/// assert_eq!(v1.value(), 1);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Version of a freshly bootstrapped counter.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    ///
    /// Saturates at `u64::MAX`, which no counter reaches in practice.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Check if this is the initial version (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod counter_key_tests {
        use super::*;

        #[test]
        fn default_key() {
            assert_eq!(CounterKey::default().as_str(), "jersey");
        }

        #[test]
        #[allow(clippy::expect_used)] // Panics: Test will fail if parse fails
        fn parse_from_str() {
            let key: CounterKey = "marathon-2025".parse().expect("parse should succeed");
            assert_eq!(key, CounterKey::new("marathon-2025"));
        }

        #[test]
        fn parse_blank_fails() {
            assert!("".parse::<CounterKey>().is_err());
            assert!("   ".parse::<CounterKey>().is_err());
        }

        #[test]
        fn display_and_into_inner() {
            let key = CounterKey::from("event-1");
            assert_eq!(format!("{key}"), "event-1");
            assert_eq!(key.into_inner(), "event-1");
        }
    }

    mod jersey_number_tests {
        use super::*;

        #[test]
        fn zero_is_rejected() {
            assert!(JerseyNumber::new(0).is_none());
            assert_eq!(JerseyNumber::try_from(0_u64), Err(ParseJerseyNumberError::Zero));
        }

        #[test]
        fn negative_is_rejected() {
            assert_eq!(
                JerseyNumber::try_from(-3_i64),
                Err(ParseJerseyNumberError::Negative(-3))
            );
            assert!("-3".parse::<JerseyNumber>().is_err());
        }

        #[test]
        fn parse_rejects_garbage() {
            assert!(matches!(
                "twelve".parse::<JerseyNumber>(),
                Err(ParseJerseyNumberError::Invalid(_))
            ));
        }

        #[test]
        fn first_is_one() {
            assert_eq!(JerseyNumber::FIRST.get(), 1);
        }

        #[test]
        fn ordering_follows_value() {
            let a = JerseyNumber::new(3);
            let b = JerseyNumber::new(10);
            assert!(a < b);
        }

        #[test]
        #[allow(clippy::unwrap_used)]
        fn serde_rejects_zero() {
            let n: JerseyNumber = serde_json::from_str("12").unwrap();
            assert_eq!(n.get(), 12);
            assert!(serde_json::from_str::<JerseyNumber>("0").is_err());
            assert_eq!(serde_json::to_string(&n).unwrap(), "12");
        }
    }

    mod version_tests {
        use super::*;

        #[test]
        fn initial_version() {
            assert_eq!(Version::INITIAL, Version::new(0));
            assert!(Version::INITIAL.is_initial());
            assert!(!Version::new(1).is_initial());
        }

        #[test]
        fn next_version() {
            assert_eq!(Version::new(0).next(), Version::new(1));
            assert_eq!(Version::new(u64::MAX).next(), Version::new(u64::MAX));
        }

        #[test]
        fn version_from_u64() {
            let version = Version::from(42_u64);
            let num: u64 = version.into();
            assert_eq!(num, 42);
            assert_eq!(format!("{version}"), "42");
        }
    }
}
