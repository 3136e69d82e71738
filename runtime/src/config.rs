//! Allocator configuration.
//!
//! Loads retry and compaction settings from environment variables with
//! sensible defaults.

use crate::retry::RetryPolicy;
use jersey_core::counter::CompactionPolicy;
use jersey_core::number::CounterKey;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Settings shared by every allocator operation.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatorConfig {
    /// Which counter record to operate on
    pub key: CounterKey,
    /// Retry budget for conflicts and transient store errors
    pub retry: RetryPolicy,
    /// Whether releasing the top number lowers the high-water mark
    pub compaction: CompactionPolicy,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            key: CounterKey::default(),
            retry: RetryPolicy::default(),
            compaction: CompactionPolicy::Enabled,
        }
    }
}

impl AllocatorConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `JERSEY_COUNTER_KEY` | `jersey` |
    /// | `JERSEY_MAX_RETRIES` | 16 |
    /// | `JERSEY_INITIAL_BACKOFF_MS` | 5 |
    /// | `JERSEY_MAX_BACKOFF_MS` | 500 |
    /// | `JERSEY_BACKOFF_MULTIPLIER` | 2.0 |
    /// | `JERSEY_OPERATION_TIMEOUT_MS` | 10000 |
    /// | `JERSEY_COMPACTION` | true |
    ///
    /// Unparseable values fall back to the default.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = RetryPolicy::default();

        let key = lookup("JERSEY_COUNTER_KEY")
            .and_then(|s| s.parse::<CounterKey>().ok())
            .unwrap_or_default();

        let retry = RetryPolicy::builder()
            .max_retries(parse_or(&lookup, "JERSEY_MAX_RETRIES", defaults.max_retries))
            .initial_delay(millis_or(
                &lookup,
                "JERSEY_INITIAL_BACKOFF_MS",
                defaults.initial_delay,
            ))
            .max_delay(millis_or(&lookup, "JERSEY_MAX_BACKOFF_MS", defaults.max_delay))
            .multiplier(
                parse_or(&lookup, "JERSEY_BACKOFF_MULTIPLIER", defaults.multiplier).max(1.0),
            )
            .deadline(millis_or(
                &lookup,
                "JERSEY_OPERATION_TIMEOUT_MS",
                defaults.deadline,
            ))
            .build();

        let compaction = CompactionPolicy::from_enabled(
            lookup("JERSEY_COMPACTION").map_or(true, |s| parse_flag(&s).unwrap_or(true)),
        );

        Self {
            key,
            retry,
            compaction,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    lookup(name)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn millis_or(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: Duration,
) -> Duration {
    lookup(name)
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = AllocatorConfig::from_lookup(|_| None);
        assert_eq!(config, AllocatorConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = AllocatorConfig::from_lookup(lookup_from(&[
            ("JERSEY_COUNTER_KEY", "marathon-2025"),
            ("JERSEY_MAX_RETRIES", "4"),
            ("JERSEY_INITIAL_BACKOFF_MS", "20"),
            ("JERSEY_MAX_BACKOFF_MS", "80"),
            ("JERSEY_BACKOFF_MULTIPLIER", "3.0"),
            ("JERSEY_OPERATION_TIMEOUT_MS", "1500"),
            ("JERSEY_COMPACTION", "off"),
        ]));

        assert_eq!(config.key, CounterKey::new("marathon-2025"));
        assert_eq!(config.retry.max_retries, 4);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(20));
        assert_eq!(config.retry.max_delay, Duration::from_millis(80));
        assert!((config.retry.multiplier - 3.0).abs() < f64::EPSILON);
        assert_eq!(config.retry.deadline, Duration::from_millis(1500));
        assert_eq!(config.compaction, CompactionPolicy::Disabled);
    }

    #[test]
    fn garbage_values_fall_back() {
        let config = AllocatorConfig::from_lookup(lookup_from(&[
            ("JERSEY_COUNTER_KEY", "  "),
            ("JERSEY_MAX_RETRIES", "many"),
            ("JERSEY_BACKOFF_MULTIPLIER", "0.1"),
            ("JERSEY_COMPACTION", "maybe"),
        ]));

        assert_eq!(config.key, CounterKey::default());
        assert_eq!(config.retry.max_retries, 16);
        assert!((config.retry.multiplier - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.compaction, CompactionPolicy::Enabled);
    }
}
