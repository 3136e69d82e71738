//! `jersey` subcommands.
//!
//! Every command runs against an [`Allocator`] and produces a JSON value, so
//! the same code path is exercised by the binary and by tests with an
//! in-memory store.

use crate::stress::run_stress;
use clap::{Parser, Subcommand};
use jersey_core::store::{CounterStore, CounterStoreError};
use jersey_core::{CounterKey, JerseyNumber};
use jersey_runtime::{Allocator, AllocatorError};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;

/// Operator CLI for the jersey number allocator.
#[derive(Parser, Debug)]
#[command(name = "jersey", version, about)]
pub struct Cli {
    /// Counter to operate on [default: "jersey"].
    #[arg(long, global = true, env = "JERSEY_COUNTER_KEY")]
    pub key: Option<CounterKey>,

    /// Print Prometheus metrics collected during the command.
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the schema and the counter record if missing.
    Init,

    /// Allocate jersey numbers.
    Allocate {
        /// How many numbers to allocate.
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Release jersey numbers back to the counter.
    Release {
        /// Numbers to release.
        #[arg(required = true)]
        numbers: Vec<JerseyNumber>,
    },

    /// Show the counter record.
    Status,

    /// Verify the counter invariants.
    Check,

    /// Simulate a registration spike.
    Stress {
        /// Number of concurrent allocations.
        #[arg(long, default_value_t = 100)]
        concurrency: usize,

        /// Release every allocated number afterwards.
        #[arg(long)]
        release: bool,
    },
}

/// Errors from running a command.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The allocator reported an error.
    #[error(transparent)]
    Allocator(#[from] AllocatorError),

    /// An `allocate` run failed partway. Numbers it had already handed out
    /// were released again; `unreleased` lists the ones that could not be.
    #[error("allocation stopped after {allocated} of {requested} numbers ({} still held): {source}", .unreleased.len())]
    AllocateAborted {
        /// Numbers asked for.
        requested: u32,
        /// Numbers handed out before the failure.
        allocated: usize,
        /// Numbers still held by this run.
        unreleased: Vec<JerseyNumber>,
        /// The failure that stopped the run.
        source: AllocatorError,
    },

    /// The counter violates its invariants.
    #[error("counter {key} is inconsistent: {reason}")]
    Inconsistent {
        /// Counter that failed the check.
        key: CounterKey,
        /// What is wrong.
        reason: String,
    },

    /// The stress run handed out duplicates or had failures.
    #[error("stress run was not clean: {0}")]
    StressFailed(Value),
}

/// Run `command` against `allocator`.
///
/// `Init` only bootstraps the counter record; schema migration is the
/// caller's job because it is store specific.
///
/// # Errors
///
/// Returns [`CommandError`] if an allocator operation fails, the check finds
/// a violation, or a stress run is not clean. Invalid releases are reported
/// in the output, not as errors. A failed `Allocate` gives back what it took
/// before returning [`CommandError::AllocateAborted`].
pub async fn execute<S>(allocator: &Allocator<S>, command: &Command) -> Result<Value, CommandError>
where
    S: CounterStore + ?Sized + 'static,
{
    match command {
        Command::Init => {
            let snapshot = allocator.bootstrap().await?;
            Ok(json!({ "initialized": snapshot }))
        }
        Command::Allocate { count } => {
            let mut numbers = Vec::new();
            for _ in 0..*count {
                match allocator.allocate().await {
                    Ok(number) => numbers.push(number),
                    Err(source) => {
                        let allocated = numbers.len();
                        let unreleased = give_back(allocator, numbers).await;
                        return Err(CommandError::AllocateAborted {
                            requested: *count,
                            allocated,
                            unreleased,
                            source,
                        });
                    }
                }
            }
            Ok(json!({ "allocated": numbers }))
        }
        Command::Release { numbers } => {
            let mut results = Vec::with_capacity(numbers.len());
            for &number in numbers {
                match allocator.release(number).await {
                    Ok(outcome) => results.push(json!({
                        "number": number,
                        "outcome": outcome.as_str(),
                    })),
                    Err(AllocatorError::InvalidRelease { reason, .. }) => results.push(json!({
                        "number": number,
                        "outcome": "ignored",
                        "reason": reason.to_string(),
                    })),
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(json!({ "released": results }))
        }
        Command::Status => {
            let snapshot = allocator.snapshot().await?;
            Ok(json!({
                "counter": snapshot.key,
                "last_assigned": snapshot.state.last_assigned(),
                "free_numbers": snapshot.state.free_numbers(),
                "in_use": snapshot.state.in_use_count(),
                "version": snapshot.version,
                "updated_at": snapshot.updated_at,
            }))
        }
        Command::Check => {
            let snapshot = match allocator.snapshot().await {
                Ok(snapshot) => snapshot,
                Err(AllocatorError::AllocationFailed {
                    source: CounterStoreError::CorruptedState { key, reason },
                    ..
                }) => return Err(CommandError::Inconsistent { key, reason }),
                Err(e) => return Err(e.into()),
            };
            snapshot
                .state
                .check_invariants()
                .map_err(|violation| CommandError::Inconsistent {
                    key: snapshot.key.clone(),
                    reason: violation.to_string(),
                })?;
            Ok(json!({
                "counter": snapshot.key,
                "consistent": true,
                "last_assigned": snapshot.state.last_assigned(),
                "free": snapshot.state.free_count(),
                "in_use": snapshot.state.in_use_count(),
            }))
        }
        Command::Stress {
            concurrency,
            release,
        } => {
            let report = run_stress(allocator, *concurrency, *release).await;
            let value = json!({ "stress": report });
            if report.is_clean() {
                Ok(value)
            } else {
                Err(CommandError::StressFailed(value))
            }
        }
    }
}

/// Release `numbers`, highest first so compaction can retire them. Returns
/// the numbers that are still held afterwards.
async fn give_back<S>(allocator: &Allocator<S>, numbers: Vec<JerseyNumber>) -> Vec<JerseyNumber>
where
    S: CounterStore + ?Sized,
{
    let mut unreleased = Vec::new();
    for number in numbers.into_iter().rev() {
        match allocator.release(number).await {
            // Already free means someone else returned it.
            Ok(_) | Err(AllocatorError::InvalidRelease { .. }) => {}
            Err(e) => {
                warn!(number = %number, error = %e, "Could not give back jersey number");
                unreleased.push(number);
            }
        }
    }
    unreleased.sort_unstable();
    unreleased
}
