//! # Jersey Tools
//!
//! Operator tooling for the jersey number allocator: the `jersey` binary's
//! configuration, subcommands and stress harness.
//!
//! ## Commands
//!
//! | Command | What it does |
//! |---|---|
//! | `init` | Run migrations and create the counter record |
//! | `allocate [--count N]` | Hand out numbers |
//! | `release N...` | Return numbers |
//! | `status` | Print the counter record |
//! | `check` | Verify the counter invariants |
//! | `stress [--concurrency N] [--release]` | Simulate a registration spike |
//!
//! Every command accepts `--key` to pick a counter and `--metrics` to print
//! the Prometheus exposition collected while it ran.

pub mod commands;
pub mod config;
pub mod stress;
pub mod telemetry;

pub use commands::{Cli, Command, CommandError, execute};
pub use config::{Config, DatabaseConfig};
pub use stress::{StressReport, run_stress};
