//! `jersey`: operator CLI for the jersey number allocator.
//!
//! Reads `DATABASE_*` and `JERSEY_*` variables (a `.env` file is honored),
//! runs one subcommand against `PostgreSQL` and prints the result as JSON.

use clap::Parser;
use jersey_postgres::PostgresCounterStore;
use jersey_runtime::Allocator;
use jersey_runtime::metrics::MetricsExporter;
use jersey_tools::{Cli, Command, Config, execute, telemetry};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(key) = cli.key.clone() {
        config.allocator.key = key;
    }

    let mut exporter = MetricsExporter::new();
    if cli.metrics {
        exporter.install()?;
    }

    info!(
        counter = %config.allocator.key,
        max_connections = config.database.max_connections,
        "Connecting to counter database"
    );
    let store = PostgresCounterStore::connect(
        &config.database.url,
        config.database.max_connections,
        config.database.connect_timeout(),
        config.database.statement_timeout(),
    )
    .await?;

    if cli.command == Command::Init {
        store.migrate().await?;
        info!("Migrations applied");
    }

    let allocator = Allocator::new(Arc::new(store), config.allocator);
    let result = execute(&allocator, &cli.command).await;

    if let Some(rendered) = exporter.render() {
        eprintln!("{rendered}");
    }

    match result {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!(counter = %allocator.key(), error = %e, "Command failed");
            Err(e.into())
        }
    }
}
