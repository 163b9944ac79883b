#[macro_use]
extern crate async_trait;

mod operation;
mod scenario;

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sql_stress::db::Driver;

#[derive(Parser)]
#[command(name = "sql-stress", version, about = "SQL datastore throughput micro-benchmark")]
struct Args {
    /// Concurrent workers per run.
    #[arg(long, default_value_t = 4)]
    workers: u64,

    /// Duration of each run, in seconds.
    #[arg(long, default_value_t = 5)]
    duration: u64,

    /// Restrict runs to one driver; defaults to every compiled-in embedded
    /// driver.
    #[arg(long)]
    driver: Option<String>,

    /// Database file for the embedded drivers, wiped before every run;
    /// defaults to a fresh temp directory per run.
    #[arg(long)]
    database: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Insert-only sweep over the pragma presets.
    Write,
    /// Point-lookup sweep over the pragma presets.
    Read,
    /// Read/write mix sweep under the tuned policy.
    Mixed {
        /// Write percentages to measure.
        #[arg(long, value_delimiter = ',', default_values_t = vec![0u8, 10, 30, 50, 70, 90, 100])]
        write_percent: Vec<u8>,
    },
    /// Read/write mix sweep against a PostgreSQL server.
    #[cfg(feature = "postgres")]
    Postgres {
        #[arg(long, default_value = "postgres://bench@localhost:5432/bench")]
        dsn: String,
        /// Write percentages to measure.
        #[arg(long, value_delimiter = ',', default_values_t = vec![0u8, 30, 50, 70, 100])]
        write_percent: Vec<u8>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let drivers = match &args.driver {
        Some(name) => vec![Driver::from_str(name)
            .map_err(|_| anyhow::anyhow!("unknown or not compiled-in driver: {name}"))?],
        None => Driver::embedded(),
    };

    let opts = scenario::RunOptions {
        workers: args.workers,
        duration: Duration::from_secs(args.duration),
        drivers,
        database: args.database,
    };

    match args.command {
        Command::Write => scenario::write_tps(&opts).await,
        Command::Read => scenario::read_tps(&opts).await,
        Command::Mixed { write_percent } => scenario::mixed_tps(&opts, &write_percent).await,
        #[cfg(feature = "postgres")]
        Command::Postgres { dsn, write_percent } => {
            scenario::postgres_tps(&opts, &dsn, &write_percent).await
        }
    }
}
