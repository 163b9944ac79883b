use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::FutureExt;
use rand::Rng;
use tempfile::TempDir;

use sql_stress::configuration::Configuration;
use sql_stress::db::policy::{ConnectionPolicy, JournalMode, Synchronous, TempStore};
use sql_stress::db::{Driver, Store};
use sql_stress::report::{Metric, ThroughputReport};
use sql_stress::run::measure;
use sql_stress::shutdown::Shutdown;
use sql_stress::workload::{RngGen, SamplePool};

use crate::operation::{
    article_params, insert_sql, schema_sql, InsertOperationFactory, LookupOperationFactory,
    MixedOperationFactory,
};

const SAMPLE_POOL_SIZE: usize = 1000;

pub struct RunOptions {
    pub workers: u64,
    pub duration: Duration,
    pub drivers: Vec<Driver>,
    /// Fixed database file for the embedded drivers; a fresh temp
    /// directory per run when unset.
    pub database: Option<PathBuf>,
}

fn write_presets() -> Vec<ConnectionPolicy> {
    vec![
        // busy_timeout stays 0 in the baseline presets so drivers with
        // different built-in defaults compete from the same footing.
        ConnectionPolicy::default(),
        ConnectionPolicy {
            max_connections: NonZeroUsize::new(1),
            ..Default::default()
        },
        ConnectionPolicy {
            serialize_access: true,
            ..Default::default()
        },
        ConnectionPolicy {
            busy_timeout: Duration::from_millis(3000),
            ..Default::default()
        },
        ConnectionPolicy {
            max_connections: NonZeroUsize::new(1),
            journal_mode: Some(JournalMode::Wal),
            synchronous: Some(Synchronous::Normal),
            ..Default::default()
        },
        ConnectionPolicy {
            max_connections: NonZeroUsize::new(2),
            journal_mode: Some(JournalMode::Wal),
            synchronous: Some(Synchronous::Normal),
            ..Default::default()
        },
        ConnectionPolicy {
            journal_mode: Some(JournalMode::Wal),
            synchronous: Some(Synchronous::Normal),
            ..Default::default()
        },
        ConnectionPolicy {
            busy_timeout: Duration::from_millis(3000),
            journal_mode: Some(JournalMode::Wal),
            synchronous: Some(Synchronous::Normal),
            ..Default::default()
        },
        ConnectionPolicy {
            busy_timeout: Duration::from_millis(3000),
            journal_mode: Some(JournalMode::Wal),
            synchronous: Some(Synchronous::Off),
            ..Default::default()
        },
    ]
}

fn read_presets() -> Vec<ConnectionPolicy> {
    vec![
        ConnectionPolicy::default(),
        ConnectionPolicy {
            busy_timeout: Duration::from_millis(3000),
            journal_mode: Some(JournalMode::Wal),
            synchronous: Some(Synchronous::Normal),
            ..Default::default()
        },
        tuned_policy(),
    ]
}

// The mixed sweep runs under the tuned WAL configuration.
fn tuned_policy() -> ConnectionPolicy {
    ConnectionPolicy {
        busy_timeout: Duration::from_millis(3000),
        journal_mode: Some(JournalMode::Wal),
        synchronous: Some(Synchronous::Normal),
        temp_store: Some(TempStore::Memory),
        cache_size: Some(10_000),
        ..Default::default()
    }
}

fn sample_pool() -> Arc<SamplePool> {
    let mut rng = RngGen::new(rand::thread_rng().gen());
    Arc::new(SamplePool::generate(SAMPLE_POOL_SIZE, &mut rng))
}

fn ensure_embedded(driver: Driver) -> Result<()> {
    anyhow::ensure!(
        Driver::embedded().contains(&driver),
        "this scenario drives embedded SQLite databases, not {driver}",
    );
    Ok(())
}

/// Picks the database file for the next run. Every run starts from an
/// empty database: a fixed location is wiped (including WAL siblings),
/// otherwise a throwaway temp directory is used.
fn fresh_location(opts: &RunOptions) -> Result<(Option<TempDir>, PathBuf)> {
    match &opts.database {
        Some(path) => {
            for suffix in ["", "-wal", "-shm"] {
                let sibling = PathBuf::from(format!("{}{suffix}", path.display()));
                if let Err(err) = std::fs::remove_file(&sibling) {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        return Err(err)
                            .with_context(|| format!("reset database file {}", sibling.display()));
                    }
                }
            }
            Ok((None, path.clone()))
        }
        None => {
            let dir = TempDir::new().context("create temp dir")?;
            let path = dir.path().join("bench.db");
            Ok((Some(dir), path))
        }
    }
}

/// Opens a fresh store and creates the schema.
async fn prepare_store(
    driver: Driver,
    location: &str,
    policy: &ConnectionPolicy,
) -> Result<Store> {
    let setup = Shutdown::new();
    let store = Store::open(driver, location, policy)
        .await
        .with_context(|| format!("connect {driver} database at {location}"))?;
    store
        .execute_batch(&setup, schema_sql(driver))
        .await
        .context("create schema")?;
    Ok(store)
}

/// Inserts the whole sample pool and compacts the file, so read-heavy runs
/// start from a populated, settled database.
async fn seed_articles(store: &Store, pool: &SamplePool) -> Result<()> {
    let setup = Shutdown::new();
    let statement = insert_sql(store.driver());
    for article in pool.articles() {
        store
            .execute(&setup, statement, &article_params(article))
            .await
            .context("seed articles")?;
    }
    store
        .execute_batch(&setup, "VACUUM;")
        .await
        .context("vacuum after seeding")?;
    tracing::debug!(count = pool.len(), "seeded sample articles");
    Ok(())
}

// Runs one measurement with a Ctrl-C watcher: the first signal fires the
// run's shutdown, the run then reports normally and the sweep stops.
async fn run_one(config: Configuration) -> Result<(ThroughputReport, bool)> {
    let shutdown = Arc::new(Shutdown::new());
    let interrupted = Arc::new(AtomicBool::new(false));

    let _watcher = {
        let shutdown = Arc::clone(&shutdown);
        let interrupted = Arc::clone(&interrupted);
        let (fut, handle) = async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::Relaxed);
                shutdown.fire();
            }
        }
        .remote_handle();
        tokio::task::spawn(fut);
        handle
    };

    let report = measure(config, shutdown).await?;
    Ok((report, interrupted.load(Ordering::Relaxed)))
}

pub async fn write_tps(opts: &RunOptions) -> Result<()> {
    println!("WRITE TPS:");
    let pool = sample_pool();

    for policy in write_presets() {
        for &driver in &opts.drivers {
            ensure_embedded(driver)?;
            let (_dir, location) = fresh_location(opts)?;
            let store = Arc::new(
                prepare_store(driver, &location.to_string_lossy(), &policy).await?,
            );

            let config = Configuration {
                max_duration: Some(opts.duration),
                concurrency: opts.workers,
                operation_factory: Arc::new(InsertOperationFactory {
                    store: Arc::clone(&store),
                    pool: Arc::clone(&pool),
                }),
                metric: Metric::Tps,
            };

            println!();
            println!("{driver}: {policy}");
            let (report, interrupted) = run_one(config).await?;
            println!("{report}");
            if interrupted {
                return Ok(());
            }
        }
    }
    Ok(())
}

pub async fn read_tps(opts: &RunOptions) -> Result<()> {
    println!("READ QPS:");
    let pool = sample_pool();

    for policy in read_presets() {
        for &driver in &opts.drivers {
            ensure_embedded(driver)?;
            let (_dir, location) = fresh_location(opts)?;
            let store = Arc::new(
                prepare_store(driver, &location.to_string_lossy(), &policy).await?,
            );
            seed_articles(&store, &pool).await?;

            let config = Configuration {
                max_duration: Some(opts.duration),
                concurrency: opts.workers,
                operation_factory: Arc::new(LookupOperationFactory {
                    store: Arc::clone(&store),
                    pool: Arc::clone(&pool),
                }),
                metric: Metric::Qps,
            };

            println!();
            println!("{driver}: {policy}");
            let (report, interrupted) = run_one(config).await?;
            println!("{report}");
            if interrupted {
                return Ok(());
            }
        }
    }
    Ok(())
}

fn mixed_metric(write_percent: u8) -> Metric {
    if write_percent == 0 {
        Metric::Qps
    } else {
        Metric::Tps
    }
}

pub async fn mixed_tps(opts: &RunOptions, write_percents: &[u8]) -> Result<()> {
    let pool = sample_pool();
    let policy = tuned_policy();

    for &percent in write_percents {
        for &driver in &opts.drivers {
            ensure_embedded(driver)?;
            let (_dir, location) = fresh_location(opts)?;
            let store = Arc::new(
                prepare_store(driver, &location.to_string_lossy(), &policy).await?,
            );
            seed_articles(&store, &pool).await?;

            let factory =
                MixedOperationFactory::new(Arc::clone(&store), Arc::clone(&pool), percent)
                    .context("build mixed workload")?;
            let config = Configuration {
                max_duration: Some(opts.duration),
                concurrency: opts.workers,
                operation_factory: Arc::new(factory),
                metric: mixed_metric(percent),
            };

            println!();
            println!("write percent: {percent}%");
            println!("{driver}: {policy}");
            let (report, interrupted) = run_one(config).await?;
            println!("{report}");
            if interrupted {
                return Ok(());
            }
        }
    }
    Ok(())
}

#[cfg(feature = "postgres")]
pub async fn postgres_tps(opts: &RunOptions, dsn: &str, write_percents: &[u8]) -> Result<()> {
    // Pragma knobs do not apply; the default policy leaves concurrency
    // control to the server.
    let policy = ConnectionPolicy::default();
    let pool = sample_pool();

    let store = Arc::new(prepare_store(Driver::Postgres, dsn, &policy).await?);
    seed_articles(&store, &pool).await?;

    for &percent in write_percents {
        let factory = MixedOperationFactory::new(Arc::clone(&store), Arc::clone(&pool), percent)
            .context("build mixed workload")?;
        let config = Configuration {
            max_duration: Some(opts.duration),
            concurrency: opts.workers,
            operation_factory: Arc::new(factory),
            metric: mixed_metric(percent),
        };

        println!();
        println!("postgres write percent: {percent}%");
        let (report, interrupted) = run_one(config).await?;
        println!("{report}");
        if interrupted {
            return Ok(());
        }
    }
    Ok(())
}
