//! Storage access facade.
//!
//! A [`Store`] front door dispatches to a per-driver [`StorageBackend`] and
//! optionally serializes access behind an application-level reader/writer
//! lock, independent of whatever concurrency control the driver itself
//! performs. The lock discipline is a composed strategy selected at
//! construction; the policy a store was built from never changes afterwards.

pub mod policy;

mod sqlite;

#[cfg(feature = "libsql")]
mod libsql;

#[cfg(feature = "postgres")]
mod postgres;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::StorageError;
use crate::shutdown::Shutdown;
use policy::ConnectionPolicy;

/// Which storage-access implementation backs a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Driver {
    /// rusqlite over the bundled SQLite C library.
    Sqlite,
    /// The libsql fork of SQLite; natively async.
    #[cfg(feature = "libsql")]
    Libsql,
    /// Client-server PostgreSQL over tokio-postgres.
    #[cfg(feature = "postgres")]
    Postgres,
}

impl Driver {
    /// SQLite-family drivers, the ones a filesystem-path location fits.
    pub fn embedded() -> Vec<Driver> {
        vec![
            Driver::Sqlite,
            #[cfg(feature = "libsql")]
            Driver::Libsql,
        ]
    }
}

/// A bound parameter or result cell; SQLite's five storage classes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_i64(&self) -> Result<i64, StorageError> {
        match self {
            Value::Integer(v) => Ok(*v),
            other => Err(StorageError::Decode(format!(
                "expected an integer cell, got {other:?}"
            ))),
        }
    }

    pub fn as_text(&self) -> Result<&str, StorageError> {
        match self {
            Value::Text(v) => Ok(v),
            other => Err(StorageError::Decode(format!(
                "expected a text cell, got {other:?}"
            ))),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Maps a fetched row onto a destination struct, one cell per column in
/// statement order.
pub trait FromRow: Sized {
    fn from_row(row: &[Value]) -> Result<Self, StorageError>;
}

#[async_trait]
trait StorageBackend: Send + Sync {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StorageError>;

    /// Fetches the first row; `StorageError::NotFound` when nothing matched.
    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, StorageError>;

    async fn query_rows(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Vec<Value>>, StorageError>;

    async fn execute_batch(&self, sql: &str) -> Result<(), StorageError>;
}

// Application-level lock discipline around every storage call. Held across
// the backend await, so readers overlap with readers while writers exclude
// everyone; `Passthrough` leaves concurrency control to the driver.
enum LockStrategy {
    Passthrough,
    Serialized(RwLock<()>),
}

impl LockStrategy {
    fn from_policy(policy: &ConnectionPolicy) -> Self {
        if policy.serialize_access {
            LockStrategy::Serialized(RwLock::new(()))
        } else {
            LockStrategy::Passthrough
        }
    }

    async fn shared(&self) -> Option<RwLockReadGuard<'_, ()>> {
        match self {
            LockStrategy::Passthrough => None,
            LockStrategy::Serialized(lock) => Some(lock.read().await),
        }
    }

    async fn exclusive(&self) -> Option<RwLockWriteGuard<'_, ()>> {
        match self {
            LockStrategy::Passthrough => None,
            LockStrategy::Serialized(lock) => Some(lock.write().await),
        }
    }
}

/// Handle to one datastore, opened under an immutable [`ConnectionPolicy`].
pub struct Store {
    driver: Driver,
    backend: Box<dyn StorageBackend>,
    lock: LockStrategy,
}

impl Store {
    /// Opens a datastore.
    ///
    /// `location` is a filesystem path for the embedded drivers and a DSN
    /// for PostgreSQL. Changing contention behavior means constructing a
    /// new store; the policy is baked in here.
    pub async fn open(
        driver: Driver,
        location: &str,
        policy: &ConnectionPolicy,
    ) -> Result<Self, StorageError> {
        let backend: Box<dyn StorageBackend> = match driver {
            Driver::Sqlite => Box::new(sqlite::SqliteBackend::open(location.into(), policy).await?),
            #[cfg(feature = "libsql")]
            Driver::Libsql => Box::new(libsql::LibsqlBackend::open(location, policy).await?),
            #[cfg(feature = "postgres")]
            Driver::Postgres => Box::new(postgres::PostgresBackend::connect(location, policy).await?),
        };

        Ok(Self {
            driver,
            backend,
            lock: LockStrategy::from_policy(policy),
        })
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    /// Runs a write/DDL statement and returns the number of affected rows.
    pub async fn execute(
        &self,
        interrupt: &Shutdown,
        sql: &str,
        params: &[Value],
    ) -> Result<u64, StorageError> {
        if interrupt.is_fired() {
            return Err(StorageError::Cancelled);
        }
        let _guard = self.lock.exclusive().await;
        self.backend.execute(sql, params).await
    }

    /// Fetches a single row into `T`.
    ///
    /// A query that legitimately matches zero rows returns
    /// `StorageError::NotFound`, distinguishable from a failed query.
    pub async fn query_one<T: FromRow>(
        &self,
        interrupt: &Shutdown,
        sql: &str,
        params: &[Value],
    ) -> Result<T, StorageError> {
        if interrupt.is_fired() {
            return Err(StorageError::Cancelled);
        }
        let _guard = self.lock.shared().await;
        let row = self.backend.query_row(sql, params).await?;
        T::from_row(&row)
    }

    /// Fetches every matching row into a `Vec<T>`; empty when none match.
    pub async fn query_many<T: FromRow>(
        &self,
        interrupt: &Shutdown,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<T>, StorageError> {
        if interrupt.is_fired() {
            return Err(StorageError::Cancelled);
        }
        let _guard = self.lock.shared().await;
        let rows = self.backend.query_rows(sql, params).await?;
        rows.iter().map(|row| T::from_row(row)).collect()
    }

    /// Runs a multi-statement script (DDL, pragmas, vacuum).
    pub async fn execute_batch(&self, interrupt: &Shutdown, sql: &str) -> Result<(), StorageError> {
        if interrupt.is_fired() {
            return Err(StorageError::Cancelled);
        }
        let _guard = self.lock.exclusive().await;
        self.backend.execute_batch(sql).await
    }
}
