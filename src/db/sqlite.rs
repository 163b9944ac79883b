use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};

use super::policy::ConnectionPolicy;
use super::{StorageBackend, Value};
use crate::error::StorageError;

/// rusqlite is synchronous, so every call runs on the blocking thread pool
/// against a round-robin set of pragma-configured connections. Each
/// connection is mutex-guarded; the driver's own file locking arbitrates
/// between connections.
pub(super) struct SqliteBackend {
    pool: Arc<Pool>,
}

struct Pool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl Pool {
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        let conn = self.connections[idx].lock();
        f(&conn)
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(StorageError::Cancelled),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self {
            Value::Null => ValueRef::Null,
            Value::Integer(v) => ValueRef::Integer(*v),
            Value::Real(v) => ValueRef::Real(*v),
            Value::Text(v) => ValueRef::Text(v.as_bytes()),
            Value::Blob(v) => ValueRef::Blob(v),
        }))
    }
}

fn read_row(row: &rusqlite::Row<'_>, columns: usize) -> Result<Vec<Value>, rusqlite::Error> {
    (0..columns)
        .map(|idx| {
            Ok(match row.get_ref(idx)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(v) => Value::Integer(v),
                ValueRef::Real(v) => Value::Real(v),
                ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
                ValueRef::Blob(v) => Value::Blob(v.to_vec()),
            })
        })
        .collect()
}

impl SqliteBackend {
    pub(super) async fn open(
        path: PathBuf,
        policy: &ConnectionPolicy,
    ) -> Result<Self, StorageError> {
        let count = policy.effective_connections();
        let pragmas = policy.pragma_batch();

        let pool = run_blocking(move || {
            let mut connections = Vec::with_capacity(count);
            for _ in 0..count {
                let conn = Connection::open(&path)?;
                conn.execute_batch(&pragmas)?;
                connections.push(Mutex::new(conn));
            }
            Ok(Pool {
                connections,
                next: AtomicUsize::new(0),
            })
        })
        .await?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StorageError> {
        let pool = Arc::clone(&self.pool);
        let sql = sql.to_owned();
        let params = params.to_vec();
        run_blocking(move || {
            pool.with_connection(|conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                Ok(stmt.execute(params_from_iter(params.iter()))? as u64)
            })
        })
        .await
    }

    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, StorageError> {
        let pool = Arc::clone(&self.pool);
        let sql = sql.to_owned();
        let params = params.to_vec();
        run_blocking(move || {
            pool.with_connection(|conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let columns = stmt.column_count();
                let mut rows = stmt.query(params_from_iter(params.iter()))?;
                match rows.next()? {
                    Some(row) => Ok(read_row(row, columns)?),
                    None => Err(StorageError::NotFound),
                }
            })
        })
        .await
    }

    async fn query_rows(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Vec<Value>>, StorageError> {
        let pool = Arc::clone(&self.pool);
        let sql = sql.to_owned();
        let params = params.to_vec();
        run_blocking(move || {
            pool.with_connection(|conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let columns = stmt.column_count();
                let mut rows = stmt.query(params_from_iter(params.iter()))?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(read_row(row, columns)?);
                }
                Ok(out)
            })
        })
        .await
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), StorageError> {
        let pool = Arc::clone(&self.pool);
        let sql = sql.to_owned();
        run_blocking(move || pool.with_connection(|conn| Ok(conn.execute_batch(&sql)?))).await
    }
}
