use std::sync::atomic::{AtomicUsize, Ordering};

use libsql::Builder;

use super::policy::ConnectionPolicy;
use super::{StorageBackend, Value};
use crate::error::StorageError;

/// The libsql driver is natively async; calls go straight to a round-robin
/// set of pragma-configured connections over one local database.
pub(super) struct LibsqlBackend {
    connections: Vec<libsql::Connection>,
    next: AtomicUsize,
    // Keeps the database open for as long as its connections live.
    _database: libsql::Database,
}

fn to_params(params: &[Value]) -> Vec<libsql::Value> {
    params.iter().cloned().map(libsql::Value::from).collect()
}

impl From<Value> for libsql::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => libsql::Value::Null,
            Value::Integer(v) => libsql::Value::Integer(v),
            Value::Real(v) => libsql::Value::Real(v),
            Value::Text(v) => libsql::Value::Text(v),
            Value::Blob(v) => libsql::Value::Blob(v),
        }
    }
}

impl From<libsql::Value> for Value {
    fn from(value: libsql::Value) -> Self {
        match value {
            libsql::Value::Null => Value::Null,
            libsql::Value::Integer(v) => Value::Integer(v),
            libsql::Value::Real(v) => Value::Real(v),
            libsql::Value::Text(v) => Value::Text(v),
            libsql::Value::Blob(v) => Value::Blob(v),
        }
    }
}

fn read_row(rows: &libsql::Rows, row: &libsql::Row) -> Result<Vec<Value>, StorageError> {
    let columns = rows.column_count();
    let mut out = Vec::with_capacity(columns as usize);
    for idx in 0..columns {
        out.push(Value::from(row.get_value(idx)?));
    }
    Ok(out)
}

impl LibsqlBackend {
    pub(super) async fn open(
        path: &str,
        policy: &ConnectionPolicy,
    ) -> Result<Self, StorageError> {
        let database = Builder::new_local(path).build().await?;
        let pragmas = policy.pragma_batch();

        let count = policy.effective_connections();
        let mut connections = Vec::with_capacity(count);
        for _ in 0..count {
            let conn = database.connect()?;
            conn.execute_batch(&pragmas).await?;
            connections.push(conn);
        }

        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
            _database: database,
        })
    }

    fn connection(&self) -> &libsql::Connection {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        &self.connections[idx]
    }
}

#[async_trait]
impl StorageBackend for LibsqlBackend {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StorageError> {
        Ok(self.connection().execute(sql, to_params(params)).await?)
    }

    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, StorageError> {
        let mut rows = self.connection().query(sql, to_params(params)).await?;
        match rows.next().await? {
            Some(row) => read_row(&rows, &row),
            None => Err(StorageError::NotFound),
        }
    }

    async fn query_rows(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Vec<Value>>, StorageError> {
        let mut rows = self.connection().query(sql, to_params(params)).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(read_row(&rows, &row)?);
        }
        Ok(out)
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), StorageError> {
        self.connection().execute_batch(sql).await?;
        Ok(())
    }
}
