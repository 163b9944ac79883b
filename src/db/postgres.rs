use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::BytesMut;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{NoTls, Row};

use super::policy::ConnectionPolicy;
use super::{StorageBackend, Value};
use crate::error::StorageError;

/// Client-server backend. The SQLite pragma knobs do not apply here; the
/// policy still bounds the client set and selects lock discipline.
pub(super) struct PostgresBackend {
    clients: Vec<tokio_postgres::Client>,
    next: AtomicUsize,
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Integer(v) => v.to_sql(ty, out),
            Value::Real(v) => v.to_sql(ty, out),
            Value::Text(v) => v.to_sql(ty, out),
            Value::Blob(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        <i64 as ToSql>::accepts(ty)
            || <f64 as ToSql>::accepts(ty)
            || <String as ToSql>::accepts(ty)
            || <Vec<u8> as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

fn as_dyn_params(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn read_cell(row: &Row, idx: usize) -> Result<Value, StorageError> {
    let ty = row.columns()[idx].type_().clone();
    if ty == Type::INT8 {
        Ok(row
            .try_get::<_, Option<i64>>(idx)?
            .map(Value::Integer)
            .unwrap_or(Value::Null))
    } else if ty == Type::INT4 {
        Ok(row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| Value::Integer(v as i64))
            .unwrap_or(Value::Null))
    } else if ty == Type::INT2 {
        Ok(row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| Value::Integer(v as i64))
            .unwrap_or(Value::Null))
    } else if ty == Type::FLOAT8 {
        Ok(row
            .try_get::<_, Option<f64>>(idx)?
            .map(Value::Real)
            .unwrap_or(Value::Null))
    } else if ty == Type::FLOAT4 {
        Ok(row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| Value::Real(v as f64))
            .unwrap_or(Value::Null))
    } else if ty == Type::TEXT || ty == Type::VARCHAR || ty == Type::BPCHAR {
        Ok(row
            .try_get::<_, Option<String>>(idx)?
            .map(Value::Text)
            .unwrap_or(Value::Null))
    } else if ty == Type::BYTEA {
        Ok(row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map(Value::Blob)
            .unwrap_or(Value::Null))
    } else {
        Err(StorageError::Decode(format!(
            "unsupported postgres column type {ty}"
        )))
    }
}

fn read_row(row: &Row) -> Result<Vec<Value>, StorageError> {
    (0..row.len()).map(|idx| read_cell(row, idx)).collect()
}

impl PostgresBackend {
    pub(super) async fn connect(
        dsn: &str,
        policy: &ConnectionPolicy,
    ) -> Result<Self, StorageError> {
        let count = policy.effective_connections();
        let mut clients = Vec::with_capacity(count);
        for _ in 0..count {
            let (client, connection) = tokio_postgres::connect(dsn, NoTls).await?;
            // The connection object drives the socket; it runs until the
            // client is dropped.
            tokio::task::spawn(async move {
                if let Err(err) = connection.await {
                    tracing::error!(error = %err, "postgres connection task failed");
                }
            });
            clients.push(client);
        }

        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
        })
    }

    fn client(&self) -> &tokio_postgres::Client {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        &self.clients[idx]
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, StorageError> {
        Ok(self.client().execute(sql, &as_dyn_params(params)).await?)
    }

    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Vec<Value>, StorageError> {
        match self.client().query_opt(sql, &as_dyn_params(params)).await? {
            Some(row) => read_row(&row),
            None => Err(StorageError::NotFound),
        }
    }

    async fn query_rows(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Vec<Value>>, StorageError> {
        let rows = self.client().query(sql, &as_dyn_params(params)).await?;
        rows.iter().map(read_row).collect()
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), StorageError> {
        Ok(self.client().batch_execute(sql).await?)
    }
}
