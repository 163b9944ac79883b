use thiserror::Error;

/// Rejected before a run or a selection starts; never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker count must be positive")]
    NonPositiveWorkerCount,

    #[error("write percent must be within 0..=100, got {0}")]
    WritePercentOutOfRange(u8),
}

/// Outcome signal of a single storage call.
///
/// `NotFound` and `Cancelled` are distinguishable from driver failures so
/// that each call site can decide whether they are benign. The facade never
/// makes that decision itself.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no rows matched")]
    NotFound,

    #[error("interrupted before the call started")]
    Cancelled,

    #[error("row decode failed: {0}")]
    Decode(String),

    #[error("sqlite driver error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "libsql")]
    #[error("libsql driver error: {0}")]
    Libsql(#[from] libsql::Error),

    #[cfg(feature = "postgres")]
    #[error("postgres driver error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
}

impl StorageError {
    /// True for the outcomes a lookup over a sparse key pool is expected
    /// to produce while the datastore itself is healthy.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StorageError::Cancelled)
    }
}
