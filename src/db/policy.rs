use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

/// SQLite journal mode; see https://www.sqlite.org/pragma.html#pragma_journal_mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    Wal,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Synchronous {
    Off,
    Normal,
    Full,
    Extra,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum TempStore {
    Default,
    File,
    Memory,
}

/// How a [`Store`](super::Store) opens and drives its connections.
///
/// Immutable once a store is constructed from it. The engine never looks
/// inside; it only observes that different policies change contention.
///
/// `serialize_access` and `max_connections` are deliberately independent:
/// serialized access still opens the full connection set underneath, and
/// how the two interact (e.g. a busy-timeout retry storm under a
/// one-connection cap) is implementation-defined and meant to be measured,
/// not assumed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionPolicy {
    /// Gate every operation behind an application-level reader/writer lock.
    pub serialize_access: bool,

    /// Cap on simultaneous physical connections; defaults to a value
    /// proportional to available parallelism.
    pub max_connections: Option<NonZeroUsize>,

    /// Always encoded, even when zero, so both SQLite drivers start from
    /// the same busy-handler configuration.
    pub busy_timeout: Duration,

    pub journal_mode: Option<JournalMode>,
    pub synchronous: Option<Synchronous>,
    pub temp_store: Option<TempStore>,

    /// Pages when positive, KiB when negative, as SQLite defines it.
    pub cache_size: Option<i64>,

    pub mmap_size: Option<u64>,
    pub full_sync: bool,
    pub wal_autocheckpoint: Option<u32>,
}

impl ConnectionPolicy {
    /// The physical connection count a backend should open.
    pub fn effective_connections(&self) -> usize {
        self.max_connections.map(NonZeroUsize::get).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
                * 2
        })
    }

    /// Compiles the SQLite tuning knobs into a `PRAGMA` script, applied to
    /// each connection right after it is opened. Drivers without pragmas
    /// (PostgreSQL) ignore these knobs entirely.
    pub fn pragma_batch(&self) -> String {
        let mut batch = format!("PRAGMA busy_timeout = {};\n", self.busy_timeout.as_millis());
        if let Some(mode) = self.journal_mode {
            batch.push_str(&format!("PRAGMA journal_mode = {mode};\n"));
        }
        if let Some(sync) = self.synchronous {
            batch.push_str(&format!("PRAGMA synchronous = {sync};\n"));
        }
        if let Some(store) = self.temp_store {
            batch.push_str(&format!("PRAGMA temp_store = {store};\n"));
        }
        if let Some(size) = self.cache_size {
            batch.push_str(&format!("PRAGMA cache_size = {size};\n"));
        }
        if let Some(size) = self.mmap_size {
            batch.push_str(&format!("PRAGMA mmap_size = {size};\n"));
        }
        if self.full_sync {
            batch.push_str("PRAGMA fullfsync = 1;\n");
        }
        if let Some(pages) = self.wal_autocheckpoint {
            batch.push_str(&format!("PRAGMA wal_autocheckpoint = {pages};\n"));
        }
        batch
    }
}

impl fmt::Display for ConnectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.serialize_access {
            write!(f, "serialized ")?;
        }
        if let Some(cap) = self.max_connections {
            write!(f, "max_connections={cap} ")?;
        }
        write!(f, "busy_timeout={}", self.busy_timeout.as_millis())?;
        if let Some(mode) = self.journal_mode {
            write!(f, " journal_mode={mode}")?;
        }
        if let Some(sync) = self.synchronous {
            write!(f, " synchronous={sync}")?;
        }
        if let Some(store) = self.temp_store {
            write!(f, " temp_store={store}")?;
        }
        if let Some(size) = self.cache_size {
            write!(f, " cache_size={size}")?;
        }
        if let Some(size) = self.mmap_size {
            write!(f, " mmap_size={size}")?;
        }
        if self.full_sync {
            write!(f, " fullfsync=1")?;
        }
        if let Some(pages) = self.wal_autocheckpoint {
            write!(f, " wal_autocheckpoint={pages}")?;
        }
        Ok(())
    }
}
