use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// How long a connection waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialise the scheduler schema in `conn`.
///
/// Creates the registry, history, fleet and event log tables (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id              TEXT    NOT NULL PRIMARY KEY,  -- UUID v5 of name
            name            TEXT    NOT NULL UNIQUE,
            queue           TEXT    NOT NULL,
            active          INTEGER NOT NULL DEFAULT 1,
            last_execution  TEXT,
            heartbeat       TEXT,
            tag             TEXT
        ) STRICT;

        CREATE TABLE IF NOT EXISTS job_history (
            id            TEXT NOT NULL PRIMARY KEY,       -- UUID v7
            job_id        TEXT NOT NULL,
            server        TEXT NOT NULL,
            status        TEXT NOT NULL,
            created_at    TEXT NOT NULL,
            completed_at  TEXT,
            message       TEXT,
            heartbeat     TEXT NOT NULL
        ) STRICT;

        -- Hot path: is this job already running on this server?
        CREATE INDEX IF NOT EXISTS idx_job_history_running
            ON job_history (job_id, server, status);
        CREATE INDEX IF NOT EXISTS idx_job_history_created
            ON job_history (created_at);

        CREATE TABLE IF NOT EXISTS servers (
            name       TEXT NOT NULL PRIMARY KEY,
            last_ping  TEXT NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS event_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            value       TEXT NOT NULL,
            created_at  TEXT NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_event_log_name_created
            ON event_log (name, created_at);
        ",
    )?;
    Ok(())
}

/// Open a connection configured for multi-process access to the shared file.
pub fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

/// Process-local handle to the shared store.
///
/// One connection behind a mutex. The lock is held only for the duration of
/// a synchronous rusqlite call, never across an `.await`. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Store {
    /// Open the database file at `path` and make sure the scheduler schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = open_connection(&path)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Lock the shared connection. A poisoned lock is recovered: rusqlite
    /// leaves the connection usable after a panic in another holder.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// File backing the store; heartbeats open their own connection to it.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read a required timestamp column.
pub(crate) fn ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    cadence_core::time::from_db(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Read a nullable timestamp column.
pub(crate) fn opt_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(raw) => cadence_core::time::from_db(&raw).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

/// Read a UUID stored as TEXT.
pub(crate) fn uuid_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<uuid::Uuid> {
    let raw: String = row.get(idx)?;
    uuid::Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
