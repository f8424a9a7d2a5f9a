//! The event log: a shared table of named, timestamped values that lets
//! processes which cannot see each other leave notes for one another.
//!
//! Delivery is at-least-once and unordered per consumer. Consumers delete
//! what they have handled and garbage-collect what nobody claimed; two
//! consumers deleting the same row is expected and harmless.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use cadence_core::time::to_db;

use crate::db::ts;
use crate::error::Result;

/// Channel name prefix for manual job triggers; the full name ends with the
/// target server.
pub const EXECUTE_JOB_PREFIX: &str = "EXECUTE_JOB_";

/// Channel name for permission cache invalidations.
pub const SECURITY_CACHE: &str = "SECURITY_CACHE";

/// Channel that carries manual triggers for `server`.
pub fn execute_job_channel(server: &str) -> String {
    format!("{EXECUTE_JOB_PREFIX}{server}")
}

/// A row of the `event_log` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: i64,
    pub name: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventLogEntry> {
    Ok(EventLogEntry {
        id: row.get(0)?,
        name: row.get(1)?,
        value: row.get(2)?,
        created_at: ts(row, 3)?,
    })
}

/// Append an entry stamped with the current time.
pub fn append(conn: &Connection, name: &str, value: &str) -> Result<i64> {
    append_at(conn, name, value, Utc::now())
}

/// Append an entry with an explicit timestamp.
pub fn append_at(conn: &Connection, name: &str, value: &str, at: DateTime<Utc>) -> Result<i64> {
    conn.execute(
        "INSERT INTO event_log (name, value, created_at) VALUES (?1, ?2, ?3)",
        params![name, value, to_db(at)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Ask `server` to run `job_name` out of schedule.
///
/// This is the only way to force an execution from outside the process: the
/// target's next tick picks the row up if it is younger than the trigger
/// window.
#[instrument(skip(conn))]
pub fn request_execution(conn: &Connection, server: &str, job_name: &str) -> Result<i64> {
    append(conn, &execute_job_channel(server), job_name)
}

/// Entries on `name` created at or after `since`, oldest first.
pub fn read_since(conn: &Connection, name: &str, since: DateTime<Utc>) -> Result<Vec<EventLogEntry>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, value, created_at FROM event_log
         WHERE name = ?1 AND created_at >= ?2
         ORDER BY created_at, id",
    )?;
    let entries = stmt
        .query_map(params![name, to_db(since)], row_to_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// Entries whose name starts with `prefix` and that were created before `cutoff`.
pub fn read_older_than(
    conn: &Connection,
    prefix: &str,
    cutoff: DateTime<Utc>,
) -> Result<Vec<EventLogEntry>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, value, created_at FROM event_log
         WHERE substr(name, 1, length(?1)) = ?1 AND created_at < ?2
         ORDER BY created_at, id",
    )?;
    let entries = stmt
        .query_map(params![prefix, to_db(cutoff)], row_to_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// Delete one entry. `Ok(false)` means somebody else got there first.
pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
    let n = conn.execute("DELETE FROM event_log WHERE id = ?1", params![id])?;
    Ok(n > 0)
}

/// Delete every entry under `prefix` older than `cutoff`, one row at a time.
///
/// Rows already removed by a peer are skipped quietly and per-row errors are
/// logged, never returned: garbage collection is opportunistic. Returns how
/// many rows this call removed.
pub fn purge_older_than(conn: &Connection, prefix: &str, cutoff: DateTime<Utc>) -> usize {
    let stale = match read_older_than(conn, prefix, cutoff) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(prefix, error = %e, "could not list stale events");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in stale {
        match delete(conn, entry.id) {
            Ok(true) => removed += 1,
            Ok(false) => debug!(id = entry.id, name = %entry.name, "stale event already removed"),
            Err(e) => warn!(id = entry.id, name = %entry.name, error = %e, "stale event delete failed"),
        }
    }
    if removed > 0 {
        debug!(prefix, removed, "stale events purged");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use chrono::Duration;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    #[test]
    fn read_since_is_inclusive_and_scoped_by_name() {
        let conn = conn();
        let t0 = Utc::now();
        append_at(&conn, SECURITY_CACHE, "Reload", t0 - Duration::seconds(5)).unwrap();
        append_at(&conn, SECURITY_CACHE, "DeleteRole,r1", t0).unwrap();
        append_at(&conn, "EXECUTE_JOB_a", "job", t0).unwrap();

        let entries = read_since(&conn, SECURITY_CACHE, t0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, "DeleteRole,r1");
    }

    #[test]
    fn prefix_match_is_literal() {
        let conn = conn();
        let old = Utc::now() - Duration::minutes(10);
        append_at(&conn, "EXECUTE_JOB_web-1", "a", old).unwrap();
        append_at(&conn, "EXECUTE_JOB_web-2", "b", old).unwrap();
        // `_` would be a LIKE wildcard; make sure it is not treated as one
        append_at(&conn, "EXECUTEXJOBXweb-3", "c", old).unwrap();

        let stale = read_older_than(&conn, EXECUTE_JOB_PREFIX, Utc::now()).unwrap();
        assert_eq!(stale.len(), 2);
    }

    #[test]
    fn purge_counts_each_row_once() {
        let conn = conn();
        let old = Utc::now() - Duration::minutes(10);
        let id = append_at(&conn, SECURITY_CACHE, "Reload", old).unwrap();
        append_at(&conn, SECURITY_CACHE, "Reload", Utc::now()).unwrap();

        // a peer deletes the first row before us
        assert!(delete(&conn, id).unwrap());
        assert!(!delete(&conn, id).unwrap());
        assert_eq!(purge_older_than(&conn, SECURITY_CACHE, Utc::now() - Duration::minutes(5)), 0);

        append_at(&conn, SECURITY_CACHE, "Reload", old).unwrap();
        assert_eq!(purge_older_than(&conn, SECURITY_CACHE, Utc::now() - Duration::minutes(5)), 1);
        assert_eq!(read_since(&conn, SECURITY_CACHE, old).unwrap().len(), 1);
    }

    #[test]
    fn request_execution_targets_server_channel() {
        let conn = conn();
        request_execution(&conn, "web-2", "nightly-report").unwrap();
        let entries = read_since(&conn, "EXECUTE_JOB_web-2", Utc::now() - Duration::seconds(5)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, "nightly-report");
    }
}
