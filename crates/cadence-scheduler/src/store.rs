//! Row-level access to the `jobs`, `job_history` and `servers` tables.
//!
//! Plain functions over `&Connection`, one per query, so callers choose
//! which connection (shared store or heartbeat sibling) they run on.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use cadence_core::time::to_db;

use crate::db::{opt_ts, ts, uuid_col};
use crate::error::Result;
use crate::types::{HistoryStatus, Job, JobHistory, Server};

const JOB_SELECT_SQL: &str =
    "SELECT id, name, queue, active, last_execution, heartbeat, tag FROM jobs";

const HISTORY_SELECT_SQL: &str = "SELECT id, job_id, server, status, created_at, completed_at,
            message, heartbeat FROM job_history";

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        queue: row.get(2)?,
        active: row.get::<_, i64>(3)? != 0,
        last_execution: opt_ts(row, 4)?,
        heartbeat: opt_ts(row, 5)?,
        tag: row.get(6)?,
    })
}

fn row_to_history(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobHistory> {
    let status_raw: String = row.get(3)?;
    let status = status_raw.parse::<HistoryStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })?;
    Ok(JobHistory {
        id: row.get(0)?,
        job_id: uuid_col(row, 1)?,
        server: row.get(2)?,
        status,
        created_at: ts(row, 4)?,
        completed_at: opt_ts(row, 5)?,
        message: row.get(6)?,
        heartbeat: ts(row, 7)?,
    })
}

// ── jobs ─────────────────────────────────────────────────────────────────────

/// All registry rows, ordered by name.
pub fn list_jobs(conn: &Connection) -> Result<Vec<Job>> {
    let mut stmt = conn.prepare_cached(&format!("{JOB_SELECT_SQL} ORDER BY name"))?;
    let jobs = stmt
        .query_map([], row_to_job)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(jobs)
}

pub fn get_job(conn: &Connection, id: Uuid) -> Result<Option<Job>> {
    let job = conn
        .query_row(
            &format!("{JOB_SELECT_SQL} WHERE id = ?1"),
            params![id.to_string()],
            row_to_job,
        )
        .optional()?;
    Ok(job)
}

pub fn get_job_by_name(conn: &Connection, name: &str) -> Result<Option<Job>> {
    let job = conn
        .query_row(&format!("{JOB_SELECT_SQL} WHERE name = ?1"), params![name], row_to_job)
        .optional()?;
    Ok(job)
}

/// Insert a registry row unless one with the same id already exists.
/// Returns whether this call created it.
pub fn insert_job_if_missing(conn: &Connection, job: &Job) -> Result<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO jobs (id, name, queue, active, last_execution, heartbeat, tag)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            job.id.to_string(),
            job.name,
            job.queue,
            job.active as i64,
            job.last_execution.map(to_db),
            job.heartbeat.map(to_db),
            job.tag,
        ],
    )?;
    Ok(n > 0)
}

pub fn update_job_placement(conn: &Connection, id: Uuid, queue: &str, tag: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE jobs SET queue = ?2, tag = ?3 WHERE id = ?1",
        params![id.to_string(), queue, tag],
    )?;
    Ok(())
}

pub fn delete_job(conn: &Connection, id: Uuid) -> Result<bool> {
    let n = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id.to_string()])?;
    Ok(n > 0)
}

/// Returns whether a row was updated.
pub fn set_job_active(conn: &Connection, id: Uuid, active: bool) -> Result<bool> {
    let n = conn.execute(
        "UPDATE jobs SET active = ?2 WHERE id = ?1",
        params![id.to_string(), active as i64],
    )?;
    Ok(n > 0)
}

pub fn touch_job_execution(conn: &Connection, id: Uuid, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE jobs SET last_execution = ?2 WHERE id = ?1",
        params![id.to_string(), to_db(at)],
    )?;
    Ok(())
}

pub fn touch_job_heartbeat(conn: &Connection, id: Uuid, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE jobs SET heartbeat = ?2 WHERE id = ?1",
        params![id.to_string(), to_db(at)],
    )?;
    Ok(())
}

// ── job_history ──────────────────────────────────────────────────────────────

/// Insert a new `running` row and return it.
pub fn insert_running_history(
    conn: &Connection,
    job_id: Uuid,
    server: &str,
    now: DateTime<Utc>,
) -> Result<JobHistory> {
    let id = Uuid::now_v7().to_string();
    let now_str = to_db(now);
    conn.execute(
        "INSERT INTO job_history (id, job_id, server, status, created_at, heartbeat)
         VALUES (?1, ?2, ?3, 'running', ?4, ?4)",
        params![id, job_id.to_string(), server, now_str],
    )?;
    Ok(JobHistory {
        id,
        job_id,
        server: server.to_string(),
        status: HistoryStatus::Running,
        created_at: now,
        completed_at: None,
        message: None,
        heartbeat: now,
    })
}

/// `running` rows for a job on one server. Normally zero or one.
pub fn running_history(conn: &Connection, job_id: Uuid, server: &str) -> Result<Vec<JobHistory>> {
    let mut stmt = conn.prepare_cached(&format!(
        "{HISTORY_SELECT_SQL} WHERE job_id = ?1 AND server = ?2 AND status = 'running'
         ORDER BY created_at"
    ))?;
    let rows = stmt
        .query_map(params![job_id.to_string(), server], row_to_history)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn get_history(conn: &Connection, id: &str) -> Result<Option<JobHistory>> {
    let row = conn
        .query_row(&format!("{HISTORY_SELECT_SQL} WHERE id = ?1"), params![id], row_to_history)
        .optional()?;
    Ok(row)
}

/// Most recent attempts for a job, newest first.
pub fn recent_history(conn: &Connection, job_id: Uuid, limit: usize) -> Result<Vec<JobHistory>> {
    let mut stmt = conn.prepare_cached(&format!(
        "{HISTORY_SELECT_SQL} WHERE job_id = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
    ))?;
    let rows = stmt
        .query_map(params![job_id.to_string(), limit as i64], row_to_history)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Move a history row to a terminal status. Only a `running` row is
/// changed, so a late writer can never resurrect or overwrite an outcome.
/// Returns whether a row was updated.
pub fn finish_history(
    conn: &Connection,
    id: &str,
    status: HistoryStatus,
    message: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool> {
    let n = conn.execute(
        "UPDATE job_history SET status = ?2, message = ?3, completed_at = ?4
         WHERE id = ?1 AND status = 'running'",
        params![id, status.to_string(), message, to_db(at)],
    )?;
    Ok(n > 0)
}

/// Close every running row, on any server, whose heartbeat is older than
/// `heartbeat_before`. Returns how many rows were closed.
pub fn fail_stale_running(
    conn: &Connection,
    heartbeat_before: DateTime<Utc>,
    message: &str,
    at: DateTime<Utc>,
) -> Result<usize> {
    let n = conn.execute(
        "UPDATE job_history SET status = ?1, message = ?2, completed_at = ?3
         WHERE status = 'running' AND heartbeat < ?4",
        params![HistoryStatus::Failed.to_string(), message, to_db(at), to_db(heartbeat_before)],
    )?;
    Ok(n)
}

/// Stamp the heartbeat of a row that is still running.
pub fn touch_history_heartbeat(conn: &Connection, id: &str, at: DateTime<Utc>) -> Result<bool> {
    let n = conn.execute(
        "UPDATE job_history SET heartbeat = ?2 WHERE id = ?1 AND status = 'running'",
        params![id, to_db(at)],
    )?;
    Ok(n > 0)
}

/// Delete finished history created before `cutoff`. Running rows are kept
/// whatever their age; the fleet-wide stale sweep closes them first.
pub fn purge_history_before(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM job_history WHERE created_at < ?1 AND status != 'running'",
        params![to_db(cutoff)],
    )?;
    Ok(n)
}

// ── servers ──────────────────────────────────────────────────────────────────

/// Upsert this server's presence row.
pub fn ping_server(conn: &Connection, name: &str, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO servers (name, last_ping) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET last_ping = excluded.last_ping",
        params![name, to_db(at)],
    )?;
    Ok(())
}

/// Fleet members ordered by name, then most recent ping.
pub fn list_servers(conn: &Connection) -> Result<Vec<Server>> {
    let mut stmt =
        conn.prepare_cached("SELECT name, last_ping FROM servers ORDER BY name, last_ping DESC")?;
    let servers = stmt
        .query_map([], |row| {
            Ok(Server {
                name: row.get(0)?,
                last_ping: ts(row, 1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(servers)
}
