use chrono::Utc;
use tracing::info;

use crate::db::Store;
use crate::error::{Result, SchedulerError};
use crate::event_log;
use crate::store;
use crate::types::{Job, JobHistory, Server};

/// Operator-side view of the scheduler.
///
/// Everything goes through the shared store, so a handle works the same
/// whether or not a [`JobService`](crate::engine::JobService) runs in this
/// process.
#[derive(Clone)]
pub struct SchedulerHandle {
    store: Store,
}

impl SchedulerHandle {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        store::list_jobs(&self.store.conn())
    }

    pub fn job(&self, name: &str) -> Result<Job> {
        store::get_job_by_name(&self.store.conn(), name)?
            .ok_or_else(|| SchedulerError::JobNotFound { id: name.to_string() })
    }

    /// Pause or resume a job fleet-wide.
    pub fn set_active(&self, name: &str, active: bool) -> Result<Job> {
        let conn = self.store.conn();
        let job = store::get_job_by_name(&conn, name)?
            .ok_or_else(|| SchedulerError::JobNotFound { id: name.to_string() })?;
        store::set_job_active(&conn, job.id, active)?;
        info!(job = %name, active, "job active flag changed");
        Ok(Job { active, ..job })
    }

    /// Most recent attempts of a job, newest first.
    pub fn history(&self, name: &str, limit: usize) -> Result<Vec<JobHistory>> {
        let conn = self.store.conn();
        let job = store::get_job_by_name(&conn, name)?
            .ok_or_else(|| SchedulerError::JobNotFound { id: name.to_string() })?;
        store::recent_history(&conn, job.id, limit)
    }

    pub fn servers(&self) -> Result<Vec<Server>> {
        store::list_servers(&self.store.conn())
    }

    /// Ask `server` to run `job_name` on its next tick, bypassing schedule
    /// and affinity. The request expires if not picked up within the
    /// trigger window.
    pub fn request_run(&self, server: &str, job_name: &str) -> Result<i64> {
        let conn = self.store.conn();
        if store::get_job_by_name(&conn, job_name)?.is_none() {
            return Err(SchedulerError::JobNotFound { id: job_name.to_string() });
        }
        let id = event_log::request_execution(&conn, server, job_name)?;
        info!(job = %job_name, %server, trigger_id = id, requested_at = %Utc::now(), "manual run requested");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::execute_job_channel;
    use crate::types::{job_id_for, HistoryStatus};

    fn handle_with_job(name: &str) -> (tempfile::TempDir, SchedulerHandle) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("cadence.db")).unwrap();
        let job = Job {
            id: job_id_for(name),
            name: name.to_string(),
            queue: "default".to_string(),
            active: true,
            last_execution: None,
            heartbeat: None,
            tag: None,
        };
        store::insert_job_if_missing(&store.conn(), &job).unwrap();
        (dir, SchedulerHandle::new(store))
    }

    #[test]
    fn set_active_round_trips_through_store() {
        let (_dir, handle) = handle_with_job("reindex");
        assert!(!handle.set_active("reindex", false).unwrap().active);
        assert!(!handle.job("reindex").unwrap().active);
        assert!(matches!(
            handle.set_active("missing", true),
            Err(SchedulerError::JobNotFound { .. })
        ));
    }

    #[test]
    fn request_run_writes_addressed_event() {
        let (_dir, handle) = handle_with_job("reindex");
        handle.request_run("web-2", "reindex").unwrap();

        let rows = event_log::read_since(
            &handle.store.conn(),
            &execute_job_channel("web-2"),
            Utc::now() - chrono::Duration::minutes(1),
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, "reindex");
        assert!(handle.request_run("web-2", "nope").is_err());
    }

    #[test]
    fn history_is_newest_first() {
        let (_dir, handle) = handle_with_job("reindex");
        let id = job_id_for("reindex");
        {
            let conn = handle.store.conn();
            let old = store::insert_running_history(&conn, id, "s1", Utc::now() - chrono::Duration::hours(1)).unwrap();
            store::finish_history(&conn, &old.id, HistoryStatus::Completed, None, Utc::now()).unwrap();
            store::insert_running_history(&conn, id, "s1", Utc::now()).unwrap();
        }
        let history = handle.history("reindex", 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, HistoryStatus::Running);
    }
}
