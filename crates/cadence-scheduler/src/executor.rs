use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use cadence_core::types::UserId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::FutureExt;
use rusqlite::Connection;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::affinity::may_run_here;
use crate::db::Store;
use crate::error::{JobError, Result};
use crate::handler::JobContext;
use crate::heartbeat::Heartbeat;
use crate::registry::RegisteredJob;
use crate::schedule::is_due;
use crate::store;
use crate::types::{ExecuteJobOn, ExecutionOutcome, HistoryStatus, JobDefinition, JobHistory, SkipReason};

/// A running row is presumed abandoned after this many missed pings.
pub const STALE_AFTER_PINGS: i32 = 3;

/// Message written on a running row repaired after its owner went silent.
pub const STALE_RUN_MESSAGE: &str = "heartbeat lost; run presumed crashed";

/// Generic message returned when even the failure could not be recorded.
pub const UNRECORDED_FAILURE: &str = "job finished but its result could not be recorded";

/// Drives one attempt of a job through `Idle → Running → Completed | Failed`.
///
/// Never returns an error: every failure ends up in the job history, or in
/// the log when the history itself is unreachable.
pub struct JobExecutor {
    store: Store,
    server: String,
    ping_interval: Duration,
    /// Last start on this process, for jobs scheduled per server.
    local_runs: DashMap<Uuid, DateTime<Utc>>,
}

impl JobExecutor {
    pub fn new(store: Store, server: &str, ping_interval: Duration) -> Self {
        Self {
            store,
            server: server.to_string(),
            ping_interval,
            local_runs: DashMap::new(),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Age after which a running row's heartbeat counts as lost.
    pub fn stale_after(&self) -> chrono::Duration {
        let ping = i64::try_from(self.ping_interval.as_millis()).unwrap_or(i64::MAX / 4);
        chrono::Duration::milliseconds(ping * i64::from(STALE_AFTER_PINGS))
    }

    /// Close running rows of any server whose heartbeat went silent, so a
    /// crashed peer that never returns does not leave them open forever.
    pub fn repair_stale_runs(&self) -> usize {
        let now = Utc::now();
        let Some(cutoff) = now.checked_sub_signed(self.stale_after()) else {
            return 0;
        };
        let conn = self.store.conn();
        match store::fail_stale_running(&conn, cutoff, STALE_RUN_MESSAGE, now) {
            Ok(0) => 0,
            Ok(repaired) => {
                warn!(repaired, "stale running rows marked failed");
                repaired
            }
            Err(e) => {
                warn!(error = %e, "stale run sweep failed");
                0
            }
        }
    }

    /// Attempt one run of `job`.
    ///
    /// Unless `force` is set the attempt is subject to the active flag,
    /// affinity (against `default_server`) and the schedule. A fresh running
    /// row for this job on this server always blocks the attempt.
    #[instrument(skip_all, fields(job = %job.definition.name, force))]
    pub async fn run(&self, job: &RegisteredJob, default_server: Option<&str>, force: bool) -> ExecutionOutcome {
        match self.try_run(job, default_server, force).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "job attempt aborted by a store error");
                ExecutionOutcome::Failed(format!("scheduler error: {e}"))
            }
        }
    }

    async fn try_run(
        &self,
        job: &RegisteredJob,
        default_server: Option<&str>,
        force: bool,
    ) -> Result<ExecutionOutcome> {
        let def = &job.definition;
        let now = Utc::now();

        let history = {
            let conn = self.store.conn();
            if let Some(reason) = self.admission(&conn, def, default_server, force, now)? {
                debug!(?reason, "job skipped");
                return Ok(ExecutionOutcome::Skipped(reason));
            }
            let history = store::insert_running_history(&conn, def.id, &self.server, now)?;
            // Advisory only; a peer bumping it at the same moment is fine.
            if let Err(e) = store::touch_job_execution(&conn, def.id, now) {
                debug!(error = %e, "last_execution update lost a race");
            }
            history
        };
        self.local_runs.insert(def.id, now);

        info!(history_id = %history.id, "job started");
        let heartbeat = Heartbeat::start(&self.store, history.id.clone(), def.id, self.ping_interval);
        let span = info_span!("job", job.name = %def.name, history_id = %history.id);
        let ctx = JobContext {
            job_id: def.id,
            job_name: def.name.clone(),
            history_id: history.id.clone(),
            server: self.server.clone(),
            parameters: def.parameters.clone(),
            store: self.store.clone(),
            user: UserId::system(),
            span: span.clone(),
        };

        let result = AssertUnwindSafe(job.handler.execute(&ctx))
            .catch_unwind()
            .instrument(span)
            .await;
        heartbeat.stop().await;

        let (status, message) = match result {
            Ok(Ok(message)) => (HistoryStatus::Completed, message),
            Ok(Err(e)) => (HistoryStatus::Failed, Some(e.to_string())),
            Err(panic) => (HistoryStatus::Failed, Some(JobError::Panicked(panic_message(&*panic)).to_string())),
        };

        Ok(self.record(def, &history, status, message))
    }

    /// Why an attempt may not start, or `None` if it may.
    fn admission(
        &self,
        conn: &Connection,
        def: &JobDefinition,
        default_server: Option<&str>,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<SkipReason>> {
        let Some(row) = store::get_job(conn, def.id)? else {
            return Ok(Some(SkipReason::Deleted));
        };

        if !force {
            if !row.active {
                return Ok(Some(SkipReason::Inactive));
            }
            if !may_run_here(&def.execute_on, &self.server, default_server) {
                return Ok(Some(SkipReason::NotThisServer));
            }
            let last = match def.execute_on {
                ExecuteJobOn::Every => self.local_runs.get(&def.id).map(|r| *r),
                _ => row.last_execution,
            };
            if !is_due(&def.schedule, def.days, last, now) {
                return Ok(Some(SkipReason::NotDue));
            }
        }

        if !self.claim_slot(conn, def, now)? {
            return Ok(Some(SkipReason::AlreadyRunning));
        }
        Ok(None)
    }

    /// Check this server's running rows for the job. A fresh one blocks the
    /// attempt; stale ones are closed as failed so the attempt can proceed.
    fn claim_slot(&self, conn: &Connection, def: &JobDefinition, now: DateTime<Utc>) -> Result<bool> {
        let stale_after = self.stale_after();
        for running in store::running_history(conn, def.id, &self.server)? {
            if now - running.heartbeat < stale_after {
                return Ok(false);
            }
            warn!(
                history_id = %running.id,
                last_heartbeat = %running.heartbeat,
                "stale running row; marking failed"
            );
            store::finish_history(conn, &running.id, HistoryStatus::Failed, Some(STALE_RUN_MESSAGE), now)?;
        }
        Ok(true)
    }

    fn record(
        &self,
        def: &JobDefinition,
        history: &JobHistory,
        status: HistoryStatus,
        message: Option<String>,
    ) -> ExecutionOutcome {
        let finished = Utc::now();
        let conn = self.store.conn();

        match store::finish_history(&conn, &history.id, status, message.as_deref(), finished) {
            Ok(true) => {}
            // A peer declared the run stale while it was still going.
            Ok(false) => warn!(history_id = %history.id, "history row already closed; outcome dropped"),
            Err(e) => {
                error!(history_id = %history.id, error = %e, "could not record job outcome");
                return ExecutionOutcome::Failed(UNRECORDED_FAILURE.to_string());
            }
        }
        if let Err(e) = store::touch_job_execution(&conn, def.id, finished) {
            debug!(error = %e, "last_execution update lost a race");
        }

        match status {
            HistoryStatus::Completed => {
                info!(history_id = %history.id, "job completed");
                ExecutionOutcome::Completed
            }
            _ => {
                let message = message.unwrap_or_default();
                warn!(history_id = %history.id, %message, "job failed");
                ExecutionOutcome::Failed(message)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
