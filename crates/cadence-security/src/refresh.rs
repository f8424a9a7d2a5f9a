use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_scheduler::db::open_connection;
use cadence_scheduler::event_log::{self, SECURITY_CACHE};
use cadence_scheduler::{ExecuteJobOn, JobContext, JobDefinition, JobError, JobHandler, JobResult};
use chrono::Utc;
use tracing::Instrument;

use crate::cache::PermissionCache;
use crate::types::RefreshReport;

/// Keeps this process's [`PermissionCache`] in step with the event log and
/// sweeps `SECURITY_CACHE` rows past their time to live.
///
/// Declared with `Every` affinity: each process refreshes its own replica.
/// The work runs on a blocking thread with a connection of its own, so a
/// full reload never holds the shared store handle.
pub struct PermissionCacheJob {
    cache: Arc<PermissionCache>,
    event_ttl: Duration,
}

impl PermissionCacheJob {
    pub const NAME: &'static str = "permission-cache-refresh";
    pub const QUEUE: &'static str = "security";

    pub fn new(cache: Arc<PermissionCache>, event_ttl: Duration) -> Self {
        Self { cache, event_ttl }
    }

    pub fn definition(refresh_interval: Duration) -> JobDefinition {
        JobDefinition::interval(Self::NAME, refresh_interval)
            .queue(Self::QUEUE)
            .execute_on(ExecuteJobOn::Every)
    }
}

#[async_trait]
impl JobHandler for PermissionCacheJob {
    async fn execute(&self, ctx: &JobContext) -> JobResult {
        let cache = Arc::clone(&self.cache);
        let path = ctx.store.path().to_path_buf();
        let ttl = chrono::Duration::from_std(self.event_ttl).unwrap_or(chrono::Duration::minutes(5));
        let span = ctx.span.clone();

        let (report, purged) = tokio::task::spawn_blocking(move || -> Result<(RefreshReport, usize), JobError> {
            let _entered = span.enter();
            let conn = open_connection(&path)?;
            let report = cache.refresh(&conn)?;
            let purged = event_log::purge_older_than(&conn, SECURITY_CACHE, Utc::now() - ttl);
            Ok((report, purged))
        })
        .in_current_span()
        .await
        .map_err(|e| JobError::failed(format!("refresh task ended abnormally: {e}")))??;

        if report.applied == 0 && report.skipped == 0 && purged == 0 {
            return Ok(None);
        }
        Ok(Some(format!(
            "applied {} events, skipped {}, purged {}",
            report.applied, report.skipped, purged
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{publish, SecurityEvent};
    use cadence_core::types::UserId;
    use cadence_scheduler::Store;

    #[tokio::test]
    async fn refresh_does_not_wait_on_the_shared_handle() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("cadence.db")).unwrap();
        crate::db::init_db(&store.conn()).unwrap();
        let cache = Arc::new(PermissionCache::new());
        cache.load(&store.conn()).unwrap();
        {
            let conn = store.conn();
            conn.execute("INSERT INTO sec_user_roles VALUES ('ana', 'operator')", []).unwrap();
            conn.execute("INSERT INTO sec_role_permissions VALUES ('operator', 'jobs.run')", []).unwrap();
            publish(&conn, &SecurityEvent::Reload).unwrap();
        }

        let job = PermissionCacheJob::new(Arc::clone(&cache), Duration::from_secs(300));
        let ctx = JobContext {
            job_id: cadence_scheduler::types::job_id_for(PermissionCacheJob::NAME),
            job_name: PermissionCacheJob::NAME.to_string(),
            history_id: "h-1".to_string(),
            server: "web-a".to_string(),
            parameters: serde_json::Value::Null,
            store: store.clone(),
            user: UserId::system(),
            span: tracing::Span::none(),
        };

        // another queue is mid-query on the shared connection
        let busy = store.conn();
        let message = tokio::time::timeout(Duration::from_secs(5), job.execute(&ctx))
            .await
            .unwrap()
            .unwrap();
        drop(busy);

        assert_eq!(message.as_deref(), Some("applied 1 events, skipped 0, purged 0"));
        assert!(cache.has_permission(&UserId::from("ana"), "jobs.run"));
    }
}
