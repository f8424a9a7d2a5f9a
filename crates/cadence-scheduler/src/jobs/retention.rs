use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::store;
use crate::types::{ExecuteJobOn, JobDefinition};

/// Deletes finished history rows older than the retention period.
///
/// Runs hourly on the default server only. Running rows are never touched.
pub struct HistoryRetentionJob {
    retention_days: u32,
}

impl HistoryRetentionJob {
    pub const NAME: &'static str = "job-history-retention";
    pub const QUEUE: &'static str = "maintenance";

    pub fn new(retention_days: u32) -> Self {
        Self { retention_days }
    }

    pub fn definition() -> JobDefinition {
        JobDefinition::interval(Self::NAME, Duration::from_secs(3600))
            .queue(Self::QUEUE)
            .execute_on(ExecuteJobOn::One { server: None })
    }
}

#[async_trait]
impl JobHandler for HistoryRetentionJob {
    async fn execute(&self, ctx: &JobContext) -> JobResult {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.retention_days));
        let removed = store::purge_history_before(&ctx.store.conn(), cutoff)?;
        Ok(Some(format!("removed {removed} history rows older than {} days", self.retention_days)))
    }
}
