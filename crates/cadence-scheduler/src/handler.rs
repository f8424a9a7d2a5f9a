use async_trait::async_trait;
use cadence_core::types::UserId;
use uuid::Uuid;

use crate::db::Store;
use crate::error::JobError;

/// What a job reports back: an optional message on success.
pub type JobResult = Result<Option<String>, JobError>;

/// Business logic of a declared job.
///
/// Implementations should be idempotent: delivery is at-least-once and two
/// servers may occasionally run the same `All` job in the same window.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, ctx: &JobContext) -> JobResult;
}

/// Everything a job may touch while it runs.
pub struct JobContext {
    pub job_id: Uuid,
    pub job_name: String,
    /// History row of this attempt.
    pub history_id: String,
    /// Server running the attempt.
    pub server: String,
    /// Declared parameters of the job.
    pub parameters: serde_json::Value,
    pub store: Store,
    /// Always the reserved system identity.
    pub user: UserId,
    /// Span the attempt runs in; handlers may enter it from spawned work.
    pub span: tracing::Span,
}
