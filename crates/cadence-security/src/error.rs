use cadence_scheduler::{JobError, SchedulerError};
use thiserror::Error;

/// Permission cache errors. Kept apart from the scheduler's so the admin
/// API can tell a bad event from a broken store.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Event log error: {0}")]
    EventLog(#[from] SchedulerError),

    /// A `SECURITY_CACHE` value that is not a known opcode.
    #[error("Invalid security event: {0}")]
    InvalidEvent(String),
}

pub type Result<T> = std::result::Result<T, SecurityError>;

impl From<SecurityError> for JobError {
    fn from(e: SecurityError) -> Self {
        match e {
            SecurityError::Database(e) => JobError::Database(e),
            SecurityError::EventLog(e) => JobError::Scheduler(e),
            other => JobError::Failed(other.to_string()),
        }
    }
}
