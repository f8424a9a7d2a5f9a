use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The provided schedule definition is invalid or unsupported.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No job with the given name or ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// Two declarations share a name, and therefore an id.
    #[error("Job declared twice: {name}")]
    DuplicateJob { name: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Failure reported by a job's business logic.
///
/// Always captured into the job history; never propagated past the queue.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        JobError::Failed(msg.into())
    }
}
