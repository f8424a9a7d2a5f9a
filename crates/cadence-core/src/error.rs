use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Job not found: {name}")]
    JobNotFound { name: String },

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CadenceError {
    /// Short error code string returned by the admin API.
    pub fn code(&self) -> &'static str {
        match self {
            CadenceError::Config(_) => "CONFIG_ERROR",
            CadenceError::Database(_) => "DATABASE_ERROR",
            CadenceError::JobNotFound { .. } => "JOB_NOT_FOUND",
            CadenceError::PermissionDenied { .. } => "PERMISSION_DENIED",
            CadenceError::Io(_) => "IO_ERROR",
            CadenceError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;
