use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cadence_core::CadenceError;
use cadence_scheduler::SchedulerError;
use cadence_security::SecurityError;
use serde::Serialize;

#[derive(Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub error: String,
}

/// Handler error: a [`CadenceError`] rendered as `{code, error}`.
#[derive(Debug)]
pub struct ApiError(pub CadenceError);

impl From<CadenceError> for ApiError {
    fn from(e: CadenceError) -> Self {
        Self(e)
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        Self(match e {
            SchedulerError::JobNotFound { id } => CadenceError::JobNotFound { name: id },
            SchedulerError::Database(e) => CadenceError::Database(e.to_string()),
            other => CadenceError::Internal(other.to_string()),
        })
    }
}

impl From<SecurityError> for ApiError {
    fn from(e: SecurityError) -> Self {
        Self(match e {
            SecurityError::Database(e) => CadenceError::Database(e.to_string()),
            other => CadenceError::Internal(other.to_string()),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            CadenceError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            CadenceError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "admin request failed");
        }
        let body = ErrorBody {
            code: self.0.code(),
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
