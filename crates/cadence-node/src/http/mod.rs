//! Admin HTTP API.
//!
//! Read routes are open. Mutating routes name the caller in the
//! `X-Cadence-User` header and are checked against the permission cache.

pub mod error;
pub mod health;
pub mod jobs;
pub mod users;

use axum::http::HeaderMap;
use cadence_core::{types::UserId, CadenceError};

use crate::app::AppState;
use error::ApiError;

pub const USER_HEADER: &str = "x-cadence-user";

/// Permission needed to trigger a job.
pub const PERM_JOBS_RUN: &str = "jobs.run";
/// Permission needed to pause or resume a job.
pub const PERM_JOBS_MANAGE: &str = "jobs.manage";

/// Resolve the caller and make sure they hold `permission`.
pub(crate) fn require(state: &AppState, headers: &HeaderMap, permission: &str) -> Result<UserId, ApiError> {
    let user = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(UserId::from)
        .ok_or_else(|| CadenceError::PermissionDenied { reason: format!("missing {USER_HEADER} header") })?;

    if !state.permissions.has_permission(&user, permission) {
        tracing::info!(%user, permission, "admin request denied");
        return Err(CadenceError::PermissionDenied { reason: format!("{user} lacks {permission}") }.into());
    }
    Ok(user)
}
