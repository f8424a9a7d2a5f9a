use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use cadence_scheduler::{Job, JobHistory, Server};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{error::ApiError, require, PERM_JOBS_MANAGE, PERM_JOBS_RUN};
use crate::app::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct RunQuery {
    /// Target server; this node when absent.
    pub server: Option<String>,
}

#[derive(Serialize)]
pub struct RunAccepted {
    pub trigger_id: i64,
    pub job: String,
    pub server: String,
}

#[derive(Deserialize)]
pub struct ActiveRequest {
    pub active: bool,
}

/// GET /jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Job>>, ApiError> {
    Ok(Json(state.scheduler.list_jobs()?))
}

/// GET /jobs/{name}/history?limit=N: newest first.
pub async fn job_history(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<JobHistory>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT);
    Ok(Json(state.scheduler.history(&name, limit)?))
}

/// POST /jobs/{name}/run?server=S: queue a manual trigger. The target
/// picks it up on its next tick.
pub async fn run_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Query(query): Query<RunQuery>,
) -> Result<(StatusCode, Json<RunAccepted>), ApiError> {
    let user = require(&state, &headers, PERM_JOBS_RUN)?;
    let server = query.server.unwrap_or_else(|| state.config.server.name.clone());
    let trigger_id = state.scheduler.request_run(&server, &name)?;
    info!(%user, job = %name, %server, "manual run requested over http");
    Ok((
        StatusCode::ACCEPTED,
        Json(RunAccepted {
            trigger_id,
            job: name,
            server,
        }),
    ))
}

/// POST /jobs/{name}/active: body `{"active": bool}`.
pub async fn set_active(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(body): Json<ActiveRequest>,
) -> Result<Json<Job>, ApiError> {
    let user = require(&state, &headers, PERM_JOBS_MANAGE)?;
    let job = state.scheduler.set_active(&name, body.active)?;
    info!(%user, job = %name, active = body.active, "job toggled over http");
    Ok(Json(job))
}

/// GET /servers
pub async fn list_servers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Server>>, ApiError> {
    Ok(Json(state.scheduler.servers()?))
}
