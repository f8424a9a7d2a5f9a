use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use cadence_core::CadenceConfig;
use cadence_scheduler::SchedulerHandle;
use cadence_security::PermissionCache;
use tower_http::trace::TraceLayer;

/// Central shared state, passed as `Arc<AppState>` to all Axum handlers.
pub struct AppState {
    pub config: CadenceConfig,
    pub scheduler: SchedulerHandle,
    /// This process's replica; kept fresh by the refresh job.
    pub permissions: Arc<PermissionCache>,
}

impl AppState {
    pub fn new(config: CadenceConfig, scheduler: SchedulerHandle, permissions: Arc<PermissionCache>) -> Self {
        Self {
            config,
            scheduler,
            permissions,
        }
    }
}

/// Assemble the admin router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/jobs", get(crate::http::jobs::list_jobs))
        .route("/jobs/{name}/history", get(crate::http::jobs::job_history))
        .route("/jobs/{name}/run", post(crate::http::jobs::run_job))
        .route("/jobs/{name}/active", post(crate::http::jobs::set_active))
        .route("/servers", get(crate::http::jobs::list_servers))
        .route("/users/{id}/permissions", get(crate::http::users::user_permissions))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
