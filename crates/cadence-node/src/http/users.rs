use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use cadence_security::UserAccess;

use crate::app::AppState;

/// GET /users/{id}/permissions: served from this node's cache, so it may
/// lag a graph change by up to one refresh interval.
pub async fn user_permissions(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Json<UserAccess> {
    Json(state.permissions.access_of(&id))
}
