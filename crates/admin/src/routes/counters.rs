use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use mixgate_common::ProjectId;
use serde_json::{json, Value};

use crate::routes::error::ApiError;
use crate::state::SharedState;

/// GET /api/counters
pub async fn list_counters(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let mut counters = state.counters.list().await?;
    counters.sort_by(|a, b| b.count.cmp(&a.count));
    Ok(Json(json!({
        "total": counters.len(),
        "counters": counters
    })))
}

/// POST /api/counters/{project_id}/reset
pub async fn reset_counter(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id: ProjectId = project_id
        .parse()
        .map_err(|_| ApiError::new(StatusCode::BAD_REQUEST, "invalid project id"))?;

    let counter = state.counters.reset(id).await?;
    tracing::info!(project_id = %id, "counter reset via admin API");

    Ok(Json(json!({
        "status": "reset",
        "counter": counter
    })))
}

/// POST /api/counters/reset
///
/// Runs the reset job immediately, outside the hourly schedule.
pub async fn reset_all(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let reset = state.run_reset().await.map_err(|e| {
        tracing::error!(error = %e, "manual reset pass failed");
        ApiError::from(e)
    })?;

    Ok(Json(json!({
        "status": "reset",
        "counters_reset": reset
    })))
}
