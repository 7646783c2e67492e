use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use mixgate_projects::{NewProject, ProjectUpdate};
use mixgate_rate_limit::StoreError;
use serde_json::{json, Value};

use crate::routes::error::ApiError;
use crate::state::SharedState;

/// POST /api/orgs/{org}/projects
///
/// Registers a project and provisions its rate counter. The response carries
/// the generated API key.
pub async fn create_project(
    State(state): State<SharedState>,
    Path(org): Path<String>,
    Json(body): Json<NewProject>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let project = state.registry.create(&org, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "created",
            "project": project
        })),
    ))
}

/// GET /api/orgs/{org}/projects
pub async fn list_projects(
    State(state): State<SharedState>,
    Path(org): Path<String>,
) -> Json<Value> {
    let projects = state.registry.list_by_org(&org);
    Json(json!({
        "org": org,
        "total": projects.len(),
        "projects": projects
    }))
}

/// GET /api/orgs/{org}/projects/{slug}
///
/// The project together with its current counter, if one exists.
pub async fn get_project(
    State(state): State<SharedState>,
    Path((org, slug)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let project = state
        .registry
        .find_by_slug(&org, &slug)
        .ok_or_else(|| ApiError::not_found(format!("project '{}' not found in '{}'", slug, org)))?;

    let counter = match state.counters.get(project.id).await {
        Ok(counter) => Some(counter),
        Err(StoreError::NotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };

    Ok(Json(json!({
        "project": project,
        "counter": counter
    })))
}

/// PATCH /api/orgs/{org}/projects/{slug}
pub async fn update_project(
    State(state): State<SharedState>,
    Path((org, slug)): Path<(String, String)>,
    Json(body): Json<ProjectUpdate>,
) -> Result<Json<Value>, ApiError> {
    let project = state.registry.update(&org, &slug, body).await?;
    Ok(Json(json!({
        "status": "updated",
        "project": project
    })))
}

/// DELETE /api/orgs/{org}/projects/{slug}
pub async fn delete_project(
    State(state): State<SharedState>,
    Path((org, slug)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let project = state.registry.delete(&org, &slug).await?;
    Ok(Json(json!({
        "status": "deleted",
        "id": project.id,
        "slug": project.slug
    })))
}
