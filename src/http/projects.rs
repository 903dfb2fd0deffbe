//! Project CRUD endpoints.

use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_body, AppState};
use crate::models::project::Project;
use crate::persistence::ProjectUpdate;
use crate::{AppError, Result};

#[derive(Debug, Default, Deserialize)]
struct CreateRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    path: Option<PathBuf>,
}

/// `GET /api/projects`
pub async fn list(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "projects": state.projects.list() }))
}

/// `POST /api/projects`
pub async fn create(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Project>)> {
    let request: CreateRequest = parse_body(&body)?;
    let path = request
        .path
        .filter(|path| !path.as_os_str().is_empty())
        .ok_or_else(|| AppError::InvalidRequest("name and path are required".into()))?;
    let project = state.projects.create(&request.name, &path)?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// `PUT /api/projects/{id}`
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    body: Bytes,
) -> Result<Json<Project>> {
    let update: ProjectUpdate = parse_body(&body)?;
    Ok(Json(state.projects.update(id, update)?))
}

/// `DELETE /api/projects/{id}`
pub async fn delete(State(state): State<AppState>, Path(id): Path<u64>) -> Result<Json<Value>> {
    state.projects.delete(id)?;
    Ok(Json(json!({ "success": true })))
}
