//! Session history endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{parse_body, parse_id, AppState};
use crate::models::session::{Message, SessionSummary};
use crate::session::StopOutcome;
use crate::{AppError, Result};

/// Default page size for `GET /api/sessions/{id}`.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Query of `GET /api/sessions`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Only sessions bound to this project; unbound sessions when absent.
    pub project: Option<String>,
}

/// Response of `GET /api/sessions`.
#[derive(Debug, Serialize)]
pub struct SessionList {
    /// Number of listed sessions.
    pub total: usize,
    /// Summaries, newest first.
    pub sessions: Vec<SessionSummary>,
}

/// `GET /api/sessions?project=<id>`
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<SessionList> {
    let sessions = state
        .registry
        .history()
        .list(parse_id(query.project.as_deref()));
    Json(SessionList {
        total: sessions.len(),
        sessions,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    #[serde(default)]
    project_id: Option<u64>,
}

/// Response of `POST /api/sessions`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    /// Allocated id.
    pub id: u64,
    /// Always empty.
    pub messages: Vec<Message>,
    /// Requested project binding.
    pub project_id: Option<u64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Equal to `created_at`.
    pub updated_at: DateTime<Utc>,
}

/// `POST /api/sessions`
pub async fn create(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreatedSession>)> {
    let request: CreateRequest = parse_body(&body)?;
    let (id, record) = state.registry.create_history_only(request.project_id)?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedSession {
            id,
            messages: record.messages,
            project_id: record.project_id,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }),
    ))
}

/// Pagination of `GET /api/sessions/{id}`.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    /// Page size, default [`DEFAULT_PAGE_LIMIT`].
    pub limit: Option<String>,
    /// Index of the first message, default `0`.
    pub offset: Option<String>,
}

/// One page of a session's messages.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPage {
    /// Session id.
    pub id: u64,
    /// Messages in `[offset, offset + limit)`.
    pub messages: Vec<Message>,
    /// Total message count.
    pub total: usize,
    /// Applied offset.
    pub offset: usize,
    /// Applied limit.
    pub limit: usize,
    /// Whether messages exist past this page.
    pub has_more: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last activity timestamp.
    pub updated_at: DateTime<Utc>,
}

/// `GET /api/sessions/{id}?limit=50&offset=0`
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(page): Query<PageQuery>,
) -> Result<Json<SessionPage>> {
    let record = state
        .registry
        .history()
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;

    let limit = page
        .limit
        .as_deref()
        .and_then(|raw| raw.trim().parse().ok())
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_PAGE_LIMIT);
    let offset = page
        .offset
        .as_deref()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(0);

    let total = record.messages.len();
    let messages = record
        .messages
        .into_iter()
        .skip(offset)
        .take(limit)
        .collect();

    Ok(Json(SessionPage {
        id,
        messages,
        total,
        offset,
        limit,
        has_more: offset.saturating_add(limit) < total,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }))
}

/// `DELETE /api/sessions/{id}`
pub async fn delete(State(state): State<AppState>, Path(id): Path<u64>) -> Result<Json<Value>> {
    state.registry.delete(id)?;
    Ok(Json(json!({ "success": true })))
}

/// `POST /api/sessions/{id}/stop`. Always succeeds.
pub async fn stop(State(state): State<AppState>, Path(id): Path<u64>) -> Json<Value> {
    let message = match state.registry.stop(id) {
        StopOutcome::Stopped => "Session stopped",
        StopOutcome::NotRunning => "Session not running",
    };
    Json(json!({ "success": true, "message": message }))
}
