// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST surface: create/list/get/close a session, read its durable history,
//! and an unauthenticated liveness probe. Mirrors this
//! codebase's existing `transport::http::events::catchup_events` handler
//! shape (`Query` + `State` + `Json`), generalized from one implicit
//! session to an explicit `{id}` path segment.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::model::{Event, RunSession, SessionId, SessionKind, SessionStatus};
use crate::orchestrator::{CreateRequest, ListFilter};
use crate::transport::state::AppState;

/// Wraps [`DispatchError`] so handlers can return it directly as an axum
/// error type; converts to the same `{"error": {code, message}}` envelope
/// this codebase's `ErrorCode::to_http_response` has always produced.
pub struct ApiError(pub DispatchError);

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: ErrorBody { code: self.0.as_str().to_owned(), message: self.0.message() } };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    SessionId::parse(raw)
        .map_err(|_| ApiError(DispatchError::invalid_argument("invalid session id")))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub kind: String,
    pub owner_user_id: String,
    pub workspace_path: std::path::PathBuf,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub cols: Option<u16>,
    #[serde(default)]
    pub rows: Option<u16>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    #[serde(default)]
    pub argv: Option<Vec<String>>,
}

/// `POST /sessions` — create and launch a new run session.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSessionBody>,
) -> Result<(StatusCode, Json<RunSession>), ApiError> {
    let kind = SessionKind::parse(&body.kind)
        .ok_or_else(|| ApiError(DispatchError::invalid_argument(format!("unknown session kind: {}", body.kind))))?;

    let request = CreateRequest {
        kind,
        owner_user_id: body.owner_user_id,
        workspace_path: body.workspace_path,
        title: body.title,
        cols: body.cols,
        rows: body.rows,
        env: body.env,
        argv: body.argv,
    };

    let session = state.orchestrator.create(request).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub owner_user_id: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// `GET /sessions` — sessions owned by `owner_user_id`, optionally narrowed
/// by `kind`/`status`.
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RunSession>>, ApiError> {
    let kind = match &query.kind {
        Some(raw) => Some(
            SessionKind::parse(raw)
                .ok_or_else(|| ApiError(DispatchError::invalid_argument(format!("unknown session kind: {raw}"))))?,
        ),
        None => None,
    };
    let status = query.status.as_deref().map(parse_status).transpose()?;

    let sessions = state.orchestrator.list(&query.owner_user_id, ListFilter { kind, status }).await;
    Ok(Json(sessions))
}

fn parse_status(raw: &str) -> Result<SessionStatus, ApiError> {
    match raw {
        "starting" => Ok(SessionStatus::Starting),
        "running" => Ok(SessionStatus::Running),
        "idle" => Ok(SessionStatus::Idle),
        "error" => Ok(SessionStatus::Error),
        "closed" => Ok(SessionStatus::Closed),
        other => Err(ApiError(DispatchError::invalid_argument(format!("unknown session status: {other}")))),
    }
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub owner_user_id: String,
}

/// `GET /sessions/{id}` — a single session's current row, scoped to its
/// owner (`orchestrator::get` carries no identity; ownership is enforced
/// here instead, per the same pattern as `write`/`resize`/`close`).
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<RunSession>, ApiError> {
    let session_id = parse_session_id(&id)?;
    let session = state.orchestrator.get(&session_id).await?;
    if session.owner_user_id != query.owner_user_id {
        return Err(ApiError(DispatchError::NotAuthorized));
    }
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct CloseBody {
    pub owner_user_id: String,
}

/// `POST /sessions/{id}/close` — idempotent graceful close.
pub async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<CloseBody>,
) -> Result<StatusCode, ApiError> {
    let session_id = parse_session_id(&id)?;
    state.orchestrator.close(&session_id, &body.owner_user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub owner_user_id: String,
    #[serde(default)]
    pub after_seq: u64,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /sessions/{id}/events` — durable history strictly after `after_seq`.
/// Does not subscribe to live tail; callers that want live updates attach
/// over the WebSocket transport instead.
pub async fn session_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let session_id = parse_session_id(&id)?;
    let events = state.orchestrator.events(&session_id, &query.owner_user_id, query.after_seq, query.limit).await?;
    Ok(Json(events))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub session_count: usize,
}

/// `GET /healthz` — unauthenticated liveness probe.
pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(state.settings.started_at),
        session_count: state.orchestrator.session_count().await,
    })
}

fn uptime_secs(started_at: Instant) -> u64 {
    started_at.elapsed().as_secs()
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
