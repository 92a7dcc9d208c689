//! Coordinator HTTP Routes
//!
//! REST endpoints for the coordinator verbs. The `{id}` path position
//! accepts either a full percent-encoded LRA URI or a bare uid; both are
//! reduced to the uid before hitting the engine.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::engine::{Coordinator, CoordinatorError, EnlistSource};
use crate::id::encode_uri_component;
use crate::lra::{LraData, LRA_RECOVERY_HEADER};

use super::errors::ApiError;

// ==================
// Shared State
// ==================

/// Coordinator state shared across handlers
pub struct CoordinatorState {
    pub coordinator: Arc<Coordinator>,
}

impl CoordinatorState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }
}

// ==================
// Query Parameters
// ==================

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(rename = "Status")]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartParams {
    #[serde(rename = "ClientID")]
    client_id: Option<String>,
    #[serde(rename = "TimeLimit")]
    time_limit: Option<i64>,
    #[serde(rename = "ParentLRA")]
    parent_lra: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TimeLimitParam {
    #[serde(rename = "TimeLimit")]
    time_limit: Option<i64>,
}

// ==================
// Router
// ==================

/// Create coordinator routes
pub fn coordinator_routes(state: Arc<CoordinatorState>) -> Router {
    Router::new()
        .route("/", get(list_lras_handler))
        .route("/start", post(start_lra_handler))
        .route("/recovery", get(recovery_handler))
        .route("/{id}", get(get_info_handler))
        .route("/{id}", put(join_handler))
        .route("/{id}/status", get(get_status_handler))
        .route("/{id}/close", put(close_handler))
        .route("/{id}/cancel", put(cancel_handler))
        .route("/{id}/renew", put(renew_handler))
        .route("/{id}/remove", put(leave_handler))
        .with_state(state)
}

// ==================
// Handlers
// ==================

async fn list_lras_handler(
    State(state): State<Arc<CoordinatorState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<LraData>>, ApiError> {
    let lras = state
        .coordinator
        .list_lras(params.status.as_deref())
        .await?;
    Ok(Json(lras))
}

async fn get_info_handler(
    State(state): State<Arc<CoordinatorState>>,
    Path(id): Path<String>,
) -> Result<Json<LraData>, ApiError> {
    let info = state.coordinator.get_info(&id).await?;
    Ok(Json(info))
}

async fn get_status_handler(
    State(state): State<Arc<CoordinatorState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let status = state.coordinator.get_status(&id).await?;
    if wants_json(&headers) {
        Ok(Json(status).into_response())
    } else {
        Ok(status.as_str().into_response())
    }
}

async fn start_lra_handler(
    State(state): State<Arc<CoordinatorState>>,
    Query(params): Query<StartParams>,
) -> Result<Response, ApiError> {
    let client_id = params.client_id.unwrap_or_default();
    let time_limit = params.time_limit.unwrap_or(0);
    let lra_id = state
        .coordinator
        .start_lra(&client_id, time_limit, params.parent_lra.as_deref())
        .await?;

    // Nested ids advertise their parent in the Location they are
    // reachable under.
    let location = match &params.parent_lra {
        Some(parent) if !parent.trim().is_empty() => format!(
            "{}?ParentLRA={}",
            lra_id.as_str(),
            encode_uri_component(parent)
        ),
        _ => lra_id.as_str().to_string(),
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) = location.parse() {
        headers.insert(header::LOCATION, value);
    }
    Ok((StatusCode::CREATED, headers, lra_id.as_str().to_string()).into_response())
}

async fn renew_handler(
    State(state): State<Arc<CoordinatorState>>,
    Path(id): Path<String>,
    Query(params): Query<TimeLimitParam>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .renew(&id, params.time_limit.unwrap_or(0))
        .await?;
    Ok(StatusCode::OK)
}

async fn close_handler(
    State(state): State<Arc<CoordinatorState>>,
    Path(id): Path<String>,
) -> Result<String, ApiError> {
    let status = state.coordinator.close(&id).await?;
    Ok(status.as_str().to_string())
}

async fn cancel_handler(
    State(state): State<Arc<CoordinatorState>>,
    Path(id): Path<String>,
) -> Result<String, ApiError> {
    let status = state.coordinator.cancel(&id).await?;
    Ok(status.as_str().to_string())
}

async fn join_handler(
    State(state): State<Arc<CoordinatorState>>,
    Path(id): Path<String>,
    Query(params): Query<TimeLimitParam>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, ApiError> {
    // A Link header wins over the body; the body then carries the
    // participant's opaque payload. Without a Link header the body is the
    // base URI to derive endpoints from.
    let (source, user_data) = match headers.get(header::LINK).and_then(|v| v.to_str().ok()) {
        Some(link) => (
            EnlistSource::Link(link.to_string()),
            (!body.is_empty()).then_some(body),
        ),
        None => (EnlistSource::Body(body), None),
    };

    let recovery = state
        .coordinator
        .join(&id, source, params.time_limit.unwrap_or(0), user_data)
        .await?;

    let mut response_headers = HeaderMap::new();
    if let Ok(value) = recovery.as_str().parse() {
        response_headers.insert(header::LOCATION, value);
    }
    let recovery_header = HeaderName::from_bytes(LRA_RECOVERY_HEADER.as_bytes());
    if let (Ok(name), Ok(value)) = (recovery_header, recovery.as_str().parse()) {
        response_headers.insert(name, value);
    }
    Ok((StatusCode::OK, response_headers, recovery.as_str().to_string()).into_response())
}

async fn leave_handler(
    State(state): State<Arc<CoordinatorState>>,
    Path(id): Path<String>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let participant = body.trim();
    if participant.is_empty() {
        return Err(ApiError(CoordinatorError::UnknownParticipant(
            "empty participant URL".to_string(),
        )));
    }
    state.coordinator.leave(&id, participant).await?;
    Ok(StatusCode::OK)
}

async fn recovery_handler(
    State(state): State<Arc<CoordinatorState>>,
) -> Json<Vec<String>> {
    Json(state.coordinator.recovering_ids().await)
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"))
}
