use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::pipeline::ScanOrchestrator;
use crate::errors::{RequestError, SubmitError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: ScanOrchestrator,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ScanRequest {
    pub url: String,
}

#[derive(Serialize, Deserialize)]
pub struct ScanAccepted {
    pub id: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Request(e) => ApiError::BadRequest(e.to_string()),
            e => {
                error!(error = %e, "Scan submission failed");
                ApiError::Internal(e.to_string())
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/scan", get(list_scans).post(submit_scan))
        .route("/scan/{id}", get(get_scan))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn submit_scan(
    State(state): State<SharedState>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|rejection| {
        ApiError::BadRequest(RequestError::InvalidBody(rejection.body_text()).to_string())
    })?;
    let id = state.orchestrator.submit(&req.url).await?;
    Ok(Json(ScanAccepted { id }))
}

async fn get_scan(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.get(&id).await.map_err(|e| {
        error!(job_id = %id, error = %e, "Failed to load scan");
        ApiError::Internal(e.to_string())
    })?;
    match job {
        Some(job) => Ok(Json(job)),
        None => Err(ApiError::NotFound(format!("scan {} not found", id))),
    }
}

async fn list_scans(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let ids = state.orchestrator.list().await.map_err(|e| {
        error!(error = %e, "Failed to list scans");
        ApiError::Internal(e.to_string())
    })?;
    Ok(Json(ids))
}
