//! Scan queue endpoints
//!
//! - `POST   /libraries/{id}/scan` - manual (High priority) scan request
//! - `GET    /scans?since=RFC3339` - recent and outstanding scans
//! - `GET    /scans/stats`         - queue counters
//! - `GET    /scans/{id}`          - one scan
//! - `DELETE /scans/{id}`          - cancel a scan

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::PathRejection},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app::AppState;
use crate::services::scan_queue::{
    LibraryId, QueueError, QueueStats, ScanPriority, ScanTask, TaskId,
};

#[derive(Debug, Deserialize)]
pub struct ListScansQuery {
    /// Only include finished scans completed at or after this instant
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitScanResponse {
    pub task_id: TaskId,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn queue_error(err: QueueError) -> ApiError {
    let code = match err {
        QueueError::NotFound(_) => StatusCode::NOT_FOUND,
        QueueError::AlreadyTerminal { .. } => StatusCode::CONFLICT,
        QueueError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        code,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

/// Malformed ids get the same JSON error shape as every other failure.
fn parse_task_id(path: Result<Path<TaskId>, PathRejection>) -> Result<TaskId, ApiError> {
    path.map(|Path(id)| id).map_err(|rejection| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: rejection.body_text(),
            }),
        )
    })
}

/// Queue a manual scan of a library
async fn submit_scan(
    State(state): State<AppState>,
    Path(library_id): Path<i64>,
) -> Result<(StatusCode, Json<SubmitScanResponse>), ApiError> {
    let task_id = state
        .queue
        .submit(LibraryId(library_id), ScanPriority::High)
        .map_err(queue_error)?;
    debug!(library_id, task_id = %task_id, "Manual scan requested");
    Ok((StatusCode::ACCEPTED, Json(SubmitScanResponse { task_id })))
}

/// List outstanding scans and recent history, newest first
async fn list_scans(
    State(state): State<AppState>,
    Query(query): Query<ListScansQuery>,
) -> Json<Vec<ScanTask>> {
    Json(state.queue.list(query.since))
}

async fn get_scan(
    State(state): State<AppState>,
    id: Result<Path<TaskId>, PathRejection>,
) -> Result<Json<ScanTask>, ApiError> {
    state.queue.get(parse_task_id(id)?).map(Json).map_err(queue_error)
}

/// Cancel a scan. Running scans stop cooperatively, so poll `GET /scans/{id}`
/// to see the final status.
async fn cancel_scan(
    State(state): State<AppState>,
    id: Result<Path<TaskId>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    state.queue.cancel(parse_task_id(id)?).map_err(queue_error)?;
    Ok(StatusCode::ACCEPTED)
}

async fn scan_stats(State(state): State<AppState>) -> Json<QueueStats> {
    Json(state.queue.stats())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/libraries/{id}/scan", post(submit_scan))
        .route("/scans", get(list_scans))
        .route("/scans/stats", get(scan_stats))
        .route("/scans/{id}", get(get_scan).delete(cancel_scan))
}
