//! Health check endpoints

use std::collections::HashMap;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use crate::app::AppState;
use crate::services::manager::{HealthStatus, ServiceHealth};
use crate::services::scan_queue::QueueStats;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub queue: QueueStats,
    pub services: HashMap<String, ServiceHealth>,
}

/// Health check - always returns OK if the server is running
async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Readiness check - the queue accepts work and no service is unhealthy
async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let services = state.services.health_all().await;
    let queue = state.queue.stats();
    let ready = queue.accepting
        && services
            .values()
            .all(|h| h.status != HealthStatus::Unhealthy);

    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(ReadyResponse {
            ready,
            queue,
            services,
        }),
    )
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
