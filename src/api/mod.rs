//! API route definitions
//!
//! REST endpoints for the scan queue live under /api. Health checks are
//! mounted at the root.

pub mod health;
pub mod scans;

use axum::Router;

use crate::app::AppState;

/// All /api routes.
pub fn router() -> Router<AppState> {
    Router::new().merge(scans::router())
}
