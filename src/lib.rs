//! Library scan queue server
//!
//! Prioritized, deduplicated, cancellable background scans for a self-hosted
//! media library. See [services::scan_queue] for the queue itself.

pub mod api;
pub mod app;
pub mod config;
pub mod jobs;
pub mod services;

pub use app::AppState;
