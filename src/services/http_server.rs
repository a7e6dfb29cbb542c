//! HTTP server service: binds the Axum app and runs it in a background task.
//!
//! Depends on the scan worker so that nothing is accepted over HTTP before
//! queued scans can be drained. Serves until [stop](Service::stop).

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::app::{AppState, build_app};
use crate::services::manager::{Service, ServiceHealth};

/// HTTP server service: binds and serves the Axum app in a background task.
pub struct HttpServerService {
    state: AppState,
    /// JoinHandle for the server task; set in start(), taken in stop().
    join_handle: RwLock<Option<JoinHandle<Result<()>>>>,
    /// Fires graceful shutdown; set in start(), taken in stop().
    shutdown_tx: RwLock<Option<oneshot::Sender<()>>>,
}

impl HttpServerService {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            join_handle: RwLock::new(None),
            shutdown_tx: RwLock::new(None),
        }
    }
}

#[async_trait]
impl Service for HttpServerService {
    fn name(&self) -> &str {
        "http"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["scan_worker".to_string()]
    }

    async fn start(&self) -> Result<()> {
        if self.join_handle.read().is_some() {
            return Ok(());
        }
        info!(service = "http", "HTTP server service starting");

        let addr = self.state.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("HTTP server: bind {addr} failed"))?;

        let app = build_app(self.state.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .context("axum::serve")
        });

        *self.join_handle.write() = Some(join);
        *self.shutdown_tx.write() = Some(shutdown_tx);

        info!(service = "http", "Listening on http://{}", addr);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let tx = self.shutdown_tx.write().take();
        let handle = self.join_handle.write().take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
        if let Some(h) = handle {
            match h.await {
                Ok(Err(e)) => warn!(service = "http", error = %e, "HTTP server exited with error"),
                Err(e) => warn!(service = "http", error = %e, "HTTP server task failed"),
                Ok(Ok(())) => {}
            }
        }
        info!(service = "http", "HTTP server service stopped");
        Ok(())
    }

    async fn health(&self) -> Result<ServiceHealth> {
        Ok(match self.join_handle.read().as_ref() {
            Some(h) if !h.is_finished() => ServiceHealth::healthy(),
            _ => ServiceHealth::unhealthy("server task not running"),
        })
    }
}
