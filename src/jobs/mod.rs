//! Scheduled background jobs
//!
//! The periodic library scan: on every tick of the cron schedule, each
//! registered library gets a `Normal` priority scan submitted to the queue.
//! Libraries that already have an outstanding scan collapse into it.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};

use crate::services::manager::{Service, ServiceHealth};
use crate::services::scan_queue::{LibraryId, QueueError, ScanPriority, ScanQueue, TaskId};

/// Submit a scheduled scan for every library. Returns the task ids in library order.
pub fn submit_scheduled_scans(queue: &ScanQueue, libraries: &[LibraryId]) -> Vec<TaskId> {
    let mut submitted = Vec::with_capacity(libraries.len());
    for &library_id in libraries {
        match queue.submit(library_id, ScanPriority::Normal) {
            Ok(task_id) => {
                debug!(library_id = %library_id, task_id = %task_id, "Scheduled scan submitted");
                submitted.push(task_id);
            }
            Err(QueueError::ShuttingDown) => {
                debug!("Scan queue closed, skipping scheduled scans");
                break;
            }
            Err(e) => warn!(library_id = %library_id, error = %e, "Scheduled scan rejected"),
        }
    }
    submitted
}

/// Cron-driven trigger for periodic library scans.
pub struct ScanScheduler {
    queue: ScanQueue,
    libraries: Arc<Vec<LibraryId>>,
    schedule: String,
    scheduler: Mutex<Option<JobScheduler>>,
}

impl ScanScheduler {
    pub fn new(queue: ScanQueue, libraries: Vec<LibraryId>, schedule: impl Into<String>) -> Self {
        Self {
            queue,
            libraries: Arc::new(libraries),
            schedule: schedule.into(),
            scheduler: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Service for ScanScheduler {
    fn name(&self) -> &str {
        "scan_scheduler"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["scan_worker".to_string()]
    }

    async fn start(&self) -> Result<()> {
        let mut guard = self.scheduler.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let scheduler = JobScheduler::new()
            .await
            .context("failed to create job scheduler")?;

        // Library scanner - Normal priority on every tick
        let queue = self.queue.clone();
        let libraries = Arc::clone(&self.libraries);
        let scan_job = Job::new_async(self.schedule.as_str(), move |_uuid, _l| {
            let queue = queue.clone();
            let libraries = Arc::clone(&libraries);
            Box::pin(async move {
                info!(libraries = libraries.len(), "Running scheduled library scans");
                submit_scheduled_scans(&queue, &libraries);
            })
        })
        .with_context(|| format!("invalid scan schedule {:?}", self.schedule))?;
        scheduler.add(scan_job).await?;
        scheduler.start().await?;

        info!(
            service = "scan_scheduler",
            schedule = %self.schedule,
            libraries = self.libraries.len(),
            "Scan scheduler started"
        );
        *guard = Some(scheduler);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some(mut scheduler) = self.scheduler.lock().await.take() else {
            return Ok(());
        };
        if let Err(e) = scheduler.shutdown().await {
            warn!(service = "scan_scheduler", error = %e, "Job scheduler shutdown failed");
        }
        info!(service = "scan_scheduler", "Stopped");
        Ok(())
    }

    async fn health(&self) -> Result<ServiceHealth> {
        Ok(if self.scheduler.lock().await.is_some() {
            ServiceHealth::healthy()
        } else {
            ServiceHealth::unhealthy("scan scheduler not running")
        })
    }
}
