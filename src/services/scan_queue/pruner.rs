//! Periodic eviction of finished scan tasks past the retention window.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use super::ScanQueue;
use crate::services::manager::{Service, ServiceHealth};

pub struct HistoryPruner {
    queue: ScanQueue,
    interval: Duration,
    runtime: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl HistoryPruner {
    pub fn new(queue: ScanQueue) -> Self {
        let interval = queue.config().prune_interval;
        Self::with_interval(queue, interval)
    }

    pub fn with_interval(queue: ScanQueue, interval: Duration) -> Self {
        Self {
            queue,
            interval,
            runtime: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Service for HistoryPruner {
    fn name(&self) -> &str {
        "history_pruner"
    }

    async fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return Ok(());
        }
        info!(
            service = "history_pruner",
            interval_secs = self.interval.as_secs(),
            "History pruner starting"
        );
        let token = CancellationToken::new();
        let handle = tokio::spawn(prune_loop(
            self.queue.clone(),
            self.interval,
            token.clone(),
        ));
        *runtime = Some((token, handle));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let Some((token, handle)) = self.runtime.lock().take() else {
            return Ok(());
        };
        token.cancel();
        let _ = handle.await;
        info!(service = "history_pruner", "Stopped");
        Ok(())
    }

    async fn health(&self) -> Result<ServiceHealth> {
        Ok(match self.runtime.lock().as_ref() {
            Some((_, handle)) if !handle.is_finished() => ServiceHealth::healthy(),
            Some(_) => ServiceHealth::unhealthy("history pruner loop exited"),
            None => ServiceHealth::degraded("history pruner not started; pruning only on list"),
        })
    }
}

async fn prune_loop(queue: ScanQueue, every: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let pruned = queue.prune_history();
                trace!(service = "history_pruner", pruned, "History prune pass");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::scan_queue::{
        LibraryId, ManualClock, ScanOutcome, ScanPriority, ScanQueueConfig,
    };
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_pruner_evicts_on_timer() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = ScanQueue::with_clock(ScanQueueConfig::default(), clock.clone());
        let id = queue.submit(LibraryId(1), ScanPriority::Normal).unwrap();
        queue.begin_next().unwrap();
        queue.finish(id, Ok(ScanOutcome::default()));

        let pruner = HistoryPruner::with_interval(queue.clone(), Duration::from_secs(60));
        pruner.start().await.unwrap();
        clock.advance(ChronoDuration::hours(25));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(queue.get(id).is_err());

        pruner.stop().await.unwrap();
        assert!(!pruner.health().await.unwrap().is_healthy());
    }
}
