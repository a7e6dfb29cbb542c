//! Scan worker: the single consumer of the scan queue.
//!
//! Implements [Service](crate::services::manager::Service). Pops the next
//! pending task, runs the executor on its own tokio task (so panics are
//! contained), and finalizes the result. One scan at a time.

use std::any::Any;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::error::ScanError;
use super::executor::{ScanContext, ScanExecutor};
use super::task::TaskStatus;
use super::{ActiveScan, ScanQueue};
use crate::services::manager::{Service, ServiceHealth};

struct WorkerRuntime {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background service that drains a [ScanQueue].
pub struct ScanWorker {
    queue: ScanQueue,
    executor: Arc<dyn ScanExecutor>,
    runtime: Mutex<Option<WorkerRuntime>>,
}

impl ScanWorker {
    /// Create the worker. Nothing runs until [Service::start] is called.
    pub fn new(queue: ScanQueue, executor: Arc<dyn ScanExecutor>) -> Self {
        Self {
            queue,
            executor,
            runtime: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &ScanQueue {
        &self.queue
    }
}

#[async_trait]
impl Service for ScanWorker {
    fn name(&self) -> &str {
        "scan_worker"
    }

    async fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            return Ok(());
        }
        info!(service = "scan_worker", "Scan worker starting");

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(worker_loop(
            self.queue.clone(),
            Arc::clone(&self.executor),
            cancel_token.clone(),
        ));
        *runtime = Some(WorkerRuntime {
            cancel_token,
            handle,
        });
        Ok(())
    }

    /// Ask the running scan (if any) to stop, then wait for the loop to exit.
    /// Pending tasks stay pending.
    async fn stop(&self) -> Result<()> {
        let Some(runtime) = self.runtime.lock().take() else {
            return Ok(());
        };
        runtime.cancel_token.cancel();
        if let Some(task_id) = self.queue.cancel_running() {
            info!(service = "scan_worker", task_id = %task_id, "Waiting for running scan to stop");
        }
        if let Err(e) = runtime.handle.await {
            warn!(service = "scan_worker", error = %e, "Scan worker loop ended abnormally");
        }
        info!(service = "scan_worker", "Stopped");
        Ok(())
    }

    async fn health(&self) -> Result<ServiceHealth> {
        let runtime = self.runtime.lock();
        Ok(match runtime.as_ref() {
            Some(rt) if !rt.handle.is_finished() => ServiceHealth::healthy(),
            Some(_) => ServiceHealth::unhealthy("scan worker loop exited"),
            None => ServiceHealth::unhealthy("scan worker not started"),
        })
    }
}

async fn worker_loop(
    queue: ScanQueue,
    executor: Arc<dyn ScanExecutor>,
    shutdown: CancellationToken,
) {
    info!(service = "scan_worker", "Scan worker loop started");
    loop {
        let scan = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            scan = queue.next_scan() => scan,
        };
        flag_if_shutting_down(&queue, &scan, &shutdown);
        run_scan(&queue, &executor, scan).await;
    }
    info!(service = "scan_worker", "Scan worker loop stopped");
}

/// A scan started while `stop` was looking for the running one is not seen by
/// `cancel_running`; cancel it here so shutdown does not wait out a full scan.
fn flag_if_shutting_down(queue: &ScanQueue, scan: &ActiveScan, shutdown: &CancellationToken) {
    if shutdown.is_cancelled() && queue.cancel(scan.task_id).is_ok() {
        info!(
            service = "scan_worker",
            task_id = %scan.task_id,
            "Scan started during shutdown, cancelling"
        );
    }
}

/// Execute one started scan and record its terminal state.
pub(crate) async fn run_scan(
    queue: &ScanQueue,
    executor: &Arc<dyn ScanExecutor>,
    scan: ActiveScan,
) -> Option<TaskStatus> {
    let ctx = ScanContext::new(scan.task_id, queue.clone(), scan.signal.clone());
    let executor = Arc::clone(executor);
    let library_id = scan.library_id;
    let mut handle = tokio::spawn(async move { executor.execute(library_id, ctx).await });

    let joined = match queue.config().scan_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    task_id = %scan.task_id,
                    library_id = %library_id,
                    timeout_secs = limit.as_secs(),
                    "Scan exceeded its time limit, cancelling"
                );
                scan.signal.raise();
                let grace = queue.config().cancel_grace;
                if tokio::time::timeout(grace, &mut handle).await.is_err() {
                    warn!(
                        task_id = %scan.task_id,
                        library_id = %library_id,
                        grace_secs = grace.as_secs(),
                        "Scan ignored cancellation, aborting"
                    );
                    handle.abort();
                    let _ = handle.await;
                }
                return queue.finish(scan.task_id, Err(ScanError::Timeout(limit)));
            }
        },
        None => handle.await,
    };

    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            error!(
                task_id = %scan.task_id,
                library_id = %library_id,
                panic = %message,
                "Scan executor panicked"
            );
            Err(ScanError::Panicked(message))
        }
        Err(e) => Err(ScanError::other(format!("scan task aborted: {e}"))),
    };
    queue.finish(scan.task_id, outcome)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::scan_queue::{
        LibraryId, ScanOutcome, ScanPriority, ScanQueueConfig, executor_fn,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn executor<F, Fut>(f: F) -> Arc<dyn ScanExecutor>
    where
        F: Fn(LibraryId, ScanContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<ScanOutcome, ScanError>> + Send + 'static,
    {
        Arc::new(executor_fn(f))
    }

    #[tokio::test]
    async fn test_run_scan_completes_with_outcome() {
        let queue = ScanQueue::new(ScanQueueConfig::default());
        let id = queue.submit(LibraryId(7), ScanPriority::Normal).unwrap();
        let exec = executor(|_, ctx: ScanContext| async move {
            ctx.report_progress(1, 1);
            Ok::<_, ScanError>(ScanOutcome {
                added_count: 1,
                removed_count: 0,
                failed_scrape_count: 0,
            })
        });

        let scan = queue.begin_next().unwrap();
        assert_eq!(run_scan(&queue, &exec, scan).await, Some(TaskStatus::Completed));

        let task = queue.get(id).unwrap();
        assert_eq!(task.result.map(|r| r.added_count), Some(1));
        assert!(task.started_at.is_some());
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_panicking_executor_fails_task() {
        let queue = ScanQueue::new(ScanQueueConfig::default());
        let id = queue.submit(LibraryId(1), ScanPriority::Normal).unwrap();
        let exec = executor(|_, _| async move {
            if true {
                panic!("corrupt archive header");
            }
            Ok::<_, ScanError>(ScanOutcome::default())
        });

        let scan = queue.begin_next().unwrap();
        assert_eq!(run_scan(&queue, &exec, scan).await, Some(TaskStatus::Failed));
        let error = queue.get(id).unwrap().error.unwrap();
        assert!(error.contains("corrupt archive header"), "{error}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_task_and_signals_executor() {
        let config = ScanQueueConfig {
            scan_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let queue = ScanQueue::new(config);
        let id = queue.submit(LibraryId(1), ScanPriority::Normal).unwrap();
        let exec = executor(|_, _| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ScanError>(ScanOutcome::default())
        });

        let scan = queue.begin_next().unwrap();
        let signal = scan.signal.clone();
        assert_eq!(run_scan(&queue, &exec, scan).await, Some(TaskStatus::Failed));
        assert!(signal.is_raised());
        assert_eq!(
            queue.get(id).unwrap().error.as_deref(),
            Some("scan timed out after 5s")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_lets_cooperative_executor_unwind() {
        let config = ScanQueueConfig {
            scan_timeout: Some(Duration::from_secs(5)),
            cancel_grace: Duration::from_secs(10),
            ..Default::default()
        };
        let queue = ScanQueue::new(config);
        let id = queue.submit(LibraryId(1), ScanPriority::Normal).unwrap();

        let unwound = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&unwound);
        let exec = executor(move |_, ctx: ScanContext| {
            let seen = Arc::clone(&seen);
            async move {
                while !ctx.is_cancelled() {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                seen.store(true, Ordering::SeqCst);
                Ok::<_, ScanError>(ScanOutcome::default())
            }
        });

        let scan = queue.begin_next().unwrap();
        assert_eq!(run_scan(&queue, &exec, scan).await, Some(TaskStatus::Failed));
        assert!(unwound.load(Ordering::SeqCst));
        assert_eq!(
            queue.get(id).unwrap().error.as_deref(),
            Some("scan timed out after 5s")
        );
    }

    #[test]
    fn test_scan_started_during_shutdown_is_cancelled() {
        let queue = ScanQueue::new(ScanQueueConfig::default());
        let id = queue.submit(LibraryId(3), ScanPriority::Normal).unwrap();
        let shutdown = CancellationToken::new();

        let scan = queue.begin_next().unwrap();
        flag_if_shutting_down(&queue, &scan, &shutdown);
        assert!(!scan.signal.is_raised());

        shutdown.cancel();
        flag_if_shutting_down(&queue, &scan, &shutdown);
        assert!(scan.signal.is_raised());
        assert_eq!(
            queue.finish(id, Ok(ScanOutcome::default())),
            Some(TaskStatus::Cancelled)
        );
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42_u8)), "unknown panic");
    }
}
