//! Library scan queue
//!
//! Turns "scan this library" requests into prioritized, deduplicated,
//! cancellable background work. A single [ScanWorker] drains the queue one
//! scan at a time through a [ScanExecutor]; task status and recent history
//! stay queryable through [ScanQueue::get] and [ScanQueue::list].
//!
//! All mutable state (task store and pending order) sits behind one mutex.
//! The executor runs outside it, so submissions and queries stay responsive
//! while a scan is in flight.

pub mod clock;
pub mod error;
pub mod events;
pub mod executor;
mod priority;
pub mod pruner;
mod store;
pub mod task;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Notify, broadcast};
use tracing::{debug, error, info, trace, warn};

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{QueueError, ScanError};
pub use events::ScanTaskEvent;
pub use executor::{CancelFlag, ExecutorFn, ScanContext, ScanExecutor, executor_fn};
pub use pruner::HistoryPruner;
pub use task::{
    LibraryId, ScanOutcome, ScanPriority, ScanProgress, ScanTask, TaskId, TaskStatus,
};
pub use worker::ScanWorker;

use priority::PriorityQueue;
use store::{TaskRecord, TaskStore};

/// Tuning for the scan queue and its background services.
#[derive(Debug, Clone)]
pub struct ScanQueueConfig {
    /// How long finished tasks stay visible before they may be evicted.
    pub history_retention: Duration,
    /// How often the history pruner runs.
    pub prune_interval: Duration,
    /// Upper bound on a single scan. `None` lets scans run indefinitely.
    pub scan_timeout: Option<Duration>,
    /// After a timeout, how long the executor gets to notice the cancel flag
    /// before its task is aborted.
    pub cancel_grace: Duration,
    /// Capacity of the lifecycle event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ScanQueueConfig {
    fn default() -> Self {
        Self {
            history_retention: Duration::from_secs(24 * 60 * 60),
            prune_interval: Duration::from_secs(300),
            scan_timeout: None,
            cancel_grace: Duration::from_secs(10),
            event_capacity: 256,
        }
    }
}

/// Point-in-time counters for health output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: Option<TaskId>,
    pub retained: usize,
    pub accepting: bool,
}

/// A task the worker has just moved to Running.
#[derive(Debug, Clone)]
pub(crate) struct ActiveScan {
    pub task_id: TaskId,
    pub library_id: LibraryId,
    pub signal: CancelFlag,
}

struct QueueState {
    store: TaskStore,
    pending: PriorityQueue,
    closed: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    wake: Notify,
    clock: Arc<dyn Clock>,
    config: ScanQueueConfig,
    events: broadcast::Sender<ScanTaskEvent>,
}

/// Front door of the scan queue. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct ScanQueue {
    inner: Arc<Inner>,
}

impl ScanQueue {
    pub fn new(config: ScanQueueConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: ScanQueueConfig, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    store: TaskStore::new(),
                    pending: PriorityQueue::new(),
                    closed: false,
                }),
                wake: Notify::new(),
                clock,
                config,
                events,
            }),
        }
    }

    pub fn config(&self) -> &ScanQueueConfig {
        &self.inner.config
    }

    /// Subscribe to task lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanTaskEvent> {
        self.inner.events.subscribe()
    }

    /// Request a scan of `library_id`.
    ///
    /// If the library already has a pending task its id is returned, and its
    /// priority is raised if `priority` is higher. A running task's id is
    /// returned unchanged. Otherwise a new pending task is queued.
    pub fn submit(
        &self,
        library_id: LibraryId,
        priority: ScanPriority,
    ) -> Result<TaskId, QueueError> {
        let now = self.now();
        let (id, event) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(QueueError::ShuttingDown);
            }
            let QueueState { store, pending, .. } = &mut *state;

            if let Some(record) = store.active_for_mut(library_id) {
                let task = &mut record.task;
                if task.status == TaskStatus::Pending && priority > task.priority {
                    task.priority = priority;
                    pending.reprioritize(task.id, priority);
                    info!(
                        task_id = %task.id,
                        library_id = %library_id,
                        priority = ?priority,
                        "Raised priority of pending scan"
                    );
                    let event = ScanTaskEvent::PriorityRaised {
                        task_id: task.id,
                        library_id,
                        priority,
                    };
                    (task.id, Some(event))
                } else {
                    debug!(
                        task_id = %task.id,
                        library_id = %library_id,
                        status = %task.status,
                        "Scan already outstanding for library"
                    );
                    (task.id, None)
                }
            } else {
                let task = ScanTask::pending(library_id, priority, now);
                let id = task.id;
                pending.push(id, priority, now);
                store.insert(TaskRecord::new(task));
                info!(
                    task_id = %id,
                    library_id = %library_id,
                    priority = ?priority,
                    "Scan queued"
                );
                let event = ScanTaskEvent::Queued {
                    task_id: id,
                    library_id,
                    priority,
                };
                (id, Some(event))
            }
        };

        if let Some(event) = event {
            if matches!(event, ScanTaskEvent::Queued { .. }) {
                self.inner.wake.notify_one();
            }
            self.emit(event);
        }
        Ok(id)
    }

    /// Snapshot of a task, or `NotFound` for unknown or pruned ids.
    pub fn get(&self, id: TaskId) -> Result<ScanTask, QueueError> {
        self.inner
            .state
            .lock()
            .store
            .get(id)
            .map(|record| record.task.clone())
            .ok_or(QueueError::NotFound(id))
    }

    /// Pending and running tasks plus tasks finished within the retention
    /// window (narrowed further by `since`), newest-created first.
    ///
    /// Expired history is pruned before the listing is taken.
    pub fn list(&self, since: Option<DateTime<Utc>>) -> Vec<ScanTask> {
        let cutoff = self.retention_cutoff(self.now());
        let window = since.map_or(cutoff, |since| since.max(cutoff));

        let mut tasks: Vec<(u64, ScanTask)> = {
            let mut state = self.inner.state.lock();
            let pruned = state.store.prune(cutoff);
            if pruned > 0 {
                debug!(pruned, "Pruned scan history");
            }
            state
                .store
                .iter()
                .filter(|r| {
                    r.task.status.is_active()
                        || r.task.completed_at.is_some_and(|at| at >= window)
                })
                .map(|r| (r.seq, r.task.clone()))
                .collect()
        };

        tasks.sort_by(|(a_seq, a), (b_seq, b)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b_seq.cmp(a_seq))
        });
        tasks.into_iter().map(|(_, task)| task).collect()
    }

    /// Cancel a task.
    ///
    /// A pending task becomes Cancelled immediately. A running task only has
    /// cancellation requested; the worker finalizes it once the executor
    /// returns. Finished tasks are rejected with `AlreadyTerminal`.
    pub fn cancel(&self, id: TaskId) -> Result<(), QueueError> {
        let now = self.now();
        let event = {
            let mut state = self.inner.state.lock();
            let QueueState { store, pending, .. } = &mut *state;
            let record = store.get_mut(id).ok_or(QueueError::NotFound(id))?;
            let library_id = record.task.library_id;
            let status = record.task.status;

            match status {
                TaskStatus::Pending => {
                    pending.remove(id);
                    record.task.status = TaskStatus::Cancelled;
                    record.task.completed_at = Some(now);
                    store.release(library_id, id);
                    info!(task_id = %id, library_id = %library_id, "Pending scan cancelled");
                    Some(ScanTaskEvent::Finished {
                        task_id: id,
                        library_id,
                        status: TaskStatus::Cancelled,
                    })
                }
                TaskStatus::Running => {
                    record.cancel_requested = true;
                    record.signal.raise();
                    info!(
                        task_id = %id,
                        library_id = %library_id,
                        "Cancellation requested for running scan"
                    );
                    None
                }
                status => return Err(QueueError::AlreadyTerminal { id, status }),
            }
        };

        if let Some(event) = event {
            self.emit(event);
        }
        Ok(())
    }

    /// Evict finished tasks older than the retention window.
    pub fn prune_history(&self) -> usize {
        let cutoff = self.retention_cutoff(self.now());
        let pruned = self.inner.state.lock().store.prune(cutoff);
        if pruned > 0 {
            debug!(pruned, "Pruned scan history");
        }
        pruned
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            pending: state.pending.len(),
            running: state.store.running().map(|r| r.task.id),
            retained: state.store.len(),
            accepting: !state.closed,
        }
    }

    /// Stop accepting submissions. Queries and cancellation keep working.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if !state.closed {
            state.closed = true;
            info!(pending = state.pending.len(), "Scan queue closed to new submissions");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Request cooperative cancellation of the running scan, if any.
    pub fn cancel_running(&self) -> Option<TaskId> {
        let id = self.inner.state.lock().store.running().map(|r| r.task.id)?;
        match self.cancel(id) {
            Ok(()) => Some(id),
            // Finished between the lookup and the cancel.
            Err(_) => None,
        }
    }

    // -------------------------------------------------------------------------
    // Worker-facing transitions
    // -------------------------------------------------------------------------

    /// Pop the next pending task and mark it Running in one critical section.
    pub(crate) fn begin_next(&self) -> Option<ActiveScan> {
        let now = self.now();
        let mut rejected = Vec::new();
        let started = {
            let mut state = self.inner.state.lock();
            let QueueState { store, pending, .. } = &mut *state;
            loop {
                let Some(id) = pending.pop() else {
                    break None;
                };
                let Some(library_id) = store.get(id).map(|r| r.task.library_id) else {
                    warn!(task_id = %id, "Queued scan has no task record, skipping");
                    continue;
                };

                let conflict = store.running_conflict(library_id, id);
                debug_assert!(
                    conflict.is_none(),
                    "library {library_id} already has a running scan"
                );
                if let Some(running_id) = conflict {
                    error!(
                        task_id = %id,
                        running_task_id = %running_id,
                        library_id = %library_id,
                        "Refusing to start a second scan for library"
                    );
                    if let Some(record) = store.get_mut(id) {
                        record.task.status = TaskStatus::Failed;
                        record.task.completed_at = Some(now);
                        record.task.error =
                            Some(format!("library {library_id} already has a running scan"));
                    }
                    store.release(library_id, id);
                    rejected.push((id, library_id));
                    continue;
                }

                let Some(record) = store.get_mut(id) else {
                    continue;
                };
                record.task.status = TaskStatus::Running;
                record.task.started_at = Some(now);
                break Some(ActiveScan {
                    task_id: id,
                    library_id,
                    signal: record.signal.clone(),
                });
            }
        };

        for (task_id, library_id) in rejected {
            self.emit(ScanTaskEvent::Finished {
                task_id,
                library_id,
                status: TaskStatus::Failed,
            });
        }
        if let Some(scan) = &started {
            info!(task_id = %scan.task_id, library_id = %scan.library_id, "Scan started");
            self.emit(ScanTaskEvent::Started {
                task_id: scan.task_id,
                library_id: scan.library_id,
            });
        }
        started
    }

    /// Wait until a pending task can be started, then start it.
    pub(crate) async fn next_scan(&self) -> ActiveScan {
        loop {
            if let Some(scan) = self.begin_next() {
                return scan;
            }
            self.inner.wake.notified().await;
        }
    }

    pub(crate) fn record_progress(&self, id: TaskId, progress: ScanProgress) {
        let library_id = {
            let mut state = self.inner.state.lock();
            match state.store.get_mut(id) {
                Some(record) if record.task.status == TaskStatus::Running => {
                    record.task.progress = Some(progress);
                    record.task.library_id
                }
                _ => {
                    trace!(task_id = %id, "Ignoring progress for scan that is not running");
                    return;
                }
            }
        };
        self.emit(ScanTaskEvent::Progress {
            task_id: id,
            library_id,
            progress,
        });
    }

    /// Move a running task to its terminal state.
    ///
    /// A requested cancellation wins over whatever the executor returned.
    pub(crate) fn finish(
        &self,
        id: TaskId,
        outcome: Result<ScanOutcome, ScanError>,
    ) -> Option<TaskStatus> {
        let now = self.now();
        let (library_id, status) = {
            let mut state = self.inner.state.lock();
            let store = &mut state.store;
            let record = store.get_mut(id)?;
            if record.task.status != TaskStatus::Running {
                warn!(
                    task_id = %id,
                    status = %record.task.status,
                    "Ignoring completion for scan that is not running"
                );
                return None;
            }

            let library_id = record.task.library_id;
            let status = if record.cancel_requested {
                TaskStatus::Cancelled
            } else {
                match outcome {
                    Ok(result) => {
                        record.task.result = Some(result);
                        TaskStatus::Completed
                    }
                    Err(err) => {
                        record.task.error = Some(err.to_string());
                        TaskStatus::Failed
                    }
                }
            };
            record.task.status = status;
            record.task.completed_at = Some(now);

            match status {
                TaskStatus::Completed => info!(
                    task_id = %id,
                    library_id = %library_id,
                    result = ?record.task.result,
                    "Scan completed"
                ),
                TaskStatus::Failed => warn!(
                    task_id = %id,
                    library_id = %library_id,
                    error = record.task.error.as_deref().unwrap_or_default(),
                    "Scan failed"
                ),
                _ => info!(task_id = %id, library_id = %library_id, "Running scan cancelled"),
            }

            store.release(library_id, id);
            (library_id, status)
        };

        self.emit(ScanTaskEvent::Finished {
            task_id: id,
            library_id,
            status,
        });
        Some(status)
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.inner.config.history_retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn emit(&self, event: ScanTaskEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}
