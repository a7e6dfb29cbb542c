//! Boundary between the queue and whatever actually scans a library.
//!
//! An executor receives a [ScanContext] through which it reports progress and
//! polls for cooperative cancellation. It never touches the task store.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::ScanQueue;
use super::error::ScanError;
use super::task::{LibraryId, ScanOutcome, ScanProgress, TaskId};

/// Performs one library scan.
///
/// Implementations should call [ScanContext::report_progress] as they go and
/// check [ScanContext::is_cancelled] between units of work, returning early
/// once it reports `true`.
#[async_trait]
pub trait ScanExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        library_id: LibraryId,
        ctx: ScanContext,
    ) -> Result<ScanOutcome, ScanError>;
}

/// Shared cancellation signal for a single running scan.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle given to an executor for the duration of one scan.
#[derive(Clone)]
pub struct ScanContext {
    task_id: TaskId,
    queue: ScanQueue,
    signal: CancelFlag,
}

impl ScanContext {
    pub(crate) fn new(task_id: TaskId, queue: ScanQueue, signal: CancelFlag) -> Self {
        Self {
            task_id,
            queue,
            signal,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Record how far the scan has got. Last write wins.
    pub fn report_progress(&self, scanned_paths: u64, total_paths: u64) {
        self.queue.record_progress(
            self.task_id,
            ScanProgress {
                scanned_paths,
                total_paths,
            },
        );
    }

    /// Whether the scan should stop.
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_raised()
    }
}

impl std::fmt::Debug for ScanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanContext")
            .field("task_id", &self.task_id)
            .field("cancelled", &self.signal.is_raised())
            .finish()
    }
}

/// Executor built from an async closure.
pub struct ExecutorFn<F>(F);

/// Wrap an async closure as a [ScanExecutor].
pub fn executor_fn<F, Fut>(f: F) -> ExecutorFn<F>
where
    F: Fn(LibraryId, ScanContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ScanOutcome, ScanError>> + Send + 'static,
{
    ExecutorFn(f)
}

#[async_trait]
impl<F, Fut> ScanExecutor for ExecutorFn<F>
where
    F: Fn(LibraryId, ScanContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ScanOutcome, ScanError>> + Send + 'static,
{
    async fn execute(
        &self,
        library_id: LibraryId,
        ctx: ScanContext,
    ) -> Result<ScanOutcome, ScanError> {
        (self.0)(library_id, ctx).await
    }
}
