//! Library scanner
//!
//! Walks library directories to discover content files and reports what was
//! added or removed since the previous scan. Runs as the queue's
//! [ScanExecutor]; the walk itself happens on the blocking pool.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::LibraryConfig;
use crate::services::scan_queue::{LibraryId, ScanContext, ScanError, ScanExecutor, ScanOutcome};

/// Content file extensions we recognize
const CONTENT_EXTENSIONS: &[&str] = &["cbz", "cbr", "zip", "rar", "cb7", "7z", "epub", "pdf"];

/// Scan executor that walks each library's root directory.
#[derive(Default)]
pub struct DirectoryScanExecutor {
    libraries: RwLock<HashMap<LibraryId, PathBuf>>,
    /// Content paths seen by the last scan of each library that ran to the end.
    known: Arc<Mutex<HashMap<LibraryId, HashSet<PathBuf>>>>,
}

impl DirectoryScanExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(libraries: &[LibraryConfig]) -> Self {
        let scanner = Self::new();
        for library in libraries {
            scanner.register(library.id, library.path.clone());
        }
        scanner
    }

    /// Register (or re-point) a library root.
    pub fn register(&self, library_id: LibraryId, root: impl Into<PathBuf>) {
        let root = root.into();
        info!(library_id = %library_id, path = %root.display(), "Library registered for scanning");
        self.libraries.write().insert(library_id, root);
    }

    pub fn library_ids(&self) -> Vec<LibraryId> {
        let mut ids: Vec<LibraryId> = self.libraries.read().keys().copied().collect();
        ids.sort();
        ids
    }

    fn root_of(&self, library_id: LibraryId) -> Option<PathBuf> {
        self.libraries.read().get(&library_id).cloned()
    }
}

#[async_trait]
impl ScanExecutor for DirectoryScanExecutor {
    async fn execute(
        &self,
        library_id: LibraryId,
        ctx: ScanContext,
    ) -> Result<ScanOutcome, ScanError> {
        let root = self
            .root_of(library_id)
            .ok_or(ScanError::LibraryNotFound(library_id))?;
        if !root.is_dir() {
            warn!(library_id = %library_id, path = %root.display(), "Library path does not exist");
            return Err(ScanError::PathMissing(root));
        }

        info!(library_id = %library_id, path = %root.display(), "Starting library scan");
        let known = Arc::clone(&self.known);
        tokio::task::spawn_blocking(move || walk_library(library_id, &root, &ctx, &known))
            .await
            .map_err(|e| ScanError::Panicked(e.to_string()))?
    }
}

/// Blocking walk of one library root.
fn walk_library(
    library_id: LibraryId,
    root: &Path,
    ctx: &ScanContext,
    known: &Mutex<HashMap<LibraryId, HashSet<PathBuf>>>,
) -> Result<ScanOutcome, ScanError> {
    let mut outcome = ScanOutcome::default();

    // First pass: collect candidate files so progress has a total.
    let mut candidates: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        if ctx.is_cancelled() {
            debug!(library_id = %library_id, "Scan cancelled while listing files");
            return Ok(outcome);
        }
        match entry {
            Ok(entry) if entry.file_type().is_file() && is_content_file(entry.path()) => {
                candidates.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) if e.depth() == 0 => {
                return Err(ScanError::Io {
                    path: root.to_path_buf(),
                    source: e.into(),
                });
            }
            Err(e) => {
                debug!(library_id = %library_id, error = %e, "Unreadable entry");
                outcome.failed_scrape_count += 1;
            }
        }
    }

    let total = candidates.len() as u64;
    info!(library_id = %library_id, total, "Found content files to scan");
    ctx.report_progress(0, total);

    // Second pass: inspect each file.
    let mut seen: HashSet<PathBuf> = HashSet::with_capacity(candidates.len());
    for (index, path) in candidates.into_iter().enumerate() {
        if ctx.is_cancelled() {
            debug!(library_id = %library_id, scanned = index, "Scan cancelled");
            return Ok(outcome);
        }
        match std::fs::metadata(&path) {
            Ok(meta) if meta.len() > 0 => {
                seen.insert(path);
            }
            Ok(_) => {
                debug!(path = %path.display(), "Skipping empty file");
                outcome.failed_scrape_count += 1;
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Failed to read file");
                outcome.failed_scrape_count += 1;
            }
        }
        ctx.report_progress(index as u64 + 1, total);
    }

    let mut known = known.lock();
    let previous = known.remove(&library_id).unwrap_or_default();
    outcome.added_count = seen.difference(&previous).count() as u64;
    outcome.removed_count = previous.difference(&seen).count() as u64;
    known.insert(library_id, seen);

    info!(
        library_id = %library_id,
        added = outcome.added_count,
        removed = outcome.removed_count,
        failed = outcome.failed_scrape_count,
        "Library scan finished"
    );
    Ok(outcome)
}

fn is_content_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| CONTENT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::scan_queue::{ScanPriority, ScanQueue, ScanQueueConfig, TaskStatus};
    use assert_matches::assert_matches;
    use std::fs;

    fn write(root: &Path, name: &str) {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"PK\x03\x04").unwrap();
    }

    /// Start a task for `library_id` and hand back a context for it.
    fn running_context(queue: &ScanQueue, library_id: LibraryId) -> ScanContext {
        queue.submit(library_id, ScanPriority::High).unwrap();
        let scan = queue.begin_next().unwrap();
        ScanContext::new(scan.task_id, queue.clone(), scan.signal)
    }

    #[test]
    fn test_content_extensions() {
        assert!(is_content_file(Path::new("/m/One Piece v01.cbz")));
        assert!(is_content_file(Path::new("/m/book.EPUB")));
        assert!(!is_content_file(Path::new("/m/cover.jpg")));
        assert!(!is_content_file(Path::new("/m/README")));
    }

    #[tokio::test]
    async fn test_scan_counts_added_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "series/vol1.cbz");
        write(dir.path(), "series/vol2.cbr");
        write(dir.path(), "series/cover.jpg");
        fs::write(dir.path().join("empty.epub"), b"").unwrap();

        let scanner = DirectoryScanExecutor::new();
        scanner.register(LibraryId(7), dir.path());
        let queue = ScanQueue::new(ScanQueueConfig::default());

        let ctx = running_context(&queue, LibraryId(7));
        let id = ctx.task_id();
        let outcome = scanner.execute(LibraryId(7), ctx).await.unwrap();
        assert_eq!(
            outcome,
            ScanOutcome {
                added_count: 2,
                removed_count: 0,
                failed_scrape_count: 1,
            }
        );
        let progress = queue.get(id).unwrap().progress.unwrap();
        assert_eq!((progress.scanned_paths, progress.total_paths), (3, 3));
        queue.finish(id, Ok(outcome));

        fs::remove_file(dir.path().join("series/vol1.cbz")).unwrap();
        write(dir.path(), "series/vol3.cbz");
        let ctx = running_context(&queue, LibraryId(7));
        let outcome = scanner.execute(LibraryId(7), ctx).await.unwrap();
        assert_eq!(outcome.added_count, 1);
        assert_eq!(outcome.removed_count, 1);
    }

    #[tokio::test]
    async fn test_cancelled_scan_does_not_update_known_paths() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.cbz");

        let scanner = DirectoryScanExecutor::new();
        scanner.register(LibraryId(1), dir.path());
        let queue = ScanQueue::new(ScanQueueConfig::default());

        let ctx = running_context(&queue, LibraryId(1));
        let id = ctx.task_id();
        queue.cancel(id).unwrap();
        let outcome = scanner.execute(LibraryId(1), ctx).await.unwrap();
        assert_eq!(outcome, ScanOutcome::default());
        assert_eq!(queue.finish(id, Ok(outcome)), Some(TaskStatus::Cancelled));

        let ctx = running_context(&queue, LibraryId(1));
        let outcome = scanner.execute(LibraryId(1), ctx).await.unwrap();
        assert_eq!(outcome.added_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_library_and_missing_path() {
        let scanner = DirectoryScanExecutor::new();
        let queue = ScanQueue::new(ScanQueueConfig::default());

        let ctx = running_context(&queue, LibraryId(2));
        assert_matches!(
            scanner.execute(LibraryId(2), ctx).await,
            Err(ScanError::LibraryNotFound(LibraryId(2)))
        );

        scanner.register(LibraryId(3), "/definitely/not/a/library");
        let ctx = running_context(&queue, LibraryId(3));
        assert_matches!(
            scanner.execute(LibraryId(3), ctx).await,
            Err(ScanError::PathMissing(_))
        );
    }

    #[test]
    fn test_from_config_registers_libraries() {
        let scanner = DirectoryScanExecutor::from_config(&[
            LibraryConfig {
                id: LibraryId(8),
                path: PathBuf::from("/data/comics"),
            },
            LibraryConfig {
                id: LibraryId(7),
                path: PathBuf::from("/data/manga"),
            },
        ]);
        assert_eq!(scanner.library_ids(), vec![LibraryId(7), LibraryId(8)]);
    }
}
