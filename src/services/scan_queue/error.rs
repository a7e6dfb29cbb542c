//! Error types for the scan queue and scan executors.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::task::{LibraryId, TaskId, TaskStatus};

/// Errors returned by the queue's public operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("scan task {0} not found")]
    NotFound(TaskId),

    #[error("scan task {id} is already {status}")]
    AlreadyTerminal { id: TaskId, status: TaskStatus },

    #[error("scan queue is shutting down")]
    ShuttingDown,
}

/// Failure reported by a scan executor (or by the worker on its behalf).
///
/// The `Display` text is what ends up in a failed task's `error` field.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("library {0} is not registered")]
    LibraryNotFound(LibraryId),

    #[error("library path does not exist: {}", .0.display())]
    PathMissing(PathBuf),

    #[error("I/O error at {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scan timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("scan executor panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

impl ScanError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<anyhow::Error> for ScanError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_messages() {
        assert_eq!(
            ScanError::LibraryNotFound(LibraryId(3)).to_string(),
            "library 3 is not registered"
        );
        assert_eq!(
            ScanError::Timeout(Duration::from_secs(90)).to_string(),
            "scan timed out after 90s"
        );
        assert_eq!(ScanError::other("disk on fire").to_string(), "disk on fire");
    }

    #[test]
    fn test_anyhow_context_is_preserved() {
        let err = anyhow::anyhow!("permission denied").context("reading /data/manga");
        assert_eq!(
            ScanError::from(err).to_string(),
            "reading /data/manga: permission denied"
        );
    }
}
