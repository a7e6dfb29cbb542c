//! Lifecycle events broadcast to subscribers (e.g. live progress in the UI).

use serde::Serialize;

use super::task::{LibraryId, ScanPriority, ScanProgress, TaskId, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanTaskEvent {
    Queued {
        task_id: TaskId,
        library_id: LibraryId,
        priority: ScanPriority,
    },
    PriorityRaised {
        task_id: TaskId,
        library_id: LibraryId,
        priority: ScanPriority,
    },
    Started {
        task_id: TaskId,
        library_id: LibraryId,
    },
    Progress {
        task_id: TaskId,
        library_id: LibraryId,
        progress: ScanProgress,
    },
    Finished {
        task_id: TaskId,
        library_id: LibraryId,
        status: TaskStatus,
    },
}

impl ScanTaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            ScanTaskEvent::Queued { task_id, .. }
            | ScanTaskEvent::PriorityRaised { task_id, .. }
            | ScanTaskEvent::Started { task_id, .. }
            | ScanTaskEvent::Progress { task_id, .. }
            | ScanTaskEvent::Finished { task_id, .. } => *task_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let task_id = TaskId::new();
        let event = ScanTaskEvent::Finished {
            task_id,
            library_id: LibraryId(7),
            status: TaskStatus::Cancelled,
        };
        assert_eq!(event.task_id(), task_id);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "finished");
        assert_eq!(json["library_id"], 7);
        assert_eq!(json["status"], "cancelled");
    }
}
