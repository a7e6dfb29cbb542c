//! In-memory table of scan tasks.
//!
//! Holds recent, pending and running tasks keyed by id, plus an index from
//! library to its single active (pending or running) task.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::executor::CancelFlag;
use super::task::{LibraryId, ScanTask, TaskId, TaskStatus};

#[derive(Debug)]
pub(crate) struct TaskRecord {
    pub task: ScanTask,
    /// Set by `cancel` on a running task. Decides the final status.
    pub cancel_requested: bool,
    /// Shared with the executor context. Also raised by the worker on timeout.
    pub signal: CancelFlag,
    /// Submission order, assigned on insert. Breaks `created_at` ties.
    pub seq: u64,
}

impl TaskRecord {
    pub fn new(task: ScanTask) -> Self {
        Self {
            task,
            cancel_requested: false,
            signal: CancelFlag::new(),
            seq: 0,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct TaskStore {
    tasks: HashMap<TaskId, TaskRecord>,
    active: HashMap<LibraryId, TaskId>,
    next_seq: u64,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly submitted task and mark it active for its library.
    pub fn insert(&mut self, mut record: TaskRecord) {
        record.seq = self.next_seq;
        self.next_seq += 1;
        let id = record.task.id;
        let library_id = record.task.library_id;
        debug_assert!(
            !self.active.contains_key(&library_id),
            "library {library_id} already has an active scan"
        );
        self.active.insert(library_id, id);
        self.tasks.insert(id, record);
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskRecord> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskRecord> {
        self.tasks.get_mut(&id)
    }

    /// The pending or running task for a library, if any, for mutation.
    pub fn active_for_mut(&mut self, library_id: LibraryId) -> Option<&mut TaskRecord> {
        let id = *self.active.get(&library_id)?;
        self.tasks.get_mut(&id)
    }

    /// Drop the active-index entry for a library once `id` reaches a terminal state.
    pub fn release(&mut self, library_id: LibraryId, id: TaskId) {
        if self.active.get(&library_id) == Some(&id) {
            self.active.remove(&library_id);
        }
    }

    /// A running task for `library_id` other than `except`.
    pub fn running_conflict(&self, library_id: LibraryId, except: TaskId) -> Option<TaskId> {
        self.tasks
            .values()
            .find(|r| {
                r.task.library_id == library_id
                    && r.task.status == TaskStatus::Running
                    && r.task.id != except
            })
            .map(|r| r.task.id)
    }

    pub fn running(&self) -> Option<&TaskRecord> {
        self.tasks
            .values()
            .find(|r| r.task.status == TaskStatus::Running)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Evict terminal tasks completed before `cutoff`. Returns how many were removed.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, r| !r.task.expired_before(cutoff));
        before - self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::scan_queue::task::ScanPriority;
    use chrono::Duration;

    fn finished(library: i64, status: TaskStatus, at: DateTime<Utc>) -> TaskRecord {
        let mut task = ScanTask::pending(LibraryId(library), ScanPriority::Normal, at);
        task.status = status;
        task.completed_at = Some(at);
        TaskRecord::new(task)
    }

    #[test]
    fn test_active_index_tracks_library() {
        let now = Utc::now();
        let mut store = TaskStore::new();
        let record = TaskRecord::new(ScanTask::pending(LibraryId(7), ScanPriority::Normal, now));
        let id = record.task.id;
        store.insert(record);

        assert_eq!(store.active_for_mut(LibraryId(7)).map(|r| r.task.id), Some(id));
        assert!(store.active_for_mut(LibraryId(8)).is_none());

        store.release(LibraryId(7), id);
        assert!(store.active_for_mut(LibraryId(7)).is_none());
        assert!(store.get(id).is_some());
    }

    #[test]
    fn test_release_ignores_other_ids() {
        let now = Utc::now();
        let mut store = TaskStore::new();
        let record = TaskRecord::new(ScanTask::pending(LibraryId(1), ScanPriority::Normal, now));
        let id = record.task.id;
        store.insert(record);

        store.release(LibraryId(1), TaskId::new());
        assert_eq!(store.active_for_mut(LibraryId(1)).map(|r| r.task.id), Some(id));
    }

    #[test]
    fn test_prune_only_removes_old_terminal_tasks() {
        let now = Utc::now();
        let mut store = TaskStore::new();

        let mut old_pending = ScanTask::pending(LibraryId(1), ScanPriority::Normal, now);
        old_pending.created_at = now - Duration::days(3);
        let old_pending_id = old_pending.id;
        store.insert(TaskRecord::new(old_pending));

        let stale = finished(2, TaskStatus::Completed, now - Duration::hours(25));
        let stale_id = stale.task.id;
        store.tasks.insert(stale_id, stale);

        let recent = finished(3, TaskStatus::Failed, now - Duration::hours(1));
        let recent_id = recent.task.id;
        store.tasks.insert(recent_id, recent);

        assert_eq!(store.prune(now - Duration::hours(24)), 1);
        assert!(store.get(stale_id).is_none());
        assert!(store.get(recent_id).is_some());
        assert!(store.get(old_pending_id).is_some());
        assert_eq!(store.len(), 2);
    }
}
