//! Ordering over pending scan tasks.
//!
//! Highest priority first, then oldest `created_at`, then submission order.
//! Backed by an ordered map plus a side map from task id to its key, so
//! removal and reprioritization are O(log n).

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use super::task::{ScanPriority, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueKey {
    priority: ScanPriority,
    created_at: DateTime<Utc>,
    seq: u64,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub(crate) struct PriorityQueue {
    ordered: BTreeMap<QueueKey, TaskId>,
    keys: HashMap<TaskId, QueueKey>,
    next_seq: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task. Re-inserting a queued id replaces its previous position.
    pub fn push(&mut self, id: TaskId, priority: ScanPriority, created_at: DateTime<Utc>) {
        self.remove(id);
        let key = QueueKey {
            priority,
            created_at,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.ordered.insert(key, id);
        self.keys.insert(id, key);
    }

    /// Remove and return the next task to run.
    pub fn pop(&mut self) -> Option<TaskId> {
        let (_, id) = self.ordered.pop_first()?;
        self.keys.remove(&id);
        Some(id)
    }

    pub fn remove(&mut self, id: TaskId) -> bool {
        match self.keys.remove(&id) {
            Some(key) => {
                self.ordered.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Move a queued task into a new priority band, keeping its age and
    /// submission order within that band.
    pub fn reprioritize(&mut self, id: TaskId, priority: ScanPriority) -> bool {
        let Some(key) = self.keys.get(&id).copied() else {
            return false;
        };
        self.ordered.remove(&key);
        let key = QueueKey { priority, ..key };
        self.ordered.insert(key, id);
        self.keys.insert(id, key);
        true
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn drain(queue: &mut PriorityQueue) -> Vec<TaskId> {
        std::iter::from_fn(|| queue.pop()).collect()
    }

    #[test]
    fn test_high_before_normal_then_fifo() {
        let t0 = Utc::now();
        let (a, b, c) = (TaskId::new(), TaskId::new(), TaskId::new());
        let mut queue = PriorityQueue::new();
        queue.push(a, ScanPriority::Normal, t0);
        queue.push(b, ScanPriority::High, t0 + Duration::seconds(1));
        queue.push(c, ScanPriority::Normal, t0 + Duration::seconds(2));

        assert_eq!(drain(&mut queue), vec![b, a, c]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_identical_timestamps_keep_submission_order() {
        let now = Utc::now();
        let ids: Vec<TaskId> = (0..5).map(|_| TaskId::new()).collect();
        let mut queue = PriorityQueue::new();
        for id in &ids {
            queue.push(*id, ScanPriority::Normal, now);
        }
        assert_eq!(drain(&mut queue), ids);
    }

    #[test]
    fn test_remove_skips_task() {
        let now = Utc::now();
        let (a, b) = (TaskId::new(), TaskId::new());
        let mut queue = PriorityQueue::new();
        queue.push(a, ScanPriority::Normal, now);
        queue.push(b, ScanPriority::Normal, now);

        assert!(queue.remove(a));
        assert!(!queue.remove(a));
        assert_eq!(queue.len(), 1);
        assert_eq!(drain(&mut queue), vec![b]);
    }

    #[test]
    fn test_reprioritize_moves_task_ahead() {
        let t0 = Utc::now();
        let (a, b, c) = (TaskId::new(), TaskId::new(), TaskId::new());
        let mut queue = PriorityQueue::new();
        queue.push(a, ScanPriority::Normal, t0);
        queue.push(b, ScanPriority::Normal, t0 + Duration::seconds(1));
        queue.push(c, ScanPriority::High, t0 + Duration::seconds(2));

        assert!(queue.reprioritize(b, ScanPriority::High));
        // b is older than c, so it leads the High band.
        assert_eq!(drain(&mut queue), vec![b, c, a]);
        assert!(!queue.reprioritize(b, ScanPriority::High));
    }
}
