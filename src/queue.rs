//! Ordered queue of pending work item ids.
//!
//! Insertion order is assignment priority. Items stay in the queue while in
//! flight and are dequeued on their terminal transition. The queue itself is
//! plain data; durability comes from persisting it inside the engine state
//! snapshot, so a crash between mutation and persistence recovers to the last
//! durable order, never a partially applied reorder.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::WorkItemId;

/// Errors raised by queue operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue has no entries to dequeue.
    #[error("queue is empty")]
    EmptyQueue,

    /// The id is already present; ids are unique within the queue.
    #[error("item {0} is already in the queue")]
    DuplicateItem(WorkItemId),

    /// The id is not in the queue.
    #[error("item {0} is not in the queue")]
    UnknownItem(WorkItemId),
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Ordered sequence of unique work item ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkQueue {
    order: Vec<WorkItemId>,
}

impl WorkQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        WorkQueue { order: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the head of the queue (next assignment candidate).
    pub fn head(&self) -> Option<&WorkItemId> {
        self.order.first()
    }

    /// Returns the position of an id, if present.
    pub fn position(&self, id: &WorkItemId) -> Option<usize> {
        self.order.iter().position(|x| x == id)
    }

    pub fn contains(&self, id: &WorkItemId) -> bool {
        self.position(id).is_some()
    }

    /// Iterates ids in queue order.
    pub fn iter(&self) -> impl Iterator<Item = &WorkItemId> {
        self.order.iter()
    }

    /// Appends an id to the tail. Rejects duplicates.
    pub fn enqueue(&mut self, id: WorkItemId) -> Result<()> {
        if self.contains(&id) {
            return Err(QueueError::DuplicateItem(id));
        }
        self.order.push(id);
        Ok(())
    }

    /// Inserts an id at a position, shifting later entries. Positions past the
    /// tail append. Rejects duplicates.
    pub fn insert(&mut self, id: WorkItemId, position: usize) -> Result<()> {
        if self.contains(&id) {
            return Err(QueueError::DuplicateItem(id));
        }
        let position = position.min(self.order.len());
        self.order.insert(position, id);
        Ok(())
    }

    /// Removes and returns the head.
    pub fn dequeue_head(&mut self) -> Result<WorkItemId> {
        if self.order.is_empty() {
            return Err(QueueError::EmptyQueue);
        }
        Ok(self.order.remove(0))
    }

    /// Removes an id, preserving the relative order of the rest.
    pub fn remove(&mut self, id: &WorkItemId) -> Result<()> {
        let position = self
            .position(id)
            .ok_or_else(|| QueueError::UnknownItem(id.clone()))?;
        self.order.remove(position);
        Ok(())
    }

    /// Moves an id to a new position with a stable shift of the entries in
    /// between. Positions past the tail clamp to the tail.
    pub fn reorder(&mut self, id: &WorkItemId, new_position: usize) -> Result<()> {
        let current = self
            .position(id)
            .ok_or_else(|| QueueError::UnknownItem(id.clone()))?;
        let id = self.order.remove(current);
        let new_position = new_position.min(self.order.len());
        self.order.insert(new_position, id);
        Ok(())
    }

    /// Swaps an id with its predecessor. A no-op at the head.
    pub fn move_up(&mut self, id: &WorkItemId) -> Result<bool> {
        let position = self
            .position(id)
            .ok_or_else(|| QueueError::UnknownItem(id.clone()))?;
        if position == 0 {
            return Ok(false);
        }
        self.order.swap(position, position - 1);
        Ok(true)
    }

    /// Swaps an id with its successor. A no-op at the tail.
    pub fn move_down(&mut self, id: &WorkItemId) -> Result<bool> {
        let position = self
            .position(id)
            .ok_or_else(|| QueueError::UnknownItem(id.clone()))?;
        if position + 1 >= self.order.len() {
            return Ok(false);
        }
        self.order.swap(position, position + 1);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(s: &str) -> WorkItemId {
        WorkItemId::from(s)
    }

    fn queue_of(ids: &[&str]) -> WorkQueue {
        let mut queue = WorkQueue::new();
        for s in ids {
            queue.enqueue(id(s)).unwrap();
        }
        queue
    }

    fn order(queue: &WorkQueue) -> Vec<String> {
        queue.iter().map(|i| i.0.clone()).collect()
    }

    // ─── Basic operations ───

    #[test]
    fn new_queue_is_empty() {
        let queue = WorkQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.head(), None);
    }

    #[test]
    fn enqueue_preserves_insertion_order() {
        let queue = queue_of(&["a", "b", "c"]);
        assert_eq!(order(&queue), vec!["a", "b", "c"]);
        assert_eq!(queue.head(), Some(&id("a")));
    }

    #[test]
    fn enqueue_rejects_duplicates() {
        let mut queue = queue_of(&["a"]);
        assert_eq!(
            queue.enqueue(id("a")),
            Err(QueueError::DuplicateItem(id("a")))
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn dequeue_head_removes_first() {
        let mut queue = queue_of(&["a", "b"]);
        assert_eq!(queue.dequeue_head().unwrap(), id("a"));
        assert_eq!(order(&queue), vec!["b"]);
    }

    #[test]
    fn dequeue_head_on_empty_fails() {
        let mut queue = WorkQueue::new();
        assert_eq!(queue.dequeue_head(), Err(QueueError::EmptyQueue));
    }

    #[test]
    fn remove_preserves_relative_order() {
        let mut queue = queue_of(&["a", "b", "c", "d"]);
        queue.remove(&id("b")).unwrap();
        assert_eq!(order(&queue), vec!["a", "c", "d"]);
    }

    #[test]
    fn remove_unknown_fails() {
        let mut queue = queue_of(&["a"]);
        assert_eq!(queue.remove(&id("z")), Err(QueueError::UnknownItem(id("z"))));
    }

    #[test]
    fn insert_at_position_shifts_entries() {
        let mut queue = queue_of(&["a", "b"]);
        queue.insert(id("x"), 1).unwrap();
        assert_eq!(order(&queue), vec!["a", "x", "b"]);

        queue.insert(id("y"), 99).unwrap();
        assert_eq!(order(&queue), vec!["a", "x", "b", "y"]);
    }

    // ─── Reordering ───

    #[test]
    fn reorder_moves_with_stable_shift() {
        let mut queue = queue_of(&["a", "b", "c", "d"]);
        queue.reorder(&id("d"), 0).unwrap();
        assert_eq!(order(&queue), vec!["d", "a", "b", "c"]);

        queue.reorder(&id("d"), 2).unwrap();
        assert_eq!(order(&queue), vec!["a", "b", "d", "c"]);
    }

    #[test]
    fn reorder_clamps_past_tail() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.reorder(&id("a"), 10).unwrap();
        assert_eq!(order(&queue), vec!["b", "c", "a"]);
    }

    #[test]
    fn move_up_and_down_swap_neighbors() {
        let mut queue = queue_of(&["a", "b", "c"]);

        assert!(queue.move_up(&id("b")).unwrap());
        assert_eq!(order(&queue), vec!["b", "a", "c"]);

        assert!(queue.move_down(&id("a")).unwrap());
        assert_eq!(order(&queue), vec!["b", "c", "a"]);

        // Boundary no-ops
        assert!(!queue.move_up(&id("b")).unwrap());
        assert!(!queue.move_down(&id("a")).unwrap());
    }

    // ─── Property tests ───

    fn arb_ids() -> impl Strategy<Value = Vec<String>> {
        prop::collection::btree_set("[a-z]{1,6}", 1..8).prop_map(|s| s.into_iter().collect())
    }

    proptest! {
        /// Removal never disturbs the relative order of the remaining ids.
        #[test]
        fn prop_remove_preserves_relative_order(ids in arb_ids(), victim_index in 0usize..8) {
            let mut queue = WorkQueue::new();
            for s in &ids {
                queue.enqueue(id(s)).unwrap();
            }
            let victim = ids[victim_index % ids.len()].clone();
            queue.remove(&id(&victim)).unwrap();

            let expected: Vec<String> = ids.iter().filter(|s| **s != victim).cloned().collect();
            prop_assert_eq!(order(&queue), expected);
        }

        /// Reorder keeps the queue a permutation of the same unique ids.
        #[test]
        fn prop_reorder_is_a_permutation(
            ids in arb_ids(),
            subject_index in 0usize..8,
            target in 0usize..8,
        ) {
            let mut queue = WorkQueue::new();
            for s in &ids {
                queue.enqueue(id(s)).unwrap();
            }
            let subject = ids[subject_index % ids.len()].clone();
            queue.reorder(&id(&subject), target).unwrap();

            prop_assert_eq!(queue.len(), ids.len());
            let mut sorted = order(&queue);
            sorted.sort();
            let mut expected = ids.clone();
            expected.sort();
            prop_assert_eq!(sorted, expected);
            if target < ids.len() {
                prop_assert_eq!(queue.position(&id(&subject)), Some(target));
            }
        }

        /// Serde round-trip reproduces the identical order.
        #[test]
        fn prop_serde_roundtrip_preserves_order(ids in arb_ids()) {
            let mut queue = WorkQueue::new();
            for s in &ids {
                queue.enqueue(id(s)).unwrap();
            }
            let json = serde_json::to_string(&queue).unwrap();
            let parsed: WorkQueue = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(parsed, queue);
        }
    }
}
