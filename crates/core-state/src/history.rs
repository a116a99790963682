//! Bounded snapshot history with a movable cursor

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;

/// One accepted state, as recorded in history
#[derive(Debug, Clone)]
pub struct StateSnapshot<T> {
    pub state: Arc<T>,
    pub recorded_at: DateTime<Utc>,
    pub label: Option<String>,
}

/// Ring of recent snapshots. The cursor marks the entry matching the live
/// state; undo and redo move it, new pushes land after it.
#[derive(Debug)]
pub struct History<T> {
    entries: VecDeque<StateSnapshot<T>>,
    capacity: usize,
    cursor: usize,
}

impl<T> History<T> {
    pub fn new(capacity: usize, initial: Arc<T>) -> Self {
        let mut entries = VecDeque::with_capacity(capacity.min(64));
        entries.push_back(StateSnapshot {
            state: initial,
            recorded_at: Utc::now(),
            label: Some("initial".to_string()),
        });
        Self {
            entries,
            capacity: capacity.max(1),
            cursor: 0,
        }
    }

    /// Record an accepted state. Evicts the oldest entry once the bound is
    /// exceeded and leaves the cursor on the new entry.
    pub fn push(&mut self, state: Arc<T>, label: Option<String>) {
        self.entries.push_back(StateSnapshot {
            state,
            recorded_at: Utc::now(),
            label,
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.cursor = self.entries.len() - 1;
    }

    /// Step the cursor back one entry, returning the snapshot it lands on
    pub fn undo(&mut self) -> Option<&StateSnapshot<T>> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor)
    }

    /// Step the cursor forward one entry
    pub fn redo(&mut self) -> Option<&StateSnapshot<T>> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor)
    }

    /// Move the cursor to an absolute index
    pub fn go_to(&mut self, index: usize) -> Option<&StateSnapshot<T>> {
        if index >= self.entries.len() {
            return None;
        }
        self.cursor = index;
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn entries(&self) -> impl Iterator<Item = &StateSnapshot<T>> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(capacity: usize) -> History<i32> {
        History::new(capacity, Arc::new(0))
    }

    #[test]
    fn test_push_moves_cursor_to_end() {
        let mut h = history(10);
        h.push(Arc::new(1), Some("one".to_string()));
        h.push(Arc::new(2), None);
        assert_eq!(h.len(), 3);
        assert_eq!(h.cursor(), 2);
    }

    #[test]
    fn test_bound_evicts_oldest() {
        let mut h = history(3);
        for i in 1..=5 {
            h.push(Arc::new(i), None);
        }
        assert_eq!(h.len(), 3);
        let values: Vec<i32> = h.entries().map(|s| *s.state).collect();
        assert_eq!(values, vec![3, 4, 5]);
        assert_eq!(h.cursor(), 2);
    }

    #[test]
    fn test_undo_redo_walk_the_ring() {
        let mut h = history(10);
        h.push(Arc::new(1), None);
        h.push(Arc::new(2), None);

        assert_eq!(*h.undo().unwrap().state, 1);
        assert_eq!(*h.undo().unwrap().state, 0);
        assert!(h.undo().is_none());

        assert_eq!(*h.redo().unwrap().state, 1);
        assert_eq!(*h.redo().unwrap().state, 2);
        assert!(h.redo().is_none());
    }

    #[test]
    fn test_go_to_bounds_checked() {
        let mut h = history(10);
        h.push(Arc::new(1), None);
        assert_eq!(*h.go_to(0).unwrap().state, 0);
        assert!(h.go_to(5).is_none());
        // A failed go_to leaves the cursor alone
        assert_eq!(h.cursor(), 0);
    }

    #[test]
    fn test_push_after_undo_appends() {
        let mut h = history(10);
        h.push(Arc::new(1), None);
        h.undo();
        h.push(Arc::new(9), None);
        assert_eq!(h.len(), 3);
        assert_eq!(h.cursor(), 2);
        let values: Vec<i32> = h.entries().map(|s| *s.state).collect();
        assert_eq!(values, vec![0, 1, 9]);
    }
}
