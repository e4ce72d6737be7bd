//! Bounded undo/redo history over level snapshots.
//!
//! Snapshots are `Arc<LevelConfig>`: capturing one is a reference-count bump,
//! and the live document is edited copy-on-write, so a stored snapshot is
//! never observed changing.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::level::LevelConfig;

/// Immutable level snapshot.
pub type Snapshot = Arc<LevelConfig>;

/// Default number of entries kept in each direction.
pub const HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone)]
pub struct HistoryManager {
    undo: VecDeque<Snapshot>,
    redo: VecDeque<Snapshot>,
    capacity: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl HistoryManager {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            undo: VecDeque::with_capacity(capacity),
            redo: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records the state before an edit. Clears the redo sequence.
    pub fn push_state(&mut self, state: Snapshot) {
        Self::push_bounded(&mut self.undo, state, self.capacity);
        self.redo.clear();
        tracing::debug!("[history] push (undo={})", self.undo.len());
    }

    /// Steps back. `live` goes onto the redo sequence.
    pub fn undo(&mut self, live: Snapshot) -> Option<Snapshot> {
        let previous = self.undo.pop_back()?;
        Self::push_bounded(&mut self.redo, live, self.capacity);
        tracing::debug!("[history] undo (undo={}, redo={})", self.undo.len(), self.redo.len());
        Some(previous)
    }

    /// Steps forward. `live` goes back onto the undo sequence.
    pub fn redo(&mut self, live: Snapshot) -> Option<Snapshot> {
        let next = self.redo.pop_back()?;
        Self::push_bounded(&mut self.undo, live, self.capacity);
        tracing::debug!("[history] redo (undo={}, redo={})", self.undo.len(), self.redo.len());
        Some(next)
    }

    pub fn clear_history(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    fn push_bounded(queue: &mut VecDeque<Snapshot>, state: Snapshot, capacity: usize) {
        if queue.len() == capacity {
            queue.pop_front();
        }
        queue.push_back(state);
    }
}
