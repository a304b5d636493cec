//! Bounded, most-recent-first store of finalized rounds.

use std::collections::VecDeque;

use super::FinalizedRound;

/// Fixed-capacity history buffer. Memory stays bounded regardless of uptime.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    capacity: usize,
    rounds: VecDeque<FinalizedRound>,
}

impl HistoryStore {
    /// Creates a store holding at most `capacity` rounds (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            rounds: VecDeque::with_capacity(capacity),
        }
    }

    /// Inserts at the front, evicting the oldest entry when full.
    pub fn push(&mut self, record: FinalizedRound) {
        while self.rounds.len() >= self.capacity {
            self.rounds.pop_back();
        }
        self.rounds.push_front(record);
    }

    /// Owned copy of up to `limit` most recent rounds, newest first.
    pub fn snapshot(&self, limit: usize) -> Vec<FinalizedRound> {
        self.rounds.iter().take(limit).cloned().collect()
    }

    pub fn latest(&self) -> Option<&FinalizedRound> {
        self.rounds.front()
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
