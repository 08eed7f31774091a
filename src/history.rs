//! Bounded history of recent entries, most recent first.
//!
//! Index 0 is always the newest entry; pushing past capacity evicts the
//! oldest one from the back.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct History<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> History<T> {
    /// Create an empty history. A capacity of zero is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a new entry to the front, returning the evicted oldest entry if any.
    pub fn push(&mut self, entry: T) -> Option<T> {
        self.entries.push_front(entry);
        if self.entries.len() > self.capacity {
            self.entries.pop_back()
        } else {
            None
        }
    }

    pub fn front(&self) -> Option<&T> {
        self.entries.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut T> {
        self.entries.front_mut()
    }

    pub fn back(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}
