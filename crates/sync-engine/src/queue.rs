// crates/sync-engine/src/queue.rs
//! In-memory pending queue

use crate::types::PendingSyncEntry;
use storystream_core::{BookId, Timestamp};

/// Ordered set of unacknowledged updates, at most one per book
///
/// Order is the order books first entered the queue. A newer update for a
/// queued book replaces the entry in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingQueue {
    entries: Vec<PendingSyncEntry>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a queue from persisted entries
    pub fn from_entries(entries: Vec<PendingSyncEntry>) -> Self {
        let mut queue = Self::new();
        for entry in entries {
            queue.upsert(entry);
        }
        queue
    }

    /// Inserts or replaces the entry for a book
    ///
    /// Returns false and leaves the queue unchanged if the queued entry is
    /// newer than `entry`.
    pub fn upsert(&mut self, entry: PendingSyncEntry) -> bool {
        match self.position(&entry.book_id) {
            Some(idx) if self.entries[idx].timestamp > entry.timestamp => false,
            Some(idx) => {
                self.entries[idx] = entry;
                true
            }
            None => {
                self.entries.push(entry);
                true
            }
        }
    }

    pub fn get(&self, book_id: &BookId) -> Option<&PendingSyncEntry> {
        self.entries.iter().find(|e| &e.book_id == book_id)
    }

    pub fn get_mut(&mut self, book_id: &BookId) -> Option<&mut PendingSyncEntry> {
        self.entries.iter_mut().find(|e| &e.book_id == book_id)
    }

    pub fn contains(&self, book_id: &BookId) -> bool {
        self.position(book_id).is_some()
    }

    /// Removes the entry for a book
    pub fn remove(&mut self, book_id: &BookId) -> Option<PendingSyncEntry> {
        self.position(book_id).map(|idx| self.entries.remove(idx))
    }

    /// Removes the entry for a book unless it is newer than `timestamp`
    pub fn remove_if_not_newer(&mut self, book_id: &BookId, timestamp: Timestamp) -> bool {
        match self.position(book_id) {
            Some(idx) if self.entries[idx].timestamp <= timestamp => {
                self.entries.remove(idx);
                true
            }
            _ => false,
        }
    }

    pub fn entries(&self) -> &[PendingSyncEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, book_id: &BookId) -> Option<usize> {
        self.entries.iter().position(|e| &e.book_id == book_id)
    }
}
