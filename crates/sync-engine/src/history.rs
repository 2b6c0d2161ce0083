// crates/sync-engine/src/history.rs
//! Per-book sync history

use crate::error::{SyncError, SyncResult};
use crate::types::SyncHistoryEntry;
use std::collections::HashMap;
use storystream_core::BookId;

/// Append-only record of sync attempts, keyed by book
///
/// Entries are kept in the order they were written. Once a book has more
/// than `limit` entries the oldest are evicted.
#[derive(Debug, Clone)]
pub struct SyncHistoryLog {
    books: HashMap<BookId, Vec<SyncHistoryEntry>>,
    limit: usize,
}

impl SyncHistoryLog {
    /// Creates an empty log; a limit of 0 is treated as 1
    pub fn new(limit: usize) -> Self {
        Self::from_map(HashMap::new(), limit)
    }

    /// Wraps loaded history, trimming any book over the limit
    pub fn from_map(mut books: HashMap<BookId, Vec<SyncHistoryEntry>>, limit: usize) -> Self {
        let limit = limit.max(1);
        for entries in books.values_mut() {
            trim_front(entries, limit);
        }
        books.retain(|_, entries| !entries.is_empty());
        Self { books, limit }
    }

    /// Appends an entry for a book
    pub fn append(&mut self, book_id: &BookId, entry: SyncHistoryEntry) {
        let entries = self.books.entry(book_id.clone()).or_default();
        entries.push(entry);
        trim_front(entries, self.limit);
    }

    /// History for a book, oldest first
    pub fn get(&self, book_id: &BookId) -> &[SyncHistoryEntry] {
        self.books.get(book_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// One entry by its index in [`get`](Self::get)
    pub fn entry(&self, book_id: &BookId, index: usize) -> SyncResult<&SyncHistoryEntry> {
        self.get(book_id)
            .get(index)
            .ok_or_else(|| SyncError::HistoryIndex {
                book_id: book_id.to_string(),
                index,
            })
    }

    /// Drops every entry for a book, returning how many were removed
    pub fn clear(&mut self, book_id: &BookId) -> usize {
        self.books.remove(book_id).map(|e| e.len()).unwrap_or(0)
    }

    /// Underlying map, for persistence
    pub fn as_map(&self) -> &HashMap<BookId, Vec<SyncHistoryEntry>> {
        &self.books
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

fn trim_front(entries: &mut Vec<SyncHistoryEntry>, limit: usize) {
    if entries.len() > limit {
        let excess = entries.len() - limit;
        entries.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{HistoryResult, SyncReason};
    use storystream_core::{Locator, Timestamp};

    fn record(ts: i64) -> SyncHistoryEntry {
        SyncHistoryEntry::record(
            &Locator::new("ch1.xhtml").unwrap(),
            Timestamp::from_millis(ts),
            "This Device",
            None,
            SyncReason::PeriodicWhileReading,
            HistoryResult::Persisted,
        )
    }

    #[test]
    fn test_append_is_chronological() {
        let mut log = SyncHistoryLog::new(10);
        let book = BookId::new("a").unwrap();
        log.append(&book, record(1));
        log.append(&book, record(2));

        let stamps: Vec<i64> = log.get(&book).iter().map(|e| e.timestamp.as_millis()).collect();
        assert_eq!(stamps, vec![1, 2]);
    }

    #[test]
    fn test_limit_evicts_oldest() {
        let mut log = SyncHistoryLog::new(2);
        let book = BookId::new("a").unwrap();
        for ts in 1..=4 {
            log.append(&book, record(ts));
        }

        let stamps: Vec<i64> = log.get(&book).iter().map(|e| e.timestamp.as_millis()).collect();
        assert_eq!(stamps, vec![3, 4]);
    }

    #[test]
    fn test_entry_out_of_range() {
        let log = SyncHistoryLog::new(5);
        let err = log.entry(&BookId::new("a").unwrap(), 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Misuse);
    }

    #[test]
    fn test_clear() {
        let mut log = SyncHistoryLog::new(5);
        let book = BookId::new("a").unwrap();
        log.append(&book, record(1));
        assert_eq!(log.clear(&book), 1);
        assert!(log.get(&book).is_empty());
        assert_eq!(log.clear(&book), 0);
    }

    #[test]
    fn test_loaded_history_is_trimmed() {
        let book = BookId::new("a").unwrap();
        let mut map = HashMap::new();
        map.insert(book.clone(), (1..=5).map(record).collect());
        let log = SyncHistoryLog::from_map(map, 3);
        assert_eq!(log.get(&book).len(), 3);
    }
}
