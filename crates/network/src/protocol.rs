// crates/network/src/protocol.rs
//! Wire format shared by the progress backends

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use storystream_core::{BookId, Locator, Timestamp};
use storystream_sync_engine::RemotePosition;

/// One book's position as sent to and returned by a backend
///
/// ```json
/// {"bookId": "book-1", "locator": {"href": "ch2.xhtml", "fragments": ["p10"],
///  "totalProgression": 0.42}, "timestamp": 1000, "device": "Kitchen tablet"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub book_id: BookId,
    pub locator: Locator,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl ProgressRecord {
    pub fn new(book_id: BookId, locator: Locator, timestamp: Timestamp) -> Self {
        Self {
            book_id,
            locator,
            timestamp,
            device: None,
        }
    }

    /// Tags the record with the sending device
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn into_remote(self) -> (BookId, RemotePosition) {
        (self.book_id, RemotePosition::new(self.locator, self.timestamp))
    }
}

/// Collects records into a map, keeping the newest record per book
pub fn records_to_map(records: Vec<ProgressRecord>) -> HashMap<BookId, RemotePosition> {
    let mut map: HashMap<BookId, RemotePosition> = HashMap::new();
    for record in records {
        let (book_id, position) = record.into_remote();
        match map.get(&book_id) {
            Some(existing) if existing.timestamp >= position.timestamp => {}
            _ => {
                map.insert(book_id, position);
            }
        }
    }
    map
}
