// crates/sync-engine/src/store.rs
//! On-disk persistence for the pending queue, history and local-only set
//!
//! Writes go to a temp file in the same directory which is then renamed
//! over the target, so a crash leaves either the old or the new file.
//! Loads never fail: a missing file is empty state, a corrupt one is moved
//! aside to `<name>.corrupt` and treated as empty.

use crate::error::{SyncError, SyncResult};
use crate::types::{PendingSyncEntry, SyncHistoryEntry};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use storystream_core::BookId;
use tempfile::NamedTempFile;

/// File holding the pending queue, a JSON array in insertion order
pub const QUEUE_FILE: &str = "pending_sync_queue.json";

/// File holding the sync history, a JSON object keyed by book id
pub const HISTORY_FILE: &str = "sync_history.json";

/// File holding the ids of books that never leave the device
pub const LOCAL_ONLY_FILE: &str = "local_only_books.json";

/// Durable storage rooted at one data directory
#[derive(Debug, Clone)]
pub struct QueueStore {
    dir: PathBuf,
}

impl QueueStore {
    /// Creates a store; the directory is created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the state files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn queue_path(&self) -> PathBuf {
        self.dir.join(QUEUE_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    pub fn local_only_path(&self) -> PathBuf {
        self.dir.join(LOCAL_ONLY_FILE)
    }

    /// Loads the pending queue
    ///
    /// If the file lists a book more than once, only its newest entry is kept.
    pub fn load_queue(&self) -> Vec<PendingSyncEntry> {
        let entries: Vec<PendingSyncEntry> = self.load_or_reset(&self.queue_path());

        let mut order: Vec<BookId> = Vec::with_capacity(entries.len());
        let mut newest: HashMap<BookId, PendingSyncEntry> = HashMap::new();
        for entry in entries {
            match newest.get(&entry.book_id) {
                Some(existing) if existing.timestamp >= entry.timestamp => {
                    log::warn!("Dropping duplicate queue entry for {}", entry.book_id);
                }
                Some(_) => {
                    newest.insert(entry.book_id.clone(), entry);
                }
                None => {
                    order.push(entry.book_id.clone());
                    newest.insert(entry.book_id.clone(), entry);
                }
            }
        }

        order
            .into_iter()
            .filter_map(|id| newest.remove(&id))
            .collect()
    }

    /// Atomically replaces the queue file
    pub fn save_queue(&self, entries: &[PendingSyncEntry]) -> SyncResult<()> {
        self.write_atomic(&self.queue_path(), &entries)?;
        log::debug!("Persisted {} pending entries", entries.len());
        Ok(())
    }

    /// Loads the history of every book
    pub fn load_history(&self) -> HashMap<BookId, Vec<SyncHistoryEntry>> {
        self.load_or_reset(&self.history_path())
    }

    /// Atomically replaces the history file
    pub fn save_history(&self, history: &HashMap<BookId, Vec<SyncHistoryEntry>>) -> SyncResult<()> {
        self.write_atomic(&self.history_path(), history)
    }

    /// Loads the local-only book ids
    pub fn load_local_only(&self) -> BTreeSet<BookId> {
        self.load_or_reset(&self.local_only_path())
    }

    /// Atomically replaces the local-only file
    pub fn save_local_only(&self, books: &BTreeSet<BookId>) -> SyncResult<()> {
        self.write_atomic(&self.local_only_path(), books)
    }

    fn load_or_reset<T: DeserializeOwned + Default>(&self, path: &Path) -> T {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
            Err(e) => {
                log::warn!("Could not read {}: {}; starting empty", path.display(), e);
                return T::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("{} is corrupt ({}); starting empty", path.display(), e);
                quarantine(path);
                T::default()
            }
        }
    }

    fn write_atomic<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> SyncResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| SyncError::storage(&self.dir, e))?;

        let json = serde_json::to_vec_pretty(value)?;

        let mut temp =
            NamedTempFile::new_in(&self.dir).map_err(|e| SyncError::storage(&self.dir, e))?;
        temp.write_all(&json)
            .map_err(|e| SyncError::storage(temp.path(), e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| SyncError::storage(temp.path(), e))?;
        temp.persist(path)
            .map_err(|e| SyncError::storage(path, e.error))?;

        Ok(())
    }
}

fn quarantine(path: &Path) {
    let mut name = path.as_os_str().to_owned();
    name.push(".corrupt");
    let target = PathBuf::from(name);
    if let Err(e) = fs::rename(path, &target) {
        log::warn!("Could not move {} aside: {}", path.display(), e);
    } else {
        log::warn!("Moved unreadable state to {}", target.display());
    }
}
