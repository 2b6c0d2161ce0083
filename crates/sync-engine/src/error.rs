// crates/sync-engine/src/error.rs
//! Error types for sync operations
//!
//! Errors stay inside the engine: public operations log them and return a
//! result value instead. [`ErrorKind`] decides what happens to the update
//! that hit the error.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// How an error affects the update that caused it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connectivity problem; the update stays queued and is retried
    Transient,
    /// The remote refused the update; it is not retried
    Rejected,
    /// Local disk problem; the engine carries on in memory
    Durability,
    /// Caller asked for something that does not exist
    Misuse,
}

/// Errors that can occur during synchronization
#[derive(Debug, Error)]
pub enum SyncError {
    /// Backend could not be reached (timeout, DNS, offline)
    #[error("{backend} unreachable: {message}")]
    Unreachable { backend: String, message: String },

    /// Backend answered and refused the update (conflict, not found, unauthorized)
    #[error("{backend} rejected update: {reason}")]
    Rejected { backend: String, reason: String },

    /// Reading or writing a state file failed
    #[error("Storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A history index outside the stored range
    #[error("No history entry {index} for book {book_id}")]
    HistoryIndex { book_id: String, index: usize },

    /// Invalid sync data
    #[error("Invalid sync data: {0}")]
    InvalidData(String),
}

impl SyncError {
    /// Classifies the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Unreachable { .. } => ErrorKind::Transient,
            SyncError::Rejected { .. } => ErrorKind::Rejected,
            SyncError::Storage { .. } | SyncError::Serialization(_) => ErrorKind::Durability,
            SyncError::HistoryIndex { .. } | SyncError::InvalidData(_) => ErrorKind::Misuse,
        }
    }

    /// Returns true if the operation may succeed when retried
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Storage {
            path: path.into(),
            source,
        }
    }
}

impl From<storystream_core::CoreError> for SyncError {
    fn from(err: storystream_core::CoreError) -> Self {
        SyncError::InvalidData(err.to_string())
    }
}
