// crates/sync-engine/src/lib.rs
//! Reading-progress synchronization engine
//!
//! Keeps a book's reading position consistent between this device and two
//! remote stores (a primary library server and an optional secondary cloud
//! store) while tolerating either being offline:
//! - Concurrent best-effort sends with a bounded timeout per backend
//! - A crash-safe pending queue holding at most one update per book
//! - Opportunistic retries and a last-writer-wins merge of the two backends
//! - A per-book history of every attempt, usable for manual restore
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use storystream_core::{BookId, Locator, Timestamp};
//! use storystream_sync_engine::{EngineConfig, MemoryBackend, SyncEngine, SyncOutcome, SyncReason};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempfile::tempdir()?;
//! let engine = SyncEngine::new(EngineConfig::new(dir.path()))
//!     .with_primary(Arc::new(MemoryBackend::new("library")));
//! engine.refresh_connectivity().await;
//!
//! let book = BookId::new("book-1")?;
//! let locator = Locator::new("ch2.xhtml")?.with_fragments(["p10"]);
//! let outcome = engine
//!     .sync_progress(&book, &locator, Timestamp::from_millis(1000), SyncReason::UserPausedPlayback)
//!     .await;
//!
//! assert_eq!(outcome, SyncOutcome::Success);
//! # Ok(())
//! # }
//! ```

mod backend;
mod conflict;
mod engine;
mod error;
mod history;
mod memory;
mod monitor;
mod observer;
mod queue;
mod store;
mod types;

pub use backend::{BackendSlot, ConnectivityStatus, ProgressBackend, SendOutcome};
pub use conflict::{ConflictResolver, Resolution};
pub use engine::{EngineConfig, EngineStatus, SyncEngine};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use history::SyncHistoryLog;
pub use memory::MemoryBackend;
pub use monitor::{BackgroundTask, ConnectivityMonitor, RetryScheduler};
pub use observer::{ObserverHandle, ObserverRegistry, SyncEvent};
pub use queue::PendingQueue;
pub use store::{QueueStore, HISTORY_FILE, LOCAL_ONLY_FILE, QUEUE_FILE};
pub use types::{
    BackendRole, DrainReport, HistoryResult, KnownPosition, PendingSyncEntry, PositionSource,
    ReconcileReport, RemotePosition, SyncHistoryEntry, SyncOutcome, SyncReason,
};
