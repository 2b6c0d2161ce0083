// crates/sync-engine/src/types.rs
//! Core sync types and data structures

use serde::{Deserialize, Serialize};
use std::fmt;
use storystream_core::{BookId, Locator, Timestamp};

/// Why a position update was produced
///
/// Recorded in history for diagnostics only; the engine never branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncReason {
    UserFlippedPage,
    UserSelectedChapter,
    UserDraggedSeekBar,
    UserPausedPlayback,
    UserStartedPlayback,
    UserSkippedForward,
    UserSkippedBackward,
    PeriodicDuringActivePlayback,
    PeriodicWhileReading,
    UserClosedBook,
    UserRestoredFromHistory,
    AppBackgrounding,
    AppTerminating,
    ConnectionRestored,
    WatchReconnected,
    InitialLoad,
    AppWokeFromSleep,
    /// Position adopted while merging the two backends
    Reconciliation,
}

impl SyncReason {
    /// All reasons, in declaration order
    pub const ALL: [SyncReason; 18] = [
        SyncReason::UserFlippedPage,
        SyncReason::UserSelectedChapter,
        SyncReason::UserDraggedSeekBar,
        SyncReason::UserPausedPlayback,
        SyncReason::UserStartedPlayback,
        SyncReason::UserSkippedForward,
        SyncReason::UserSkippedBackward,
        SyncReason::PeriodicDuringActivePlayback,
        SyncReason::PeriodicWhileReading,
        SyncReason::UserClosedBook,
        SyncReason::UserRestoredFromHistory,
        SyncReason::AppBackgrounding,
        SyncReason::AppTerminating,
        SyncReason::ConnectionRestored,
        SyncReason::WatchReconnected,
        SyncReason::InitialLoad,
        SyncReason::AppWokeFromSleep,
        SyncReason::Reconciliation,
    ];

    /// Stable camelCase name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncReason::UserFlippedPage => "userFlippedPage",
            SyncReason::UserSelectedChapter => "userSelectedChapter",
            SyncReason::UserDraggedSeekBar => "userDraggedSeekBar",
            SyncReason::UserPausedPlayback => "userPausedPlayback",
            SyncReason::UserStartedPlayback => "userStartedPlayback",
            SyncReason::UserSkippedForward => "userSkippedForward",
            SyncReason::UserSkippedBackward => "userSkippedBackward",
            SyncReason::PeriodicDuringActivePlayback => "periodicDuringActivePlayback",
            SyncReason::PeriodicWhileReading => "periodicWhileReading",
            SyncReason::UserClosedBook => "userClosedBook",
            SyncReason::UserRestoredFromHistory => "userRestoredFromHistory",
            SyncReason::AppBackgrounding => "appBackgrounding",
            SyncReason::AppTerminating => "appTerminating",
            SyncReason::ConnectionRestored => "connectionRestored",
            SyncReason::WatchReconnected => "watchReconnected",
            SyncReason::InitialLoad => "initialLoad",
            SyncReason::AppWokeFromSleep => "appWokeFromSleep",
            SyncReason::Reconciliation => "reconciliation",
        }
    }

    /// Looks a reason up by its camelCase name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|r| r.as_str() == name)
    }
}

impl fmt::Display for SyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result handed back to the producer by `sync_progress`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncOutcome {
    /// Every required backend has the position (or none was needed)
    Success,
    /// At least one backend still owes the position; it is in the pending queue
    Queued,
}

/// What happened to a sync attempt, as recorded in history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HistoryResult {
    /// All required backends confirmed the write
    ServerConfirmed,
    /// Some backend confirmed; the rest is queued
    SentToServer,
    /// No backend confirmed; the update is queued on disk
    Persisted,
    /// Book never leaves the device
    LocalOnly,
    /// A send was attempted and did not reach the backend
    Failed,
    /// A backend definitively refused the update
    Rejected,
    /// Reconciliation took this position from a backend
    RemoteAdopted,
}

impl fmt::Display for HistoryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HistoryResult::ServerConfirmed => "Confirmed",
            HistoryResult::SentToServer => "Partially sent",
            HistoryResult::Persisted => "Saved offline",
            HistoryResult::LocalOnly => "Local only",
            HistoryResult::Failed => "Failed",
            HistoryResult::Rejected => "Rejected",
            HistoryResult::RemoteAdopted => "From other device",
        };
        f.write_str(label)
    }
}

/// Which of the two remote stores a value concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendRole {
    /// Main library server
    Primary,
    /// Cloud key-value store
    Secondary,
}

impl fmt::Display for BackendRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendRole::Primary => write!(f, "primary"),
            BackendRole::Secondary => write!(f, "secondary"),
        }
    }
}

/// A position as stored by one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePosition {
    pub locator: Locator,
    pub timestamp: Timestamp,
}

impl RemotePosition {
    pub fn new(locator: Locator, timestamp: Timestamp) -> Self {
        Self { locator, timestamp }
    }
}

/// An update that at least one backend has not yet acknowledged
///
/// The queue holds at most one of these per book; a newer update for the
/// same book replaces the older one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSyncEntry {
    pub book_id: BookId,
    pub locator: Locator,
    pub timestamp: Timestamp,
    pub synced_to_primary: bool,
    pub synced_to_secondary: bool,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub last_attempt_at: Option<Timestamp>,
}

impl PendingSyncEntry {
    /// Creates an entry that no backend has acknowledged
    pub fn new(book_id: BookId, locator: Locator, timestamp: Timestamp) -> Self {
        Self {
            book_id,
            locator,
            timestamp,
            synced_to_primary: false,
            synced_to_secondary: false,
            attempt_count: 0,
            last_attempt_at: None,
        }
    }

    /// Returns true once both backends are done with this entry
    pub fn is_fully_synced(&self) -> bool {
        self.synced_to_primary && self.synced_to_secondary
    }

    /// Acknowledgement flag for one backend
    pub fn synced_to(&self, role: BackendRole) -> bool {
        match role {
            BackendRole::Primary => self.synced_to_primary,
            BackendRole::Secondary => self.synced_to_secondary,
        }
    }

    /// Sets the acknowledgement flag for one backend
    pub fn mark_synced(&mut self, role: BackendRole) {
        match role {
            BackendRole::Primary => self.synced_to_primary = true,
            BackendRole::Secondary => self.synced_to_secondary = true,
        }
    }

    /// Records that a send was tried
    pub fn record_attempt(&mut self, at: Timestamp) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt_at = Some(at);
    }
}

/// Where the best known position for a book came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PositionSource {
    /// Confirmed by a backend
    Server,
    /// Local update still waiting in the pending queue
    PendingSync,
    /// Book never leaves the device
    LocalOnly,
}

/// Best known position for a book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownPosition {
    pub locator: Locator,
    pub timestamp: Timestamp,
    pub source: PositionSource,
}

impl KnownPosition {
    pub fn new(locator: Locator, timestamp: Timestamp, source: PositionSource) -> Self {
        Self {
            locator,
            timestamp,
            source,
        }
    }

    /// Returns true if `candidate` should replace this position
    ///
    /// Newer timestamps win. On a tie a pending local update beats anything
    /// else, since it reflects what the reader last did on this device.
    pub fn is_superseded_by(&self, candidate: &KnownPosition) -> bool {
        if candidate.timestamp != self.timestamp {
            return candidate.timestamp > self.timestamp;
        }
        !(self.source == PositionSource::PendingSync
            && candidate.source != PositionSource::PendingSync)
    }
}

/// One immutable record of a sync attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistoryEntry {
    /// Timestamp of the position itself
    pub timestamp: Timestamp,
    /// When this record was written
    pub arrived_at: Timestamp,
    /// Device or backend the position came from
    pub source_identifier: String,
    /// Human-readable position, e.g. "Chapter 3 (42%)"
    pub location_description: String,
    pub reason: SyncReason,
    pub result: HistoryResult,
    /// Serialized locator, kept so the position can be restored later
    pub locator_summary: String,
}

impl SyncHistoryEntry {
    /// Builds a record for `locator`, stamping it with the current time
    pub fn record(
        locator: &Locator,
        timestamp: Timestamp,
        source_identifier: impl Into<String>,
        location_description: Option<String>,
        reason: SyncReason,
        result: HistoryResult,
    ) -> Self {
        Self {
            timestamp,
            arrived_at: Timestamp::now(),
            source_identifier: source_identifier.into(),
            location_description: location_description.unwrap_or_else(|| locator.describe()),
            reason,
            result,
            locator_summary: serde_json::to_string(locator).unwrap_or_else(|_| locator.to_string()),
        }
    }

    /// Recovers the locator this record was written for
    ///
    /// Accepts both the JSON form and the compact `href#frag@fraction` form.
    pub fn locator(&self) -> Option<Locator> {
        serde_json::from_str(&self.locator_summary)
            .ok()
            .or_else(|| Locator::parse(&self.locator_summary).ok())
    }
}

/// Counts produced by one pending-queue pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Entries that left the queue because every backend now has them
    pub synced: usize,
    /// Entries that left the queue because a backend refused them
    pub failed: usize,
}

impl DrainReport {
    /// Returns true if the pass changed anything
    pub fn has_activity(&self) -> bool {
        self.synced > 0 || self.failed > 0
    }
}

/// Outcome of a cross-backend reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// False when the secondary was disabled, unreachable, or returned nothing
    pub ran: bool,
    /// Books whose known position was taken from the secondary
    pub adopted: Vec<BookId>,
    /// Books whose stale primary copy was overwritten
    pub healed_primary: Vec<BookId>,
    /// Books whose stale secondary copy was overwritten
    pub healed_secondary: Vec<BookId>,
    /// Books already consistent on both sides
    pub unchanged: usize,
}

impl ReconcileReport {
    pub(crate) fn skipped() -> Self {
        Self::default()
    }
}
