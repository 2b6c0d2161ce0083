// crates/sync-engine/src/engine.rs
//! Main sync engine
//!
//! All mutable state lives behind one mutex. Operations take the lock to
//! decide what to send, release it while the backends are contacted, and
//! take it again to apply the results. Results are only applied if the
//! state they were based on has not been superseded in the meantime.

use crate::backend::{BackendSlot, ConnectivityStatus, ProgressBackend, SendOutcome};
use crate::conflict::{ConflictResolver, Resolution};
use crate::history::SyncHistoryLog;
use crate::observer::{ObserverHandle, ObserverRegistry, SyncEvent};
use crate::queue::PendingQueue;
use crate::store::QueueStore;
use crate::types::{
    BackendRole, DrainReport, HistoryResult, KnownPosition, PendingSyncEntry, PositionSource,
    ReconcileReport, RemotePosition, SyncHistoryEntry, SyncOutcome, SyncReason,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use storystream_config::Config;
use storystream_core::{BookId, Locator, Timestamp};

/// Configuration for the sync engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the queue, history and local-only files
    pub data_dir: PathBuf,
    /// Source identifier written to history for local updates
    pub device_name: String,
    /// Upper bound on any single backend call
    pub backend_timeout: Duration,
    /// Skip sends whose position is already confirmed
    pub dedupe_enabled: bool,
    /// History entries kept per book
    pub history_limit: usize,
}

impl EngineConfig {
    /// Default settings rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            device_name: "This Device".to_string(),
            backend_timeout: Duration::from_secs(10),
            dedupe_enabled: true,
            history_limit: 100,
        }
    }

    /// Takes the engine settings from the application config
    pub fn from_config(config: &Config, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            device_name: config.app.device_name.clone(),
            backend_timeout: config.sync.backend_timeout(),
            dedupe_enabled: config.sync.dedupe_enabled,
            history_limit: config.sync.history_limit_per_book,
        }
    }
}

/// Snapshot of the engine for status displays
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub pending: usize,
    /// `None` when no primary backend is configured
    pub primary: Option<ConnectivityStatus>,
    /// `None` when the secondary integration is disabled
    pub secondary: Option<ConnectivityStatus>,
    pub last_drain_at: Option<Timestamp>,
    pub last_reconcile_at: Option<Timestamp>,
    pub draining: bool,
}

type DrainCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// What happened to one backend during an operation
#[derive(Debug, Clone, PartialEq)]
enum Delivery {
    /// Backend absent or already holds this entry
    NotNeeded,
    /// Backend not connected; nothing was sent
    Unreachable,
    Sent(SendOutcome),
}

impl Delivery {
    fn confirmed(&self) -> bool {
        matches!(self, Delivery::NotNeeded | Delivery::Sent(SendOutcome::Success))
    }

    fn reached(&self) -> bool {
        matches!(self, Delivery::Sent(SendOutcome::Success))
    }

    fn attempted(&self) -> bool {
        matches!(self, Delivery::Sent(_))
    }
}

/// Mutable engine state; files are loaded on first use
struct EngineState {
    store: QueueStore,
    history_limit: usize,
    queue: Option<PendingQueue>,
    history: Option<SyncHistoryLog>,
    local_only: Option<BTreeSet<BookId>>,
    known: HashMap<BookId, KnownPosition>,
    confirmed_primary: HashMap<BookId, RemotePosition>,
    confirmed_secondary: HashMap<BookId, RemotePosition>,
    last_drain_at: Option<Timestamp>,
    last_reconcile_at: Option<Timestamp>,
}

impl EngineState {
    fn new(store: QueueStore, history_limit: usize) -> Self {
        Self {
            store,
            history_limit,
            queue: None,
            history: None,
            local_only: None,
            known: HashMap::new(),
            confirmed_primary: HashMap::new(),
            confirmed_secondary: HashMap::new(),
            last_drain_at: None,
            last_reconcile_at: None,
        }
    }

    fn queue(&mut self) -> &mut PendingQueue {
        if self.queue.is_none() {
            let entries = self.store.load_queue();
            for entry in &entries {
                self.known.entry(entry.book_id.clone()).or_insert_with(|| {
                    KnownPosition::new(
                        entry.locator.clone(),
                        entry.timestamp,
                        PositionSource::PendingSync,
                    )
                });
            }
            log::debug!("Loaded {} pending entries", entries.len());
            self.queue = Some(PendingQueue::from_entries(entries));
        }
        self.queue.get_or_insert_with(PendingQueue::new)
    }

    fn history(&mut self) -> &mut SyncHistoryLog {
        if self.history.is_none() {
            let loaded = self.store.load_history();
            self.history = Some(SyncHistoryLog::from_map(loaded, self.history_limit));
        }
        let limit = self.history_limit;
        self.history.get_or_insert_with(|| SyncHistoryLog::new(limit))
    }

    fn local_only(&mut self) -> &mut BTreeSet<BookId> {
        if self.local_only.is_none() {
            self.local_only = Some(self.store.load_local_only());
        }
        self.local_only.get_or_insert_with(BTreeSet::new)
    }

    fn is_local_only(&mut self, book_id: &BookId) -> bool {
        self.local_only().contains(book_id)
    }

    fn persist_queue(&mut self) {
        self.queue();
        if let Some(queue) = &self.queue {
            if let Err(e) = self.store.save_queue(queue.entries()) {
                log::warn!("Pending queue kept in memory only: {}", e);
            }
        }
    }

    fn persist_history(&mut self) {
        self.history();
        if let Some(history) = &self.history {
            if let Err(e) = self.store.save_history(history.as_map()) {
                log::warn!("Sync history kept in memory only: {}", e);
            }
        }
    }

    fn persist_local_only(&mut self) {
        self.local_only();
        if let Some(books) = &self.local_only {
            if let Err(e) = self.store.save_local_only(books) {
                log::warn!("Local-only list kept in memory only: {}", e);
            }
        }
    }

    fn confirmed(&self, role: BackendRole) -> &HashMap<BookId, RemotePosition> {
        match role {
            BackendRole::Primary => &self.confirmed_primary,
            BackendRole::Secondary => &self.confirmed_secondary,
        }
    }

    /// Records a backend-confirmed position unless a newer one is known
    fn record_confirmed(&mut self, role: BackendRole, book_id: &BookId, position: RemotePosition) {
        let map = match role {
            BackendRole::Primary => &mut self.confirmed_primary,
            BackendRole::Secondary => &mut self.confirmed_secondary,
        };
        match map.get(book_id) {
            Some(existing) if existing.timestamp > position.timestamp => {}
            _ => {
                map.insert(book_id.clone(), position);
            }
        }
    }

    /// Newest position any backend has confirmed for a book
    fn newest_confirmed(&self, book_id: &BookId) -> Option<&RemotePosition> {
        let primary = self.confirmed_primary.get(book_id);
        let secondary = self.confirmed_secondary.get(book_id);
        match (primary, secondary) {
            (Some(p), Some(s)) => Some(if s.timestamp > p.timestamp { s } else { p }),
            (p, s) => p.or(s),
        }
    }

    fn is_duplicate(&mut self, book_id: &BookId, locator: &Locator) -> bool {
        let confirmed_same = self
            .newest_confirmed(book_id)
            .map(|c| c.locator.same_position(locator))
            .unwrap_or(false);
        if !confirmed_same {
            return false;
        }
        match self.queue().get(book_id) {
            Some(pending) => pending.locator.same_position(locator),
            None => true,
        }
    }

    /// Replaces the known position if `candidate` supersedes it
    fn offer_known(&mut self, book_id: &BookId, candidate: KnownPosition) -> Option<SyncEvent> {
        if let Some(current) = self.known.get(book_id) {
            if !current.is_superseded_by(&candidate) {
                return None;
            }
        }
        self.known.insert(book_id.clone(), candidate.clone());
        Some(SyncEvent::ProgressChanged {
            book_id: book_id.clone(),
            position: candidate,
        })
    }

    /// Re-labels a pending known position once its entry has left the queue
    fn settle_known(
        &mut self,
        book_id: &BookId,
        timestamp: Timestamp,
        source: PositionSource,
    ) -> Option<SyncEvent> {
        let current = self.known.get_mut(book_id)?;
        if current.timestamp != timestamp || current.source != PositionSource::PendingSync {
            return None;
        }
        current.source = source;
        Some(SyncEvent::ProgressChanged {
            book_id: book_id.clone(),
            position: current.clone(),
        })
    }

    /// Falls back to the newest backend-confirmed position after a pending
    /// value was rejected everywhere it was sent
    ///
    /// With nothing confirmed the book has no known position; the rejected
    /// value remains in history.
    fn revert_known(&mut self, book_id: &BookId, timestamp: Timestamp) -> Option<SyncEvent> {
        let current = self.known.get(book_id)?;
        if current.timestamp != timestamp || current.source != PositionSource::PendingSync {
            return None;
        }
        match self.newest_confirmed(book_id).cloned() {
            Some(confirmed) => {
                let position =
                    KnownPosition::new(confirmed.locator, confirmed.timestamp, PositionSource::Server);
                self.known.insert(book_id.clone(), position.clone());
                Some(SyncEvent::ProgressChanged {
                    book_id: book_id.clone(),
                    position,
                })
            }
            None => {
                self.known.remove(book_id);
                None
            }
        }
    }

    fn append_history(&mut self, book_id: &BookId, entry: SyncHistoryEntry) {
        self.history().append(book_id, entry);
    }
}

/// Clears the draining flag when a drain pass ends, however it ends
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Main synchronization engine
pub struct SyncEngine {
    config: EngineConfig,
    primary: Option<BackendSlot>,
    secondary: Option<BackendSlot>,
    state: Mutex<EngineState>,
    observers: ObserverRegistry,
    drain_summary: Mutex<Option<DrainCallback>>,
    draining: AtomicBool,
    resolver: ConflictResolver,
}

impl SyncEngine {
    /// Creates an engine with no backends attached
    pub fn new(config: EngineConfig) -> Self {
        let store = QueueStore::new(config.data_dir.clone());
        let state = EngineState::new(store, config.history_limit);
        Self {
            config,
            primary: None,
            secondary: None,
            state: Mutex::new(state),
            observers: ObserverRegistry::new(),
            drain_summary: Mutex::new(None),
            draining: AtomicBool::new(false),
            resolver: ConflictResolver::new(),
        }
    }

    /// Attaches the primary backend
    pub fn with_primary(mut self, backend: Arc<dyn ProgressBackend>) -> Self {
        self.primary = Some(BackendSlot::new(
            BackendRole::Primary,
            backend,
            self.config.backend_timeout,
        ));
        self
    }

    /// Attaches the secondary backend, enabling the secondary integration
    pub fn with_secondary(mut self, backend: Arc<dyn ProgressBackend>) -> Self {
        self.secondary = Some(BackendSlot::new(
            BackendRole::Secondary,
            backend,
            self.config.backend_timeout,
        ));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            log::warn!("Engine state lock was poisoned; continuing with last state");
            poisoned.into_inner()
        })
    }

    fn slot(&self, role: BackendRole) -> Option<&BackendSlot> {
        match role {
            BackendRole::Primary => self.primary.as_ref(),
            BackendRole::Secondary => self.secondary.as_ref(),
        }
    }

    fn notify_all(&self, events: Vec<SyncEvent>) {
        for event in &events {
            self.observers.notify(event);
        }
    }

    async fn deliver(
        slot: Option<&BackendSlot>,
        book_id: &BookId,
        locator: &Locator,
        timestamp: Timestamp,
    ) -> Delivery {
        match slot {
            None => Delivery::NotNeeded,
            Some(slot) if !slot.is_connected() => Delivery::Unreachable,
            Some(slot) => Delivery::Sent(slot.send(book_id, locator, timestamp).await),
        }
    }

    /// Pushes a local position update to the backends
    ///
    /// Returns `Success` when every required backend has the position (or
    /// none was needed) and `Queued` when it was left for a later drain.
    pub async fn sync_progress(
        &self,
        book_id: &BookId,
        locator: &Locator,
        timestamp: Timestamp,
        reason: SyncReason,
    ) -> SyncOutcome {
        self.sync_with_description(book_id, locator, timestamp, reason, None, false)
            .await
    }

    async fn sync_with_description(
        &self,
        book_id: &BookId,
        locator: &Locator,
        timestamp: Timestamp,
        reason: SyncReason,
        description: Option<String>,
        force: bool,
    ) -> SyncOutcome {
        {
            let mut state = self.state();

            if !force && self.config.dedupe_enabled && state.is_duplicate(book_id, locator) {
                log::debug!("Skipping unchanged position for {} ({})", book_id, reason);
                return SyncOutcome::Success;
            }

            if state.is_local_only(book_id) {
                let mut events = Vec::new();
                if state.queue().remove(book_id).is_some() {
                    state.persist_queue();
                    events.push(SyncEvent::QueueChanged {
                        pending: state.queue().len(),
                    });
                }
                let candidate =
                    KnownPosition::new(locator.clone(), timestamp, PositionSource::LocalOnly);
                events.extend(state.offer_known(book_id, candidate));
                state.append_history(
                    book_id,
                    SyncHistoryEntry::record(
                        locator,
                        timestamp,
                        &self.config.device_name,
                        description,
                        reason,
                        HistoryResult::LocalOnly,
                    ),
                );
                state.persist_history();
                drop(state);
                self.notify_all(events);
                return SyncOutcome::Success;
            }
        }

        let (primary, secondary) = tokio::join!(
            Self::deliver(self.primary.as_ref(), book_id, locator, timestamp),
            Self::deliver(self.secondary.as_ref(), book_id, locator, timestamp),
        );

        for (role, delivery) in [(BackendRole::Primary, &primary), (BackendRole::Secondary, &secondary)] {
            if let Delivery::Sent(SendOutcome::Failure(message)) = delivery {
                log::warn!("{} backend rejected {}: {}", role, book_id, message);
            }
        }

        let remote = RemotePosition::new(locator.clone(), timestamp);
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.state();

            for (role, delivery) in [(BackendRole::Primary, &primary), (BackendRole::Secondary, &secondary)] {
                if delivery.reached() {
                    state.record_confirmed(role, book_id, remote.clone());
                }
            }

            let (outcome, source, result) = if primary.confirmed() && secondary.confirmed() {
                if state.queue().remove_if_not_newer(book_id, timestamp) {
                    state.persist_queue();
                    events.push(SyncEvent::QueueChanged {
                        pending: state.queue().len(),
                    });
                }
                (
                    SyncOutcome::Success,
                    PositionSource::Server,
                    HistoryResult::ServerConfirmed,
                )
            } else {
                let mut entry = PendingSyncEntry::new(book_id.clone(), locator.clone(), timestamp);
                if primary.confirmed() {
                    entry.mark_synced(BackendRole::Primary);
                }
                if secondary.confirmed() {
                    entry.mark_synced(BackendRole::Secondary);
                }
                if primary.attempted() || secondary.attempted() {
                    entry.record_attempt(Timestamp::now());
                }

                if state.queue().upsert(entry) {
                    state.persist_queue();
                    events.push(SyncEvent::QueueChanged {
                        pending: state.queue().len(),
                    });
                } else {
                    log::debug!("Newer update for {} already queued", book_id);
                }

                let result = if primary.reached() || secondary.reached() {
                    HistoryResult::SentToServer
                } else {
                    HistoryResult::Persisted
                };
                (SyncOutcome::Queued, PositionSource::PendingSync, result)
            };

            let candidate = KnownPosition::new(locator.clone(), timestamp, source);
            events.extend(state.offer_known(book_id, candidate));
            state.append_history(
                book_id,
                SyncHistoryEntry::record(
                    locator,
                    timestamp,
                    &self.config.device_name,
                    description,
                    reason,
                    result,
                ),
            );
            state.persist_history();
            outcome
        };

        log::debug!("Sync of {} ({}) -> {:?}", book_id, reason, outcome);
        self.notify_all(events);
        outcome
    }

    /// Re-applies a historical position as a fresh update
    ///
    /// The position is sent even if a backend already confirmed it.
    pub async fn restore_position(
        &self,
        book_id: &BookId,
        locator: &Locator,
        description: Option<String>,
    ) -> SyncOutcome {
        log::info!("Restoring {} to {}", book_id, locator);
        self.sync_with_description(
            book_id,
            locator,
            Timestamp::now(),
            SyncReason::UserRestoredFromHistory,
            description,
            true,
        )
        .await
    }

    /// Restores the position stored in one history entry
    ///
    /// Returns `None` if the index is out of range or the stored locator
    /// cannot be read back.
    pub async fn restore_history_entry(&self, book_id: &BookId, index: usize) -> Option<SyncOutcome> {
        let (locator, description) = {
            let mut state = self.state();
            let entry = match state.history().entry(book_id, index) {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("Nothing to restore: {}", e);
                    return None;
                }
            };
            match entry.locator() {
                Some(locator) => (locator, entry.location_description.clone()),
                None => {
                    log::warn!("History entry {} for {} has no readable locator", index, book_id);
                    return None;
                }
            }
        };

        Some(self.restore_position(book_id, &locator, Some(description)).await)
    }

    async fn redeliver(
        &self,
        role: BackendRole,
        entry: &PendingSyncEntry,
    ) -> Delivery {
        if entry.synced_to(role) {
            return Delivery::NotNeeded;
        }
        Self::deliver(self.slot(role), &entry.book_id, &entry.locator, entry.timestamp).await
    }

    /// Retries every queued update against the backends that still owe it
    ///
    /// A definitive rejection stops retrying that backend for the entry and
    /// counts as failed; the position stays restorable from history. Every
    /// entry that leaves the queue counts as synced. A call made while another
    /// pass is running returns an empty report.
    pub async fn sync_pending_queue(&self) -> DrainReport {
        if self.draining.swap(true, Ordering::AcqRel) {
            log::debug!("Queue drain already in progress");
            return DrainReport::default();
        }
        let _guard = DrainGuard(&self.draining);

        let snapshot: Vec<PendingSyncEntry> = {
            let mut state = self.state();
            state.queue().entries().to_vec()
        };

        let mut report = DrainReport::default();
        let mut events = Vec::new();

        for entry in snapshot {
            let book_id = entry.book_id.clone();

            {
                let mut state = self.state();
                if state.is_local_only(&book_id) {
                    if state.queue().remove(&book_id).is_some() {
                        report.synced += 1;
                        events.extend(state.settle_known(
                            &book_id,
                            entry.timestamp,
                            PositionSource::LocalOnly,
                        ));
                    }
                    continue;
                }
            }

            let (primary, secondary) = tokio::join!(
                self.redeliver(BackendRole::Primary, &entry),
                self.redeliver(BackendRole::Secondary, &entry),
            );

            let mut state = self.state();
            let now = Timestamp::now();
            let remote = RemotePosition::new(entry.locator.clone(), entry.timestamp);
            let mut rejected = false;

            for (role, delivery) in [(BackendRole::Primary, &primary), (BackendRole::Secondary, &secondary)] {
                let backend = self.slot(role).map(|s| s.name().to_string()).unwrap_or_default();
                match delivery {
                    Delivery::Sent(SendOutcome::Success) => {
                        state.record_confirmed(role, &book_id, remote.clone());
                    }
                    Delivery::Sent(SendOutcome::Failure(message)) => {
                        log::warn!("{} rejected queued update for {}: {}", backend, book_id, message);
                        rejected = true;
                        report.failed += 1;
                        state.append_history(
                            &book_id,
                            SyncHistoryEntry::record(
                                &entry.locator,
                                entry.timestamp,
                                backend,
                                None,
                                SyncReason::ConnectionRestored,
                                HistoryResult::Rejected,
                            ),
                        );
                    }
                    Delivery::Sent(SendOutcome::NoConnection) => {
                        state.append_history(
                            &book_id,
                            SyncHistoryEntry::record(
                                &entry.locator,
                                entry.timestamp,
                                backend,
                                None,
                                SyncReason::ConnectionRestored,
                                HistoryResult::Failed,
                            ),
                        );
                    }
                    Delivery::NotNeeded | Delivery::Unreachable => {}
                }
            }

            let fully_synced = {
                let queue = state.queue();
                let current = match queue.get_mut(&book_id) {
                    Some(current) if current.timestamp == entry.timestamp => current,
                    // Removed or replaced while the sends were in flight
                    _ => continue,
                };
                if primary.attempted() || secondary.attempted() {
                    current.record_attempt(now);
                }
                for (role, delivery) in [(BackendRole::Primary, &primary), (BackendRole::Secondary, &secondary)] {
                    match delivery {
                        Delivery::NotNeeded
                        | Delivery::Sent(SendOutcome::Success)
                        | Delivery::Sent(SendOutcome::Failure(_)) => current.mark_synced(role),
                        _ => {}
                    }
                }
                current.is_fully_synced()
            };

            if fully_synced {
                state.queue().remove(&book_id);
                report.synced += 1;

                let confirmed_somewhere = [BackendRole::Primary, BackendRole::Secondary]
                    .iter()
                    .any(|role| {
                        state
                            .confirmed(*role)
                            .get(&book_id)
                            .map(|c| c.timestamp == entry.timestamp)
                            .unwrap_or(false)
                    });
                if confirmed_somewhere {
                    state.append_history(
                        &book_id,
                        SyncHistoryEntry::record(
                            &entry.locator,
                            entry.timestamp,
                            &self.config.device_name,
                            None,
                            SyncReason::ConnectionRestored,
                            HistoryResult::ServerConfirmed,
                        ),
                    );
                    events.extend(state.settle_known(&book_id, entry.timestamp, PositionSource::Server));
                } else if rejected {
                    events.extend(state.revert_known(&book_id, entry.timestamp));
                } else {
                    // No backend attached to send to
                    events.extend(state.settle_known(
                        &book_id,
                        entry.timestamp,
                        PositionSource::LocalOnly,
                    ));
                }
            }
        }

        {
            let mut state = self.state();
            state.persist_queue();
            state.persist_history();
            state.last_drain_at = Some(Timestamp::now());
            events.push(SyncEvent::QueueChanged {
                pending: state.queue().len(),
            });
        }

        if report.has_activity() {
            log::info!(
                "Queue drain: {} synced, {} failed",
                report.synced,
                report.failed
            );
        }

        events.push(SyncEvent::QueueDrained {
            synced: report.synced,
            failed: report.failed,
        });
        self.notify_all(events);

        if report.has_activity() {
            let callback = self
                .drain_summary
                .lock()
                .map(|c| c.clone())
                .unwrap_or_else(|e| e.into_inner().clone());
            if let Some(callback) = callback {
                callback(report.synced, report.failed);
            }
        }

        report
    }

    /// Merges the primary and secondary position sets, newest timestamp wins
    ///
    /// Runs only when the secondary is attached and connected. Books the
    /// device is still trying to push (a pending entry at least as new as the
    /// remote value) are left to the queue.
    pub async fn reconcile_with_secondary(&self) -> ReconcileReport {
        let secondary = match &self.secondary {
            Some(slot) if slot.is_connected() => slot,
            Some(_) => {
                log::debug!("Secondary not connected; skipping reconciliation");
                return ReconcileReport::skipped();
            }
            None => return ReconcileReport::skipped(),
        };

        let remote = match secondary.fetch_all().await {
            Some(remote) => remote,
            None => {
                log::warn!("{} returned no positions; skipping reconciliation", secondary.name());
                return ReconcileReport::skipped();
            }
        };

        let primary_live = match &self.primary {
            Some(slot) if slot.is_connected() => slot.fetch_all().await,
            _ => None,
        };

        let primary_view = {
            let mut state = self.state();
            if let Some(live) = primary_live {
                for (book_id, position) in live {
                    state.record_confirmed(BackendRole::Primary, &book_id, position);
                }
            }
            state.confirmed(BackendRole::Primary).clone()
        };

        let plan = self.resolver.plan(&primary_view, &remote);
        let mut report = ReconcileReport {
            ran: true,
            ..ReconcileReport::default()
        };
        let mut events = Vec::new();

        for (book_id, resolution) in plan {
            match resolution {
                Resolution::Unchanged => {
                    report.unchanged += 1;
                }
                Resolution::AdoptSecondary(position) => {
                    let adopted = {
                        let mut state = self.state();
                        if state.is_local_only(&book_id) {
                            continue;
                        }
                        if state
                            .queue()
                            .get(&book_id)
                            .map(|p| p.timestamp >= position.timestamp)
                            .unwrap_or(false)
                        {
                            continue;
                        }

                        state.record_confirmed(BackendRole::Secondary, &book_id, position.clone());
                        let stale = state
                            .queue()
                            .get(&book_id)
                            .map(|p| p.timestamp < position.timestamp)
                            .unwrap_or(false);
                        if stale {
                            state.queue().remove(&book_id);
                        }

                        let candidate = KnownPosition::new(
                            position.locator.clone(),
                            position.timestamp,
                            PositionSource::Server,
                        );
                        match state.offer_known(&book_id, candidate) {
                            Some(event) => {
                                events.push(event);
                                state.append_history(
                                    &book_id,
                                    SyncHistoryEntry::record(
                                        &position.locator,
                                        position.timestamp,
                                        secondary.name(),
                                        None,
                                        SyncReason::Reconciliation,
                                        HistoryResult::RemoteAdopted,
                                    ),
                                );
                                true
                            }
                            None => false,
                        }
                    };
                    if adopted {
                        report.adopted.push(book_id.clone());
                    }

                    let healed = Self::deliver(
                        self.primary.as_ref(),
                        &book_id,
                        &position.locator,
                        position.timestamp,
                    )
                    .await;
                    if healed.reached() {
                        self.state()
                            .record_confirmed(BackendRole::Primary, &book_id, position);
                        report.healed_primary.push(book_id);
                    }
                }
                Resolution::HealSecondary(position) => {
                    if self.state().is_local_only(&book_id) {
                        continue;
                    }
                    let healed = Self::deliver(
                        Some(secondary),
                        &book_id,
                        &position.locator,
                        position.timestamp,
                    )
                    .await;
                    if healed.reached() {
                        self.state()
                            .record_confirmed(BackendRole::Secondary, &book_id, position);
                        report.healed_secondary.push(book_id);
                    }
                }
            }
        }

        {
            let mut state = self.state();
            state.persist_queue();
            state.persist_history();
            state.last_reconcile_at = Some(Timestamp::now());
            events.push(SyncEvent::QueueChanged {
                pending: state.queue().len(),
            });
        }

        log::info!(
            "Reconciled with {}: {} adopted, {} healed on primary, {} healed on secondary, {} unchanged",
            secondary.name(),
            report.adopted.len(),
            report.healed_primary.len(),
            report.healed_secondary.len(),
            report.unchanged
        );

        events.push(SyncEvent::Reconciled(report.clone()));
        self.notify_all(events);
        report
    }

    /// Probes every backend and caches the results
    ///
    /// Returns true if any backend came back online.
    pub async fn refresh_connectivity(&self) -> bool {
        let (primary, secondary) = tokio::join!(
            async {
                match &self.primary {
                    Some(slot) => Some(slot.refresh().await),
                    None => None,
                }
            },
            async {
                match &self.secondary {
                    Some(slot) => Some(slot.refresh().await),
                    None => None,
                }
            },
        );

        let mut restored = false;
        let mut events = Vec::new();
        for (role, change) in [(BackendRole::Primary, primary), (BackendRole::Secondary, secondary)] {
            if let Some((previous, current)) = change {
                if previous != current {
                    restored |= current.is_connected();
                    events.push(SyncEvent::ConnectivityChanged {
                        role,
                        status: current,
                    });
                }
            }
        }
        self.notify_all(events);
        restored
    }

    /// Feeds a position read from a backend into the caches
    ///
    /// Returns true if it became the book's known position.
    pub fn apply_remote_position(
        &self,
        book_id: &BookId,
        origin: BackendRole,
        locator: &Locator,
        timestamp: Timestamp,
    ) -> bool {
        let event = {
            let mut state = self.state();
            state.record_confirmed(origin, book_id, RemotePosition::new(locator.clone(), timestamp));
            if state.is_local_only(book_id) {
                None
            } else {
                state.queue();
                let candidate = KnownPosition::new(locator.clone(), timestamp, PositionSource::Server);
                state.offer_known(book_id, candidate)
            }
        };

        let changed = event.is_some();
        self.notify_all(event.into_iter().collect());
        changed
    }

    /// Best known position for a book
    pub fn get_book_progress(&self, book_id: &BookId) -> Option<KnownPosition> {
        let mut state = self.state();
        state.queue();
        state.known.get(book_id).cloned()
    }

    /// Best known position for every book
    pub fn get_all_book_progress(&self) -> HashMap<BookId, KnownPosition> {
        let mut state = self.state();
        state.queue();
        state.known.clone()
    }

    /// History for a book, oldest first
    pub fn get_sync_history(&self, book_id: &BookId) -> Vec<SyncHistoryEntry> {
        self.state().history().get(book_id).to_vec()
    }

    /// Drops a book's history, returning how many entries were removed
    pub fn clear_sync_history(&self, book_id: &BookId) -> usize {
        let removed = {
            let mut state = self.state();
            let removed = state.history().clear(book_id);
            state.persist_history();
            removed
        };
        self.observers.notify(&SyncEvent::HistoryCleared {
            book_id: book_id.clone(),
        });
        removed
    }

    /// Queued updates in queue order
    pub fn pending_entries(&self) -> Vec<PendingSyncEntry> {
        self.state().queue().entries().to_vec()
    }

    pub fn pending_count(&self) -> usize {
        self.state().queue().len()
    }

    pub fn is_pending(&self, book_id: &BookId) -> bool {
        self.state().queue().contains(book_id)
    }

    /// Marks a book as never leaving the device, or clears the mark
    ///
    /// Marking a book drops its pending entry.
    pub fn set_local_only(&self, book_id: &BookId, local_only: bool) {
        let mut events = Vec::new();
        {
            let mut state = self.state();
            let changed = if local_only {
                state.local_only().insert(book_id.clone())
            } else {
                state.local_only().remove(book_id)
            };
            if changed {
                state.persist_local_only();
            }
            if local_only {
                if let Some(entry) = state.queue().remove(book_id) {
                    state.persist_queue();
                    events.extend(state.settle_known(
                        book_id,
                        entry.timestamp,
                        PositionSource::LocalOnly,
                    ));
                    events.push(SyncEvent::QueueChanged {
                        pending: state.queue().len(),
                    });
                }
            }
        }
        self.notify_all(events);
    }

    pub fn is_local_only(&self, book_id: &BookId) -> bool {
        self.state().is_local_only(book_id)
    }

    /// Current status snapshot
    pub fn status(&self) -> EngineStatus {
        let mut state = self.state();
        EngineStatus {
            pending: state.queue().len(),
            primary: self.primary.as_ref().map(BackendSlot::status),
            secondary: self.secondary.as_ref().map(BackendSlot::status),
            last_drain_at: state.last_drain_at,
            last_reconcile_at: state.last_reconcile_at,
            draining: self.draining.load(Ordering::Acquire),
        }
    }

    /// Registers a listener for every state change
    pub fn add_observer<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.observers.add(observer)
    }

    /// Unregisters a listener
    pub fn remove_observer(&self, handle: ObserverHandle) -> bool {
        self.observers.remove(handle)
    }

    /// Sets the callback run with `(synced, failed)` after a drain that did something
    pub fn on_drain_summary<F>(&self, callback: F)
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        let mut slot = self.drain_summary.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(callback));
    }
}
