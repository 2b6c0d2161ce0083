// crates/sync-engine/src/memory.rs
//! In-memory backend for tests and offline development

use crate::backend::{ConnectivityStatus, ProgressBackend, SendOutcome};
use crate::types::RemotePosition;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use storystream_core::{BookId, Locator, Timestamp};

#[derive(Debug)]
struct MemoryState {
    connectivity: ConnectivityStatus,
    default_outcome: SendOutcome,
    scripted: VecDeque<SendOutcome>,
    delay: Option<Duration>,
    bulk_fetch: bool,
    fetch_fails: bool,
    stored: HashMap<BookId, RemotePosition>,
    sends: Vec<(BookId, Locator, Timestamp)>,
}

/// A backend that keeps positions in a map
///
/// Connectivity and send outcomes can be scripted. Every send is recorded,
/// and only successful ones change the stored state.
#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// A connected backend that accepts every send
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState {
                connectivity: ConnectivityStatus::Connected,
                default_outcome: SendOutcome::Success,
                scripted: VecDeque::new(),
                delay: None,
                bulk_fetch: false,
                fetch_fails: false,
                stored: HashMap::new(),
                sends: Vec::new(),
            }),
        }
    }

    /// Enables `fetch_all_progress`
    pub fn with_bulk_fetch(self) -> Self {
        self.lock().bulk_fetch = true;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_connectivity(&self, status: ConnectivityStatus) {
        self.lock().connectivity = status;
    }

    /// Outcome of every send not covered by [`push_outcome`](Self::push_outcome)
    pub fn set_outcome(&self, outcome: SendOutcome) {
        self.lock().default_outcome = outcome;
    }

    /// Queues a one-shot outcome for the next send
    pub fn push_outcome(&self, outcome: SendOutcome) {
        self.lock().scripted.push_back(outcome);
    }

    /// Delays every call by `delay`
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// Makes `fetch_all_progress` return `None`
    pub fn set_fetch_fails(&self, fails: bool) {
        self.lock().fetch_fails = fails;
    }

    /// Seeds the stored position for a book
    pub fn insert(&self, book_id: BookId, position: RemotePosition) {
        self.lock().stored.insert(book_id, position);
    }

    /// Stored position for a book
    pub fn stored(&self, book_id: &BookId) -> Option<RemotePosition> {
        self.lock().stored.get(book_id).cloned()
    }

    /// Every stored position
    pub fn stored_all(&self) -> HashMap<BookId, RemotePosition> {
        self.lock().stored.clone()
    }

    /// Number of send attempts, including failed ones
    pub fn send_count(&self) -> usize {
        self.lock().sends.len()
    }

    /// Send attempts for one book
    pub fn sends_for(&self, book_id: &BookId) -> Vec<(Locator, Timestamp)> {
        self.lock()
            .sends
            .iter()
            .filter(|(b, _, _)| b == book_id)
            .map(|(_, l, t)| (l.clone(), *t))
            .collect()
    }

    fn delay(&self) -> Option<Duration> {
        self.lock().delay
    }
}

#[async_trait]
impl ProgressBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connectivity(&self) -> ConnectivityStatus {
        self.lock().connectivity.clone()
    }

    async fn send_progress(
        &self,
        book_id: &BookId,
        locator: &Locator,
        timestamp: Timestamp,
    ) -> SendOutcome {
        if let Some(delay) = self.delay() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state
            .sends
            .push((book_id.clone(), locator.clone(), timestamp));

        let outcome = match state.scripted.pop_front() {
            Some(outcome) => outcome,
            None => state.default_outcome.clone(),
        };

        if outcome.is_success() {
            state
                .stored
                .insert(book_id.clone(), RemotePosition::new(locator.clone(), timestamp));
        }
        outcome
    }

    async fn fetch_all_progress(&self) -> Option<HashMap<BookId, RemotePosition>> {
        let state = self.lock();
        if !state.bulk_fetch || state.fetch_fails {
            return None;
        }
        Some(state.stored.clone())
    }
}
