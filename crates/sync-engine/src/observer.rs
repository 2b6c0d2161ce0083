// crates/sync-engine/src/observer.rs
//! Change notification fan-out

use crate::backend::ConnectivityStatus;
use crate::types::{BackendRole, KnownPosition, ReconcileReport};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use storystream_core::BookId;

/// A state change worth telling listeners about
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The best known position for a book changed
    ProgressChanged {
        book_id: BookId,
        position: KnownPosition,
    },
    /// The pending queue was modified
    QueueChanged { pending: usize },
    /// A drain pass finished
    QueueDrained { synced: usize, failed: usize },
    /// A reconciliation pass finished
    Reconciled(ReconcileReport),
    /// A book's history was cleared
    HistoryCleared { book_id: BookId },
    /// A backend's cached status changed
    ConnectivityChanged {
        role: BackendRole,
        status: ConnectivityStatus,
    },
}

/// Opaque registration returned by [`ObserverRegistry::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

type Observer = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Registered listeners
///
/// Broadcasts iterate over a snapshot, so an observer may remove itself
/// (or any other) from inside its callback.
#[derive(Default)]
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: Mutex<Vec<(u64, Observer)>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener
    pub fn add<F>(&self, observer: F) -> ObserverHandle
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        observers.push((id, Arc::new(observer)));
        ObserverHandle(id)
    }

    /// Unregisters a listener; returns false if the handle was unknown
    pub fn remove(&self, handle: ObserverHandle) -> bool {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        let before = observers.len();
        observers.retain(|(id, _)| *id != handle.0);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers
            .lock()
            .map(|o| o.len())
            .unwrap_or_else(|e| e.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers an event to every listener registered when the call started
    pub fn notify(&self, event: &SyncEvent) {
        let snapshot: Vec<Observer> = {
            let observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
            observers.iter().map(|(_, o)| Arc::clone(o)).collect()
        };

        for observer in snapshot {
            observer(event);
        }
    }
}
