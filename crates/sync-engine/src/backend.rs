// crates/sync-engine/src/backend.rs
//! Backend capability contract and the engine-side wrapper around it

use crate::error::{ErrorKind, SyncError};
use crate::types::{BackendRole, RemotePosition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use storystream_core::{BookId, Locator, Timestamp};
use storystream_resilience::Timeout;

/// Reachability of a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "message")]
pub enum ConnectivityStatus {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectivityStatus {
    /// Only a connected backend is sent anything
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectivityStatus::Connected)
    }
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityStatus::Disconnected => write!(f, "disconnected"),
            ConnectivityStatus::Connecting => write!(f, "connecting"),
            ConnectivityStatus::Connected => write!(f, "connected"),
            ConnectivityStatus::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// Result of pushing one position to a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The backend stored the position
    Success,
    /// The backend answered and refused it; retrying will not help
    Failure(String),
    /// The backend was not reached
    NoConnection,
}

impl SendOutcome {
    /// Maps an adapter error onto an outcome using its [`ErrorKind`]
    pub fn from_error(err: &SyncError) -> Self {
        match err.kind() {
            ErrorKind::Transient => SendOutcome::NoConnection,
            _ => SendOutcome::Failure(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Success)
    }
}

/// A remote store that can hold reading positions
///
/// `send_progress` must be idempotent: storing the same
/// `(book, locator, timestamp)` twice leaves the remote unchanged.
#[async_trait]
pub trait ProgressBackend: Send + Sync {
    /// Short name used in logs and history
    fn name(&self) -> &str;

    /// Probes the backend
    async fn connectivity(&self) -> ConnectivityStatus;

    /// Stores a position, overwriting any previous one for the book
    async fn send_progress(
        &self,
        book_id: &BookId,
        locator: &Locator,
        timestamp: Timestamp,
    ) -> SendOutcome;

    /// Returns every stored position, or `None` if the fetch failed
    ///
    /// Only backends that support bulk reads override this.
    async fn fetch_all_progress(&self) -> Option<HashMap<BookId, RemotePosition>> {
        None
    }
}

/// A configured backend plus its cached connectivity
///
/// Every call is bounded by the slot's timeout. Sends run on their own task
/// so a late write still lands; the caller just stops waiting and treats
/// it as `NoConnection`.
pub struct BackendSlot {
    role: BackendRole,
    backend: Arc<dyn ProgressBackend>,
    status: RwLock<ConnectivityStatus>,
    timeout: Timeout,
}

impl BackendSlot {
    /// Wraps a backend; its status is `Connecting` until the first probe
    pub fn new(role: BackendRole, backend: Arc<dyn ProgressBackend>, timeout: Duration) -> Self {
        Self {
            role,
            backend,
            status: RwLock::new(ConnectivityStatus::Connecting),
            timeout: Timeout::new(timeout),
        }
    }

    pub fn role(&self) -> BackendRole {
        self.role
    }

    pub fn name(&self) -> &str {
        self.backend.name()
    }

    /// Last probed status
    pub fn status(&self) -> ConnectivityStatus {
        self.status
            .read()
            .map(|s| s.clone())
            .unwrap_or(ConnectivityStatus::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    fn set_status(&self, status: ConnectivityStatus) -> ConnectivityStatus {
        match self.status.write() {
            Ok(mut guard) => std::mem::replace(&mut *guard, status),
            Err(_) => ConnectivityStatus::Disconnected,
        }
    }

    /// Probes the backend and caches the answer
    ///
    /// Returns `(previous, current)`.
    pub async fn refresh(&self) -> (ConnectivityStatus, ConnectivityStatus) {
        let current = match self.timeout.run(self.backend.connectivity()).await {
            Ok(status) => status,
            Err(e) => {
                log::debug!("{} connectivity probe failed: {}", self.name(), e);
                ConnectivityStatus::Disconnected
            }
        };

        let previous = self.set_status(current.clone());
        if previous != current {
            log::info!(
                "{} backend '{}' is now {}",
                self.role,
                self.name(),
                current
            );
        }
        (previous, current)
    }

    /// Sends a position, giving up after the timeout
    pub async fn send(&self, book_id: &BookId, locator: &Locator, timestamp: Timestamp) -> SendOutcome {
        let backend = Arc::clone(&self.backend);
        let book = book_id.clone();
        let loc = locator.clone();

        let outcome = match self
            .timeout
            .run_detached(async move { backend.send_progress(&book, &loc, timestamp).await })
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("{} send for {} abandoned: {}", self.name(), book_id, e);
                SendOutcome::NoConnection
            }
        };

        if outcome == SendOutcome::NoConnection {
            // Skip this backend until the next probe says otherwise
            self.set_status(ConnectivityStatus::Disconnected);
        }

        log::debug!(
            "{} send for {} at {}: {:?}",
            self.name(),
            book_id,
            timestamp,
            outcome
        );
        outcome
    }

    /// Fetches the full position set, `None` on failure or timeout
    pub async fn fetch_all(&self) -> Option<HashMap<BookId, RemotePosition>> {
        match self.timeout.run(self.backend.fetch_all_progress()).await {
            Ok(result) => result,
            Err(e) => {
                log::warn!("{} bulk fetch abandoned: {}", self.name(), e);
                None
            }
        }
    }
}

impl fmt::Debug for BackendSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSlot")
            .field("role", &self.role)
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn book(id: &str) -> BookId {
        BookId::new(id).unwrap()
    }

    fn locator() -> Locator {
        Locator::new("ch1.xhtml").unwrap()
    }

    #[tokio::test]
    async fn test_slot_starts_connecting() {
        let slot = BackendSlot::new(
            BackendRole::Primary,
            Arc::new(MemoryBackend::new("library")),
            Duration::from_secs(1),
        );
        assert_eq!(slot.status(), ConnectivityStatus::Connecting);
        assert!(!slot.is_connected());
    }

    #[tokio::test]
    async fn test_refresh_reports_transition() {
        let backend = Arc::new(MemoryBackend::new("library"));
        let slot = BackendSlot::new(BackendRole::Primary, backend.clone(), Duration::from_secs(1));

        let (previous, current) = slot.refresh().await;
        assert_eq!(previous, ConnectivityStatus::Connecting);
        assert_eq!(current, ConnectivityStatus::Connected);

        backend.set_connectivity(ConnectivityStatus::Disconnected);
        let (previous, current) = slot.refresh().await;
        assert_eq!(previous, ConnectivityStatus::Connected);
        assert_eq!(current, ConnectivityStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_slow_send_becomes_no_connection() {
        let backend = Arc::new(MemoryBackend::new("slow"));
        backend.set_delay(Duration::from_millis(200));
        let slot = BackendSlot::new(BackendRole::Secondary, backend.clone(), Duration::from_millis(20));
        slot.refresh().await;

        let outcome = slot.send(&book("b"), &locator(), Timestamp::from_millis(5)).await;
        assert_eq!(outcome, SendOutcome::NoConnection);
        assert!(!slot.is_connected());

        // The detached write still completes
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(backend.stored(&book("b")).is_some());
    }

    #[tokio::test]
    async fn test_send_success() {
        let backend = Arc::new(MemoryBackend::new("library"));
        let slot = BackendSlot::new(BackendRole::Primary, backend.clone(), Duration::from_secs(1));

        let outcome = slot.send(&book("b"), &locator(), Timestamp::from_millis(5)).await;
        assert!(outcome.is_success());
        assert_eq!(backend.send_count(), 1);
    }

    #[test]
    fn test_outcome_from_error() {
        let transient = SyncError::Unreachable {
            backend: "x".to_string(),
            message: "dns".to_string(),
        };
        assert_eq!(SendOutcome::from_error(&transient), SendOutcome::NoConnection);

        let rejected = SyncError::Rejected {
            backend: "x".to_string(),
            reason: "409".to_string(),
        };
        assert!(matches!(
            SendOutcome::from_error(&rejected),
            SendOutcome::Failure(_)
        ));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectivityStatus::Connected.to_string(), "connected");
        assert_eq!(
            ConnectivityStatus::Error("tls".to_string()).to_string(),
            "error: tls"
        );
    }
}
