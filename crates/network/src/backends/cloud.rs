// crates/network/src/backends/cloud.rs
//! Secondary cloud key-value store adapter

use super::send_outcome;
use crate::client::{endpoint, Client, ClientConfig};
use crate::connectivity::ConnectivityChecker;
use crate::error::NetworkResult;
use crate::protocol::{records_to_map, ProgressRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use storystream_config::SecondaryBackendConfig;
use storystream_core::{BookId, Locator, Timestamp};
use storystream_sync_engine::{ConnectivityStatus, ProgressBackend, RemotePosition, SendOutcome};

/// Key-value store holding one record per book under a namespace
///
/// - `GET {store}/health`
/// - `PUT {store}/{namespace}/progress/{bookId}`
/// - `GET {store}/{namespace}/progress/{bookId}` (404 when absent)
/// - `GET {store}/{namespace}/progress` returning every record
#[derive(Debug, Clone)]
pub struct CloudStoreBackend {
    client: Client,
    store_url: String,
    namespace: String,
    checker: ConnectivityChecker,
    device: String,
}

impl CloudStoreBackend {
    pub const NAME: &'static str = "cloud";

    pub fn new(
        store_url: &str,
        namespace: &str,
        timeout: Duration,
        device: impl Into<String>,
    ) -> NetworkResult<Self> {
        let client = Client::with_config(ClientConfig {
            timeout,
            ..ClientConfig::default()
        })?;
        let health = endpoint(store_url, &["health"])?;

        Ok(Self {
            checker: ConnectivityChecker::new(client.clone(), health),
            client,
            store_url: store_url.to_string(),
            namespace: namespace.to_string(),
            device: device.into(),
        })
    }

    /// Builds the adapter from the `[secondary]` config section
    pub fn from_config(
        config: &SecondaryBackendConfig,
        timeout: Duration,
        device: impl Into<String>,
    ) -> NetworkResult<Self> {
        Self::new(&config.store_url, &config.namespace, timeout, device)
    }

    fn progress_url(&self, book_id: Option<&BookId>) -> NetworkResult<reqwest::Url> {
        match book_id {
            Some(book_id) => endpoint(
                &self.store_url,
                &[self.namespace.as_str(), "progress", book_id.as_str()],
            ),
            None => endpoint(&self.store_url, &[self.namespace.as_str(), "progress"]),
        }
    }

    /// Stores one position, overwriting the previous one
    pub async fn put_progress(
        &self,
        book_id: &BookId,
        locator: &Locator,
        timestamp: Timestamp,
    ) -> NetworkResult<()> {
        let url = self.progress_url(Some(book_id))?;
        let record = ProgressRecord::new(book_id.clone(), locator.clone(), timestamp)
            .with_device(self.device.clone());
        self.client.put_json(&url, &record).await
    }

    /// Reads one book's position, `None` if the store has none
    pub async fn get_progress(&self, book_id: &BookId) -> NetworkResult<Option<RemotePosition>> {
        let url = self.progress_url(Some(book_id))?;
        match self.client.get_json::<ProgressRecord>(&url).await {
            Ok(record) => Ok(Some(record.into_remote().1)),
            Err(e) if e.status() == Some(404) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Reads every position in the namespace
    ///
    /// A namespace the store has never written to reads as empty.
    pub async fn list_progress(&self) -> NetworkResult<HashMap<BookId, RemotePosition>> {
        let url = self.progress_url(None)?;
        match self.client.get_json::<Vec<ProgressRecord>>(&url).await {
            Ok(records) => Ok(records_to_map(records)),
            Err(e) if e.status() == Some(404) => Ok(HashMap::new()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ProgressBackend for CloudStoreBackend {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn connectivity(&self) -> ConnectivityStatus {
        self.checker.probe().await
    }

    async fn send_progress(
        &self,
        book_id: &BookId,
        locator: &Locator,
        timestamp: Timestamp,
    ) -> SendOutcome {
        send_outcome(self.put_progress(book_id, locator, timestamp).await, Self::NAME)
    }

    async fn fetch_all_progress(&self) -> Option<HashMap<BookId, RemotePosition>> {
        match self.list_progress().await {
            Ok(map) => Some(map),
            Err(e) => {
                log::warn!("Could not list cloud progress: {}", e);
                None
            }
        }
    }
}
