// crates/network/src/backends/library.rs
//! Primary library server adapter

use super::send_outcome;
use crate::client::{endpoint, Client, ClientConfig};
use crate::connectivity::ConnectivityChecker;
use crate::error::NetworkResult;
use crate::protocol::{records_to_map, ProgressRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use storystream_config::PrimaryBackendConfig;
use storystream_core::{BookId, Locator, Timestamp};
use storystream_sync_engine::{ConnectivityStatus, ProgressBackend, RemotePosition, SendOutcome};

/// Library server speaking the `/api/progress` REST interface
///
/// - `GET  {server}/api/health`
/// - `PUT  {server}/api/progress/{bookId}` with a [`ProgressRecord`] body
/// - `GET  {server}/api/progress` returning a list of records
///
/// PUT overwrites the stored record, so repeating a send is harmless.
#[derive(Debug, Clone)]
pub struct LibraryServerBackend {
    client: Client,
    server_url: String,
    checker: ConnectivityChecker,
    device: String,
}

impl LibraryServerBackend {
    pub const NAME: &'static str = "library";

    pub fn new(
        server_url: &str,
        api_token: Option<String>,
        timeout: Duration,
        device: impl Into<String>,
    ) -> NetworkResult<Self> {
        let client = Client::with_config(ClientConfig {
            timeout,
            bearer_token: api_token,
            ..ClientConfig::default()
        })?;
        let health = endpoint(server_url, &["api", "health"])?;

        Ok(Self {
            checker: ConnectivityChecker::new(client.clone(), health),
            client,
            server_url: server_url.to_string(),
            device: device.into(),
        })
    }

    /// Builds the adapter from the `[primary]` config section
    pub fn from_config(
        config: &PrimaryBackendConfig,
        timeout: Duration,
        device: impl Into<String>,
    ) -> NetworkResult<Self> {
        Self::new(&config.server_url, config.api_token.clone(), timeout, device)
    }

    /// Stores one position
    pub async fn put_progress(
        &self,
        book_id: &BookId,
        locator: &Locator,
        timestamp: Timestamp,
    ) -> NetworkResult<()> {
        let url = endpoint(&self.server_url, &["api", "progress", book_id.as_str()])?;
        let record = ProgressRecord::new(book_id.clone(), locator.clone(), timestamp)
            .with_device(self.device.clone());
        self.client.put_json(&url, &record).await
    }

    /// Reads every stored position
    pub async fn list_progress(&self) -> NetworkResult<HashMap<BookId, RemotePosition>> {
        let url = endpoint(&self.server_url, &["api", "progress"])?;
        let records: Vec<ProgressRecord> = self.client.get_json(&url).await?;
        Ok(records_to_map(records))
    }
}

#[async_trait]
impl ProgressBackend for LibraryServerBackend {
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
                log::warn!("Could not list library progress: {}", e);
                None
            }
        }
    }
}
