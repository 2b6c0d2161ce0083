// crates/network/src/connectivity.rs
//! Backend reachability checks

use crate::client::Client;
use crate::error::NetworkError;
use reqwest::Url;
use storystream_sync_engine::ConnectivityStatus;

/// Probes a backend's health endpoint
#[derive(Debug, Clone)]
pub struct ConnectivityChecker {
    client: Client,
    check_urls: Vec<Url>,
}

impl ConnectivityChecker {
    /// Creates a checker for a single health URL
    pub fn new(client: Client, health_url: Url) -> Self {
        Self::with_urls(client, vec![health_url])
    }

    /// Creates a checker that tries each URL in turn
    pub fn with_urls(client: Client, urls: Vec<Url>) -> Self {
        Self {
            client,
            check_urls: urls,
        }
    }

    /// Returns true if any health URL answers
    pub async fn is_online(&self) -> bool {
        self.probe().await.is_connected()
    }

    /// Maps the first answering URL onto a connectivity status
    ///
    /// A server that answers with a client error (bad token, wrong path) is
    /// reported as `Error` rather than `Disconnected`.
    pub async fn probe(&self) -> ConnectivityStatus {
        let mut status = ConnectivityStatus::Disconnected;
        for url in &self.check_urls {
            match self.client.get(url).await {
                Ok(_) => return ConnectivityStatus::Connected,
                Err(e) if e.is_rejection() => {
                    status = ConnectivityStatus::Error(describe(&e));
                }
                Err(e) => {
                    log::debug!("Health check {} failed: {}", url, e);
                }
            }
        }
        status
    }
}

fn describe(err: &NetworkError) -> String {
    match err.status() {
        Some(401) | Some(403) => "not authorized".to_string(),
        _ => err.to_string(),
    }
}
