// crates/network/src/client.rs
//! HTTP client wrapper with retries

use crate::error::{NetworkError, NetworkResult};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use storystream_resilience::RetryPolicy;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Maximum redirects to follow
    pub max_redirects: usize,
    /// Retry policy for transport failures and 5xx responses
    pub retry_policy: Option<RetryPolicy>,
    /// Sent as `Authorization: Bearer <token>` when set
    pub bearer_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: format!("StoryStream/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 10,
            retry_policy: Some(RetryPolicy::new(2).with_initial_delay(Duration::from_millis(100))),
            bearer_token: None,
        }
    }
}

/// HTTP client with retries and JSON helpers
#[derive(Debug, Clone)]
pub struct Client {
    inner: ReqwestClient,
    config: ClientConfig,
}

impl Client {
    /// Creates a new client with default configuration
    pub fn new() -> NetworkResult<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Creates a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> NetworkResult<Self> {
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(NetworkError::Http)?;

        Ok(Self {
            inner: client,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Performs a GET request
    pub async fn get(&self, url: &Url) -> NetworkResult<Response> {
        self.request(url, || self.authorize(self.inner.get(url.clone())))
            .await
    }

    /// GETs and decodes a JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> NetworkResult<T> {
        let response = self.get(url).await?;
        response.json().await.map_err(|e| NetworkError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// PUTs a JSON body, discarding the response
    pub async fn put_json<B: Serialize + ?Sized>(&self, url: &Url, body: &B) -> NetworkResult<()> {
        self.request(url, || self.authorize(self.inner.put(url.clone()).json(body)))
            .await?;
        Ok(())
    }

    /// Checks if a URL answers with a success status
    pub async fn is_accessible(&self, url: &Url) -> bool {
        self.get(url).await.is_ok()
    }

    /// Internal request handler with retries
    async fn request<F>(&self, url: &Url, build: F) -> NetworkResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempts = 0;
        let max_attempts = self
            .config
            .retry_policy
            .as_ref()
            .map(|p| p.max_attempts())
            .unwrap_or(1);

        loop {
            attempts += 1;

            let error = match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => NetworkError::Status {
                    status: response.status().as_u16(),
                    url: url.to_string(),
                },
                Err(e) => NetworkError::Http(e),
            };

            // Don't retry requests the server refused
            if error.is_rejection() || attempts >= max_attempts {
                log::debug!("Request to {} failed after {} attempt(s): {}", url, attempts, error);
                return Err(error);
            }

            if let Some(policy) = &self.config.retry_policy {
                tokio::time::sleep(policy.delay_for_attempt(attempts)).await;
            }
        }
    }
}

/// Appends path segments to a base URL, percent-encoding each one
pub fn endpoint(base: &str, segments: &[&str]) -> NetworkResult<Url> {
    let mut url =
        Url::parse(base).map_err(|e| NetworkError::InvalidUrl(format!("{}: {}", base, e)))?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| NetworkError::InvalidUrl(base.to_string()))?;
        path.pop_if_empty().extend(segments);
    }
    Ok(url)
}
