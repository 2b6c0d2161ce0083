// crates/network/src/error.rs
//! Error types for network operations

use storystream_sync_engine::SyncError;
use thiserror::Error;

/// Result type for network operations
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Errors that can occur during network operations
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Transport-level failure (DNS, refused connection, TLS, timeout)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Response body could not be decoded
    #[error("Unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// Resilience error
    #[error("Resilience error: {0}")]
    Resilience(#[from] storystream_resilience::ResilienceError),
}

impl NetworkError {
    /// HTTP status, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::Status { status, .. } => Some(*status),
            NetworkError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns true if the server definitively refused the request
    ///
    /// Client errors count, except request timeouts and rate limiting.
    pub fn is_rejection(&self) -> bool {
        match self.status() {
            Some(408) | Some(429) => false,
            Some(status) => (400..500).contains(&status),
            None => matches!(self, NetworkError::InvalidUrl(_) | NetworkError::Decode { .. }),
        }
    }

    /// Returns true if the error is retryable
    pub fn is_retryable(&self) -> bool {
        !self.is_rejection()
    }

    /// Returns true if the error is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status().map(|s| (500..600).contains(&s)).unwrap_or(false)
    }

    /// Classifies the error for the sync engine
    pub fn into_sync_error(self, backend: &str) -> SyncError {
        if self.is_rejection() {
            SyncError::Rejected {
                backend: backend.to_string(),
                reason: self.to_string(),
            }
        } else {
            SyncError::Unreachable {
                backend: backend.to_string(),
                message: self.to_string(),
            }
        }
    }
}
