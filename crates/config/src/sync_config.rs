//! Sync engine tuning

use crate::validation::{ConfigSection, ValidationError, Validator};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and retention settings for progress sync
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on any single backend call, in seconds
    pub backend_timeout_secs: u64,

    /// How often backend connectivity is re-probed, in seconds
    pub connectivity_poll_secs: u64,

    /// Base interval between pending-queue retry passes, in seconds
    pub retry_interval_secs: u64,

    /// Cap on the retry backoff when passes make no progress, in seconds
    pub max_retry_backoff_secs: u64,

    /// Maximum history entries kept per book
    pub history_limit_per_book: usize,

    /// Skip remote sends when the position has not changed
    pub dedupe_enabled: bool,
}

impl SyncConfig {
    /// Backend call timeout as a Duration
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    /// Connectivity poll interval as a Duration
    pub fn connectivity_poll_interval(&self) -> Duration {
        Duration::from_secs(self.connectivity_poll_secs)
    }

    /// Retry pass interval as a Duration
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Maximum retry backoff as a Duration
    pub fn max_retry_backoff(&self) -> Duration {
        Duration::from_secs(self.max_retry_backoff_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend_timeout_secs: 10,
            connectivity_poll_secs: 60,
            retry_interval_secs: 30,
            max_retry_backoff_secs: 900,
            history_limit_per_book: 100,
            dedupe_enabled: true,
        }
    }
}

impl ConfigSection for SyncConfig {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut results = vec![
            Validator::in_range(self.backend_timeout_secs, 1, 120, "sync.backend_timeout_secs"),
            Validator::in_range(
                self.connectivity_poll_secs,
                5,
                3600,
                "sync.connectivity_poll_secs",
            ),
            Validator::in_range(self.retry_interval_secs, 1, 3600, "sync.retry_interval_secs"),
            Validator::in_range(
                self.history_limit_per_book,
                1,
                10_000,
                "sync.history_limit_per_book",
            ),
        ];

        if self.max_retry_backoff_secs < self.retry_interval_secs {
            results.push(Err(ValidationError::with_value(
                "sync.max_retry_backoff_secs",
                "must not be shorter than sync.retry_interval_secs",
                self.max_retry_backoff_secs,
            )));
        }

        Validator::collect_errors(results)
    }

    fn merge(&mut self, other: Self) {
        self.backend_timeout_secs = other.backend_timeout_secs;
        self.connectivity_poll_secs = other.connectivity_poll_secs;
        self.retry_interval_secs = other.retry_interval_secs;
        self.max_retry_backoff_secs = other.max_retry_backoff_secs;
        self.history_limit_per_book = other.history_limit_per_book;
        self.dedupe_enabled = other.dedupe_enabled;
    }

    fn section_name(&self) -> &'static str {
        "sync"
    }
}
