//! Timeout handling utilities

use crate::error::{ResilienceError, ResilienceResult};
use std::future::Future;
use std::time::Duration;

/// Awaits a future, giving up after `duration`
///
/// The future is dropped when the deadline passes.
pub async fn with_timeout<F>(duration: Duration, operation: F) -> ResilienceResult<F::Output>
where
    F: Future,
{
    tokio::time::timeout(duration, operation)
        .await
        .map_err(|_| ResilienceError::Timeout(duration))
}

/// Runs a future on its own task and waits at most `duration` for it
///
/// Unlike [`with_timeout`], a late operation is not cancelled: the task keeps
/// running to completion in the background and only the caller stops waiting.
/// A task that panics is reported as [`ResilienceError::Cancelled`].
pub async fn with_detached_timeout<F>(
    duration: Duration,
    operation: F,
) -> ResilienceResult<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let handle = tokio::spawn(operation);
    match tokio::time::timeout(duration, handle).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(_join_error)) => Err(ResilienceError::Cancelled),
        Err(_) => Err(ResilienceError::Timeout(duration)),
    }
}

/// Timeout wrapper for operations
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    /// Creates a new timeout
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Gets the timeout duration
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Awaits an operation with this timeout
    pub async fn run<F>(&self, operation: F) -> ResilienceResult<F::Output>
    where
        F: Future,
    {
        with_timeout(self.duration, operation).await
    }

    /// Spawns an operation and awaits it with this timeout, leaving it running if late
    pub async fn run_detached<F>(&self, operation: F) -> ResilienceResult<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        with_detached_timeout(self.duration, operation).await
    }
}
