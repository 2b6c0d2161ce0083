// crates/sync-engine/src/monitor.rs
//! Background connectivity polling and queue retries

use crate::engine::SyncEngine;
use std::sync::Arc;
use std::time::Duration;
use storystream_resilience::RetryPolicy;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a spawned background loop
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(body(rx));
        log::debug!("Started {}", name);
        Self {
            name,
            shutdown,
            handle,
        }
    }

    /// Signals the loop to stop and waits for it
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            log::warn!("{} ended abnormally: {}", self.name, e);
        }
        log::debug!("Stopped {}", self.name);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Sleeps for `delay`, returning false if shutdown was requested first
async fn wait(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        // Only `true` is ever sent; a dropped sender also means stop
        _ = shutdown.changed() => false,
    }
}

/// Re-probes backend connectivity on an interval
///
/// When a backend comes back online the pending queue is drained and the
/// backends are reconciled.
pub struct ConnectivityMonitor;

impl ConnectivityMonitor {
    pub fn spawn(engine: Arc<SyncEngine>, interval: Duration) -> BackgroundTask {
        BackgroundTask::spawn("connectivity monitor", move |mut shutdown| async move {
            loop {
                if engine.refresh_connectivity().await {
                    log::info!("Connection restored; draining pending queue");
                    engine.sync_pending_queue().await;
                    engine.reconcile_with_secondary().await;
                }

                if !wait(interval, &mut shutdown).await {
                    break;
                }
            }
        })
    }
}

/// Drains the pending queue on an interval while it is non-empty
///
/// Passes that change nothing back off exponentially up to `max_backoff`.
pub struct RetryScheduler;

impl RetryScheduler {
    pub fn spawn(engine: Arc<SyncEngine>, interval: Duration, max_backoff: Duration) -> BackgroundTask {
        let policy = RetryPolicy::new(usize::MAX)
            .with_initial_delay(interval)
            .with_max_delay(max_backoff.max(interval))
            .with_jitter(false);

        BackgroundTask::spawn("retry scheduler", move |mut shutdown| async move {
            let mut idle_passes = 0usize;
            loop {
                let delay = policy.delay_for_attempt(idle_passes.saturating_add(1));
                if !wait(delay, &mut shutdown).await {
                    break;
                }

                if engine.pending_count() == 0 {
                    idle_passes = 0;
                    continue;
                }

                let report = engine.sync_pending_queue().await;
                if report.has_activity() {
                    idle_passes = 0;
                } else {
                    idle_passes = idle_passes.saturating_add(1);
                    log::debug!(
                        "Retry pass made no progress; next in {:?}",
                        policy.delay_for_attempt(idle_passes + 1)
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ConnectivityStatus;
    use crate::engine::EngineConfig;
    use crate::memory::MemoryBackend;
    use crate::types::{SyncOutcome, SyncReason};
    use storystream_core::{BookId, Locator, Timestamp};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_monitor_drains_on_reconnect() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(MemoryBackend::new("library"));
        backend.set_connectivity(ConnectivityStatus::Disconnected);
        let engine = Arc::new(SyncEngine::new(EngineConfig::new(dir.path())).with_primary(backend.clone()));
        engine.refresh_connectivity().await;

        let book = BookId::new("book-1").unwrap();
        let outcome = engine
            .sync_progress(
                &book,
                &Locator::new("ch1.xhtml").unwrap(),
                Timestamp::from_millis(10),
                SyncReason::AppBackgrounding,
            )
            .await;
        assert_eq!(outcome, SyncOutcome::Queued);

        let monitor = ConnectivityMonitor::spawn(Arc::clone(&engine), Duration::from_millis(20));
        backend.set_connectivity(ConnectivityStatus::Connected);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(engine.pending_count(), 0);
        assert!(backend.stored(&book).is_some());
        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_scheduler_retries_until_drained() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(MemoryBackend::new("library"));
        let engine = Arc::new(SyncEngine::new(EngineConfig::new(dir.path())).with_primary(backend.clone()));
        engine.refresh_connectivity().await;

        backend.push_outcome(crate::backend::SendOutcome::NoConnection);
        let book = BookId::new("book-1").unwrap();
        engine
            .sync_progress(
                &book,
                &Locator::new("ch1.xhtml").unwrap(),
                Timestamp::from_millis(10),
                SyncReason::UserPausedPlayback,
            )
            .await;
        assert_eq!(engine.pending_count(), 1);

        // The failed send marked the backend disconnected until re-probed
        engine.refresh_connectivity().await;
        let scheduler = RetryScheduler::spawn(
            Arc::clone(&engine),
            Duration::from_millis(20),
            Duration::from_millis(100),
        );
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(engine.pending_count(), 0);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(SyncEngine::new(EngineConfig::new(dir.path())));
        let task = ConnectivityMonitor::spawn(engine, Duration::from_secs(3600));
        assert!(!task.is_finished());
        tokio::time::timeout(Duration::from_secs(1), task.shutdown())
            .await
            .unwrap();
    }
}
