// crates/sync-engine/tests/sync_tests.rs
//! Integration tests for sync engine

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storystream_core::{BookId, Locator, Timestamp};
use storystream_sync_engine::{
    BackendRole, ConnectivityStatus, EngineConfig, HistoryResult, MemoryBackend, ObserverHandle,
    PositionSource, QueueStore, RemotePosition, SendOutcome, SyncEngine, SyncEvent, SyncOutcome,
    SyncReason,
};
use tempfile::TempDir;

fn book(id: &str) -> BookId {
    BookId::new(id).unwrap()
}

fn locator(href: &str) -> Locator {
    Locator::new(href).unwrap()
}

struct Harness {
    _dir: TempDir,
    engine: Arc<SyncEngine>,
    primary: Arc<MemoryBackend>,
    secondary: Arc<MemoryBackend>,
}

async fn harness_with(config: impl FnOnce(&mut EngineConfig)) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let mut engine_config = EngineConfig::new(dir.path());
    config(&mut engine_config);

    let primary = Arc::new(MemoryBackend::new("library"));
    let secondary = Arc::new(MemoryBackend::new("cloud").with_bulk_fetch());
    let engine = SyncEngine::new(engine_config)
        .with_primary(primary.clone())
        .with_secondary(secondary.clone());
    engine.refresh_connectivity().await;

    Harness {
        _dir: dir,
        engine: Arc::new(engine),
        primary,
        secondary,
    }
}

async fn harness() -> Harness {
    harness_with(|_| {}).await
}

#[tokio::test]
async fn test_unchanged_position_is_sent_once() {
    let h = harness().await;
    let first = Locator::new("ch3.xhtml")
        .unwrap()
        .with_fragments(["p4"])
        .with_total_progression(0.40);
    let tick = Locator::new("ch3.xhtml")
        .unwrap()
        .with_fragments(["p4"])
        .with_total_progression(0.41);

    let a = h
        .engine
        .sync_progress(&book("b"), &first, Timestamp::from_millis(1), SyncReason::PeriodicDuringActivePlayback)
        .await;
    let b = h
        .engine
        .sync_progress(&book("b"), &tick, Timestamp::from_millis(2), SyncReason::PeriodicDuringActivePlayback)
        .await;

    assert_eq!(a, SyncOutcome::Success);
    assert_eq!(b, SyncOutcome::Success);
    assert_eq!(h.primary.send_count(), 1);
    assert_eq!(h.secondary.send_count(), 1);
}

#[tokio::test]
async fn test_dedupe_can_be_disabled() {
    let h = harness_with(|c| c.dedupe_enabled = false).await;
    for ts in [1, 2] {
        h.engine
            .sync_progress(&book("b"), &locator("ch1"), Timestamp::from_millis(ts), SyncReason::PeriodicWhileReading)
            .await;
    }
    assert_eq!(h.primary.send_count(), 2);
}

#[tokio::test]
async fn test_offline_updates_collapse_to_one_entry() {
    let h = harness().await;
    h.primary.set_connectivity(ConnectivityStatus::Disconnected);
    h.secondary.set_connectivity(ConnectivityStatus::Disconnected);
    h.engine.refresh_connectivity().await;

    for i in 1..=5 {
        let outcome = h
            .engine
            .sync_progress(
                &book("b"),
                &locator(&format!("ch{}.xhtml", i)),
                Timestamp::from_millis(i * 100),
                SyncReason::UserFlippedPage,
            )
            .await;
        assert_eq!(outcome, SyncOutcome::Queued);
    }

    let pending = h.engine.pending_entries();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].locator.href(), "ch5.xhtml");
    assert_eq!(pending[0].timestamp, Timestamp::from_millis(500));
    assert_eq!(h.primary.send_count(), 0);
}

#[tokio::test]
async fn test_repeated_backend_write_leaves_state_unchanged() {
    let h = harness_with(|c| c.dedupe_enabled = false).await;
    let loc = locator("ch1");

    h.engine
        .sync_progress(&book("b"), &loc, Timestamp::from_millis(7), SyncReason::UserClosedBook)
        .await;
    let after_first = h.primary.stored_all();
    h.engine
        .sync_progress(&book("b"), &loc, Timestamp::from_millis(7), SyncReason::UserClosedBook)
        .await;

    assert_eq!(h.primary.stored_all(), after_first);
    assert_eq!(h.primary.stored_all().len(), 1);
}

#[tokio::test]
async fn test_partial_failure_converges_after_drain() {
    let h = harness().await;
    h.secondary.push_outcome(SendOutcome::NoConnection);

    let outcome = h
        .engine
        .sync_progress(&book("b"), &locator("ch2"), Timestamp::from_millis(10), SyncReason::UserPausedPlayback)
        .await;
    assert_eq!(outcome, SyncOutcome::Queued);

    let entry = h.engine.pending_entries().remove(0);
    assert!(entry.synced_to_primary);
    assert!(!entry.synced_to_secondary);
    assert_eq!(entry.attempt_count, 1);
    assert_eq!(
        h.engine.get_sync_history(&book("b"))[0].result,
        HistoryResult::SentToServer
    );

    h.engine.refresh_connectivity().await;
    let report = h.engine.sync_pending_queue().await;

    assert_eq!(report.synced, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.engine.pending_count(), 0);
    assert_eq!(h.primary.send_count(), 1);
    assert!(h.secondary.stored(&book("b")).is_some());
    assert_eq!(
        h.engine.get_book_progress(&book("b")).unwrap().source,
        PositionSource::Server
    );
}

#[tokio::test]
async fn test_unreachable_backend_is_not_retried_until_probed() {
    let h = harness().await;
    h.secondary.set_connectivity(ConnectivityStatus::Disconnected);
    h.engine.refresh_connectivity().await;

    h.engine
        .sync_progress(&book("b"), &locator("ch2"), Timestamp::from_millis(10), SyncReason::UserPausedPlayback)
        .await;
    let report = h.engine.sync_pending_queue().await;

    assert_eq!(report.synced, 0);
    assert_eq!(h.secondary.send_count(), 0);
    assert!(h.engine.is_pending(&book("b")));
}

#[tokio::test]
async fn test_secondary_newer_wins_reconciliation() {
    let h = harness().await;
    let older = locator("ch1.xhtml");
    let newer = locator("ch7.xhtml");

    h.primary.insert(book("b"), RemotePosition::new(older.clone(), Timestamp::from_millis(100)));
    h.engine
        .apply_remote_position(&book("b"), BackendRole::Primary, &older, Timestamp::from_millis(100));
    h.secondary.insert(book("b"), RemotePosition::new(newer.clone(), Timestamp::from_millis(200)));

    let report = h.engine.reconcile_with_secondary().await;

    assert!(report.ran);
    assert_eq!(report.adopted, vec![book("b")]);
    assert_eq!(report.healed_primary, vec![book("b")]);

    let known = h.engine.get_book_progress(&book("b")).unwrap();
    assert_eq!(known.locator, newer);
    assert_eq!(known.timestamp, Timestamp::from_millis(200));

    let heals = h.primary.sends_for(&book("b"));
    assert_eq!(heals, vec![(newer.clone(), Timestamp::from_millis(200))]);

    let history = h.engine.get_sync_history(&book("b"));
    let last = history.last().unwrap();
    assert_eq!(last.result, HistoryResult::RemoteAdopted);
    assert_eq!(last.reason, SyncReason::Reconciliation);
    assert_eq!(last.source_identifier, "cloud");
}

#[tokio::test]
async fn test_primary_newer_heals_secondary() {
    let h = harness().await;
    h.engine.apply_remote_position(
        &book("b"),
        BackendRole::Primary,
        &locator("ch9"),
        Timestamp::from_millis(300),
    );
    h.engine.apply_remote_position(
        &book("only-primary"),
        BackendRole::Primary,
        &locator("ch1"),
        Timestamp::from_millis(5),
    );
    h.secondary.insert(book("b"), RemotePosition::new(locator("ch2"), Timestamp::from_millis(200)));
    h.secondary.insert(book("same"), RemotePosition::new(locator("x"), Timestamp::from_millis(1)));
    h.engine
        .apply_remote_position(&book("same"), BackendRole::Primary, &locator("x"), Timestamp::from_millis(1));

    let report = h.engine.reconcile_with_secondary().await;

    assert_eq!(report.healed_secondary, vec![book("b"), book("only-primary")]);
    assert_eq!(report.unchanged, 1);
    assert!(report.adopted.is_empty());
    assert_eq!(
        h.secondary.stored(&book("b")).unwrap().timestamp,
        Timestamp::from_millis(300)
    );
    assert_eq!(h.primary.send_count(), 0);
}

#[tokio::test]
async fn test_reconciliation_keeps_newer_local_update() {
    let h = harness().await;
    h.primary.set_connectivity(ConnectivityStatus::Disconnected);
    h.engine.refresh_connectivity().await;

    h.engine
        .sync_progress(&book("b"), &locator("local"), Timestamp::from_millis(500), SyncReason::UserFlippedPage)
        .await;
    h.secondary.insert(book("b"), RemotePosition::new(locator("remote"), Timestamp::from_millis(400)));

    let report = h.engine.reconcile_with_secondary().await;

    assert!(report.adopted.is_empty());
    let known = h.engine.get_book_progress(&book("b")).unwrap();
    assert_eq!(known.locator.href(), "local");
    assert_eq!(known.source, PositionSource::PendingSync);
    assert!(h.engine.is_pending(&book("b")));
}

#[tokio::test]
async fn test_book_only_on_secondary_is_adopted_and_written_to_primary() {
    let h = harness().await;
    let remote = locator("ch5.xhtml");
    h.secondary.insert(book("fresh"), RemotePosition::new(remote.clone(), Timestamp::from_millis(50)));
    assert!(h.engine.get_book_progress(&book("fresh")).is_none());

    let report = h.engine.reconcile_with_secondary().await;

    assert_eq!(report.adopted, vec![book("fresh")]);
    assert_eq!(report.healed_primary, vec![book("fresh")]);
    assert_eq!(h.engine.pending_count(), 0);
    assert_eq!(
        h.primary.sends_for(&book("fresh")),
        vec![(remote.clone(), Timestamp::from_millis(50))]
    );

    let known = h.engine.get_book_progress(&book("fresh")).unwrap();
    assert_eq!(known.locator, remote);
    assert_eq!(known.timestamp, Timestamp::from_millis(50));
    assert_eq!(known.source, PositionSource::Server);
}

#[tokio::test]
async fn test_reconciliation_drops_pending_entry_older_than_secondary() {
    let h = harness().await;
    h.primary.set_connectivity(ConnectivityStatus::Disconnected);
    h.engine.refresh_connectivity().await;

    let outcome = h
        .engine
        .sync_progress(&book("b"), &locator("old"), Timestamp::from_millis(100), SyncReason::UserFlippedPage)
        .await;
    assert_eq!(outcome, SyncOutcome::Queued);
    assert_eq!(h.engine.pending_count(), 1);

    // Another device moved on since
    let newer = locator("newer");
    h.secondary.insert(book("b"), RemotePosition::new(newer.clone(), Timestamp::from_millis(400)));

    let report = h.engine.reconcile_with_secondary().await;

    assert_eq!(report.adopted, vec![book("b")]);
    assert!(report.healed_primary.is_empty());
    assert_eq!(h.engine.pending_count(), 0);
    assert!(h.primary.sends_for(&book("b")).is_empty());

    let known = h.engine.get_book_progress(&book("b")).unwrap();
    assert_eq!(known.locator, newer);
    assert_eq!(known.timestamp, Timestamp::from_millis(400));
    assert_eq!(known.source, PositionSource::Server);

    // Nothing stale left to push once the library comes back
    h.primary.set_connectivity(ConnectivityStatus::Connected);
    h.engine.refresh_connectivity().await;
    h.engine.sync_pending_queue().await;
    assert!(h.primary.sends_for(&book("b")).is_empty());
}

#[tokio::test]
async fn test_reconciliation_skipped_without_secondary() {
    let dir = TempDir::new().unwrap();
    let engine = SyncEngine::new(EngineConfig::new(dir.path()))
        .with_primary(Arc::new(MemoryBackend::new("library")));
    engine.refresh_connectivity().await;
    assert!(!engine.reconcile_with_secondary().await.ran);

    let h = harness().await;
    h.secondary.set_fetch_fails(true);
    assert!(!h.engine.reconcile_with_secondary().await.ran);

    h.secondary.set_connectivity(ConnectivityStatus::Disconnected);
    h.engine.refresh_connectivity().await;
    assert!(!h.engine.reconcile_with_secondary().await.ran);
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = TempDir::new().unwrap();
    let offline = Arc::new(MemoryBackend::new("library"));
    offline.set_connectivity(ConnectivityStatus::Disconnected);

    let before = {
        let engine = SyncEngine::new(EngineConfig::new(dir.path())).with_primary(offline.clone());
        engine.refresh_connectivity().await;
        for (id, ts) in [("a", 1), ("b", 2), ("c", 3)] {
            engine
                .sync_progress(&book(id), &locator("ch1.xhtml"), Timestamp::from_millis(ts), SyncReason::AppTerminating)
                .await;
        }
        engine.pending_entries()
    };
    assert_eq!(before.len(), 3);

    assert_eq!(QueueStore::new(dir.path()).load_queue(), before);

    let restarted = SyncEngine::new(EngineConfig::new(dir.path())).with_primary(offline);
    assert_eq!(restarted.pending_entries(), before);
    assert_eq!(
        restarted.get_book_progress(&book("b")).unwrap().source,
        PositionSource::PendingSync
    );
    assert_eq!(restarted.get_sync_history(&book("c")).len(), 1);
}

#[tokio::test]
async fn test_corrupt_queue_degrades_to_empty() {
    let dir = TempDir::new().unwrap();
    let store = QueueStore::new(dir.path());
    fs::write(store.queue_path(), "{{ definitely not json").unwrap();

    let engine = SyncEngine::new(EngineConfig::new(dir.path()));
    assert_eq!(engine.pending_count(), 0);
    assert!(dir.path().join("pending_sync_queue.json.corrupt").exists());
}

#[tokio::test]
async fn test_offline_book_scenario() {
    let h = harness().await;
    h.primary.set_connectivity(ConnectivityStatus::Disconnected);
    h.secondary.set_connectivity(ConnectivityStatus::Disconnected);
    h.engine.refresh_connectivity().await;

    let loc = Locator::new("ch2.xhtml").unwrap().with_fragments(["p10"]);
    let outcome = h
        .engine
        .sync_progress(&book("book-1"), &loc, Timestamp::from_millis(1000), SyncReason::UserPausedPlayback)
        .await;

    assert_eq!(outcome, SyncOutcome::Queued);
    let pending = h.engine.pending_entries();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].book_id, book("book-1"));
    assert_eq!(pending[0].attempt_count, 0);

    let known = h.engine.get_book_progress(&book("book-1")).unwrap();
    assert_eq!(known.source, PositionSource::PendingSync);
    assert_eq!(known.locator, loc);
    assert_eq!(
        h.engine.get_sync_history(&book("book-1"))[0].result,
        HistoryResult::Persisted
    );
}

#[tokio::test]
async fn test_rejected_update_leaves_queue_but_stays_restorable() {
    let h = harness().await;
    h.primary.set_connectivity(ConnectivityStatus::Disconnected);
    h.engine.refresh_connectivity().await;

    h.engine
        .sync_progress(&book("b"), &locator("ch4"), Timestamp::from_millis(10), SyncReason::UserClosedBook)
        .await;

    h.primary.set_connectivity(ConnectivityStatus::Connected);
    h.primary.set_outcome(SendOutcome::Failure("HTTP 409".to_string()));
    h.engine.refresh_connectivity().await;

    let summaries = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&summaries);
    h.engine
        .on_drain_summary(move |synced, failed| sink.lock().unwrap().push((synced, failed)));

    let report = h.engine.sync_pending_queue().await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.synced, 1);
    assert_eq!(h.engine.pending_count(), 0);
    assert_eq!(*summaries.lock().unwrap(), vec![(1, 1)]);

    // The cloud accepted it, so it is still the best known position
    let known = h.engine.get_book_progress(&book("b")).unwrap();
    assert_eq!(known.source, PositionSource::Server);

    let history = h.engine.get_sync_history(&book("b"));
    let (index, rejected) = history
        .iter()
        .enumerate()
        .find(|(_, e)| e.result == HistoryResult::Rejected)
        .unwrap();
    assert_eq!(rejected.source_identifier, "library");
    assert_eq!(rejected.locator(), Some(locator("ch4")));

    h.primary.set_outcome(SendOutcome::Success);
    let restored = h.engine.restore_history_entry(&book("b"), index).await;
    assert_eq!(restored, Some(SyncOutcome::Success));
    assert_eq!(h.primary.stored(&book("b")).unwrap().locator, locator("ch4"));
}

#[tokio::test]
async fn test_update_rejected_everywhere_falls_back_to_confirmed_position() {
    let h = harness().await;
    h.engine.apply_remote_position(
        &book("b"),
        BackendRole::Primary,
        &locator("ch2"),
        Timestamp::from_millis(5),
    );
    h.primary.set_connectivity(ConnectivityStatus::Disconnected);
    h.secondary.set_connectivity(ConnectivityStatus::Disconnected);
    h.engine.refresh_connectivity().await;

    h.engine
        .sync_progress(&book("b"), &locator("ch4"), Timestamp::from_millis(10), SyncReason::UserFlippedPage)
        .await;
    h.engine
        .sync_progress(&book("new"), &locator("ch1"), Timestamp::from_millis(10), SyncReason::UserFlippedPage)
        .await;
    assert_eq!(
        h.engine.get_book_progress(&book("b")).unwrap().source,
        PositionSource::PendingSync
    );

    for backend in [&h.primary, &h.secondary] {
        backend.set_connectivity(ConnectivityStatus::Connected);
        backend.set_outcome(SendOutcome::Failure("HTTP 409".to_string()));
    }
    h.engine.refresh_connectivity().await;

    let report = h.engine.sync_pending_queue().await;
    assert_eq!(report.synced, 2);
    assert_eq!(report.failed, 4);
    assert_eq!(h.engine.pending_count(), 0);

    let known = h.engine.get_book_progress(&book("b")).unwrap();
    assert_eq!(known.locator, locator("ch2"));
    assert_eq!(known.timestamp, Timestamp::from_millis(5));
    assert_eq!(known.source, PositionSource::Server);

    assert!(h.engine.get_book_progress(&book("new")).is_none());
    assert!(h
        .engine
        .get_sync_history(&book("new"))
        .iter()
        .any(|e| e.result == HistoryResult::Rejected));
}

#[tokio::test]
async fn test_marking_local_only_settles_pending_position() {
    let h = harness().await;
    h.primary.set_connectivity(ConnectivityStatus::Disconnected);
    h.engine.refresh_connectivity().await;
    h.engine
        .sync_progress(&book("b"), &locator("ch3"), Timestamp::from_millis(7), SyncReason::UserFlippedPage)
        .await;
    assert!(h.engine.is_pending(&book("b")));

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    h.engine.add_observer(move |event| sink.lock().unwrap().push(event.clone()));

    h.engine.set_local_only(&book("b"), true);

    assert!(!h.engine.is_pending(&book("b")));
    let known = h.engine.get_book_progress(&book("b")).unwrap();
    assert_eq!(known.locator, locator("ch3"));
    assert_eq!(known.source, PositionSource::LocalOnly);
    assert!(events.lock().unwrap().iter().any(|e| matches!(
        e,
        SyncEvent::ProgressChanged { position, .. } if position.source == PositionSource::LocalOnly
    )));
}

#[tokio::test]
async fn test_drain_drops_local_only_books() {
    let h = harness().await;
    h.primary.set_connectivity(ConnectivityStatus::Disconnected);
    h.engine.refresh_connectivity().await;
    h.engine
        .sync_progress(&book("b"), &locator("x"), Timestamp::from_millis(1), SyncReason::UserFlippedPage)
        .await;

    // Write the local-only list behind the engine's back, then restart
    let dir = h.engine.config().data_dir.clone();
    let mut local = std::collections::BTreeSet::new();
    local.insert(book("b"));
    QueueStore::new(&dir).save_local_only(&local).unwrap();

    let engine = SyncEngine::new(EngineConfig::new(&dir));
    assert_eq!(engine.pending_count(), 1);
    let report = engine.sync_pending_queue().await;
    assert_eq!(report.synced, 1);
    assert_eq!(engine.pending_count(), 0);
    assert_eq!(
        engine.get_book_progress(&book("b")).unwrap().source,
        PositionSource::LocalOnly
    );
}

#[tokio::test]
async fn test_slow_backend_times_out_as_no_connection() {
    let h = harness_with(|c| c.backend_timeout = Duration::from_millis(50)).await;
    h.primary.set_delay(Duration::from_millis(300));

    let outcome = h
        .engine
        .sync_progress(&book("b"), &locator("ch1"), Timestamp::from_millis(1), SyncReason::AppBackgrounding)
        .await;

    assert_eq!(outcome, SyncOutcome::Queued);
    let entry = h.engine.pending_entries().remove(0);
    assert!(!entry.synced_to_primary);
    assert!(entry.synced_to_secondary);
    assert_eq!(
        h.engine.status().primary,
        Some(ConnectivityStatus::Disconnected)
    );
}

#[tokio::test]
async fn test_concurrent_drain_is_a_no_op() {
    let h = harness().await;
    h.primary.set_connectivity(ConnectivityStatus::Disconnected);
    h.engine.refresh_connectivity().await;
    h.engine
        .sync_progress(&book("b"), &locator("x"), Timestamp::from_millis(1), SyncReason::UserFlippedPage)
        .await;

    h.primary.set_connectivity(ConnectivityStatus::Connected);
    h.engine.refresh_connectivity().await;
    h.primary.set_delay(Duration::from_millis(200));

    let engine = Arc::clone(&h.engine);
    let first = tokio::spawn(async move { engine.sync_pending_queue().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.engine.status().draining);
    let second = h.engine.sync_pending_queue().await;
    assert!(!second.has_activity());

    let first = first.await.unwrap();
    assert_eq!(first.synced, 1);
    assert_eq!(h.primary.send_count(), 1);
    assert!(!h.engine.status().draining);
}

#[tokio::test]
async fn test_observer_can_unsubscribe_during_broadcast() {
    let h = harness().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let handle: Arc<Mutex<Option<ObserverHandle>>> = Arc::new(Mutex::new(None));

    let engine = Arc::clone(&h.engine);
    let slot = Arc::clone(&handle);
    let counter = Arc::clone(&calls);
    let registered = h.engine.add_observer(move |event| {
        if let SyncEvent::ProgressChanged { .. } = event {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(handle) = slot.lock().unwrap().take() {
                engine.remove_observer(handle);
            }
        }
    });
    *handle.lock().unwrap() = Some(registered);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    h.engine.add_observer(move |event| sink.lock().unwrap().push(event.clone()));

    for (ts, href) in [(1, "a"), (2, "b")] {
        h.engine
            .sync_progress(&book("x"), &locator(href), Timestamp::from_millis(ts), SyncReason::UserFlippedPage)
            .await;
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let progress_events = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, SyncEvent::ProgressChanged { .. }))
        .count();
    assert_eq!(progress_events, 2);
}
