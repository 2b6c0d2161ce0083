// FILE: crates/cli/src/commands.rs

use anyhow::{anyhow, bail, Context, Result};
use clap::ArgMatches;
use console::style;
use serde::Serialize;
use std::sync::Arc;
use storystream_config::{ConfigManager, SyncConfig};
use storystream_core::{BookId, Locator, Timestamp};
use storystream_sync_engine::{
    ConnectivityMonitor, ConnectivityStatus, HistoryResult, KnownPosition, PositionSource,
    RetryScheduler, SyncEngine, SyncEvent, SyncOutcome, SyncReason,
};

/// Record a new position and push it to the backends
pub async fn sync_position(engine: &SyncEngine, matches: &ArgMatches) -> Result<()> {
    let book_id = book_id(matches)?;
    let raw = matches
        .get_one::<String>("locator")
        .ok_or_else(|| anyhow!("Locator is required"))?;
    let mut locator = Locator::parse(raw).context("Invalid locator")?;
    if let Some(title) = matches.get_one::<String>("title") {
        locator = locator.with_title(title.clone());
    }

    let timestamp = matches
        .get_one::<i64>("timestamp")
        .map(|ms| Timestamp::from_millis(*ms))
        .unwrap_or_else(Timestamp::now);
    let reason = parse_reason(
        matches
            .get_one::<String>("reason")
            .map(|s| s.as_str())
            .unwrap_or("userFlippedPage"),
    )?;

    match engine.sync_progress(&book_id, &locator, timestamp, reason).await {
        SyncOutcome::Success => {
            println!("{} {} at {}", style("✓").green().bold(), book_id, locator.describe());
        }
        SyncOutcome::Queued => {
            println!(
                "{} {} at {} saved; {} update(s) waiting for a backend",
                style("…").yellow().bold(),
                book_id,
                locator.describe(),
                engine.pending_count()
            );
        }
    }

    Ok(())
}

/// Retry every pending update once
pub async fn drain(engine: &SyncEngine, json: bool) -> Result<()> {
    let report = engine.sync_pending_queue().await;
    if json {
        return print_json(&report);
    }

    println!(
        "Synced {}, rejected {}, still pending {}",
        style(report.synced).green(),
        style(report.failed).red(),
        engine.pending_count()
    );
    Ok(())
}

/// Merge the library and cloud views of every book
pub async fn reconcile(engine: &SyncEngine, json: bool) -> Result<()> {
    let report = engine.reconcile_with_secondary().await;
    if json {
        return print_json(&report);
    }

    if !report.ran {
        println!("Reconciliation skipped: cloud backend disabled or unreachable");
        return Ok(());
    }

    println!("{}", style("Reconciliation").bold().cyan());
    println!("  Adopted from cloud: {}", join_ids(&report.adopted));
    println!("  Library updated:    {}", join_ids(&report.healed_primary));
    println!("  Cloud updated:      {}", join_ids(&report.healed_secondary));
    println!("  Already in step:    {}", report.unchanged);
    Ok(())
}

/// Show queue size and connectivity
pub fn show_status(engine: &SyncEngine, json: bool) -> Result<()> {
    let status = engine.status();
    if json {
        return print_json(&status);
    }

    println!("\n{}", style("Sync Status").bold().cyan());
    println!("{}", "=".repeat(40));
    println!("Library: {}", format_connectivity(status.primary.as_ref()));
    println!("Cloud:   {}", format_connectivity(status.secondary.as_ref()));
    println!("Pending: {}", status.pending);
    println!(
        "Last drain:     {}",
        status.last_drain_at.map(format_timestamp).unwrap_or_else(|| "never".to_string())
    );
    println!(
        "Last reconcile: {}",
        status
            .last_reconcile_at
            .map(format_timestamp)
            .unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}

/// List queued updates
pub fn list_pending(engine: &SyncEngine, json: bool) -> Result<()> {
    let entries = engine.pending_entries();
    if json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!("Nothing waiting to sync.");
        return Ok(());
    }

    println!("\n{} Pending Updates", style(entries.len()).bold().cyan());
    println!("{}", "=".repeat(80));
    for entry in entries {
        println!("\n{}", style(&entry.book_id).bold());
        println!("  At: {}", entry.locator.describe());
        println!("  Recorded: {}", format_timestamp(entry.timestamp));
        println!(
            "  Library: {} | Cloud: {} | Attempts: {}",
            check_mark(entry.synced_to_primary),
            check_mark(entry.synced_to_secondary),
            entry.attempt_count
        );
    }
    Ok(())
}

/// Show the best known position for one book or all of them
pub fn show_progress(engine: &SyncEngine, matches: &ArgMatches, json: bool) -> Result<()> {
    let mut positions: Vec<(BookId, KnownPosition)> = match matches.get_one::<String>("book") {
        Some(raw) => {
            let book_id = BookId::new(raw.as_str()).context("Invalid book ID")?;
            match engine.get_book_progress(&book_id) {
                Some(position) => vec![(book_id, position)],
                None => bail!("No known position for {}", book_id),
            }
        }
        None => engine.get_all_book_progress().into_iter().collect(),
    };
    positions.sort_by(|a, b| a.0.cmp(&b.0));

    if json {
        let map: std::collections::BTreeMap<_, _> = positions.into_iter().collect();
        return print_json(&map);
    }

    if positions.is_empty() {
        println!("No positions recorded yet.");
        return Ok(());
    }

    for (book_id, position) in positions {
        println!(
            "{}  {}  {}  [{}]",
            style(&book_id).bold(),
            position.locator.describe(),
            format_timestamp(position.timestamp),
            format_source(position.source)
        );
    }
    Ok(())
}

/// Print a book's history, oldest first
pub fn show_history(engine: &SyncEngine, matches: &ArgMatches, json: bool) -> Result<()> {
    let book_id = book_id(matches)?;
    let history = engine.get_sync_history(&book_id);
    if json {
        return print_json(&history);
    }

    if history.is_empty() {
        println!("No sync history for {}", book_id);
        return Ok(());
    }

    println!("\n{} History for {}", style(history.len()).bold().cyan(), book_id);
    println!("{}", "=".repeat(80));
    for (index, entry) in history.iter().enumerate() {
        println!(
            "[{}] {}  {}  {}  via {} ({})",
            index,
            format_timestamp(entry.timestamp),
            entry.location_description,
            format_result(entry.result),
            entry.source_identifier,
            entry.reason
        );
    }
    Ok(())
}

pub fn clear_history(engine: &SyncEngine, matches: &ArgMatches) -> Result<()> {
    let book_id = book_id(matches)?;
    let removed = engine.clear_sync_history(&book_id);
    println!("Removed {} history entries for {}", removed, book_id);
    Ok(())
}

/// Re-apply a history entry as a fresh update
pub async fn restore(engine: &SyncEngine, matches: &ArgMatches) -> Result<()> {
    let book_id = book_id(matches)?;
    let index = *matches
        .get_one::<usize>("index")
        .ok_or_else(|| anyhow!("History index is required"))?;

    match engine.restore_history_entry(&book_id, index).await {
        Some(outcome) => {
            let position = engine
                .get_book_progress(&book_id)
                .map(|p| p.locator.describe())
                .unwrap_or_default();
            println!(
                "{} Restored {} to {} ({})",
                style("✓").green().bold(),
                book_id,
                position,
                match outcome {
                    SyncOutcome::Success => "synced",
                    SyncOutcome::Queued => "queued",
                }
            );
            Ok(())
        }
        None => bail!("No restorable history entry {} for {}", index, book_id),
    }
}

pub fn set_local_only(engine: &SyncEngine, matches: &ArgMatches) -> Result<()> {
    let book_id = book_id(matches)?;
    let local_only = !matches.get_flag("off");
    engine.set_local_only(&book_id, local_only);

    if local_only {
        println!("{} will stay on this device", book_id);
    } else {
        println!("{} will sync again", book_id);
    }
    Ok(())
}

/// Run the connectivity monitor and retry scheduler until Ctrl-C
pub async fn watch(engine: Arc<SyncEngine>, sync: &SyncConfig) -> Result<()> {
    let observer = engine.add_observer(|event| match event {
        SyncEvent::ConnectivityChanged { role, status } => {
            println!("{} backend is now {}", role, status);
        }
        SyncEvent::QueueDrained { synced, failed } => {
            println!("Drained queue: {} synced, {} rejected", synced, failed);
        }
        SyncEvent::Reconciled(report) if report.ran => {
            println!(
                "Reconciled: {} adopted, {} unchanged",
                report.adopted.len(),
                report.unchanged
            );
        }
        _ => {}
    });

    let monitor = ConnectivityMonitor::spawn(engine.clone(), sync.connectivity_poll_interval());
    let scheduler =
        RetryScheduler::spawn(engine.clone(), sync.retry_interval(), sync.max_retry_backoff());

    println!(
        "Watching {} pending update(s). Press Ctrl-C to stop.",
        engine.pending_count()
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!("Stopping...");
    scheduler.shutdown().await;
    monitor.shutdown().await;
    engine.remove_observer(observer);
    Ok(())
}

/// Write a default config file
pub fn init_config(manager: &ConfigManager) -> Result<()> {
    let created = manager
        .initialize()
        .context("Failed to write config file")?;

    if created {
        println!(
            "{} Created {}",
            style("✓").green().bold(),
            manager.config_path().display()
        );
    } else {
        println!("Config already exists at {}", manager.config_path().display());
    }
    Ok(())
}

fn book_id(matches: &ArgMatches) -> Result<BookId> {
    let raw = matches
        .get_one::<String>("book")
        .ok_or_else(|| anyhow!("Book ID is required"))?;
    BookId::new(raw.as_str()).context("Invalid book ID")
}

fn parse_reason(name: &str) -> Result<SyncReason> {
    SyncReason::from_name(name).ok_or_else(|| {
        let known: Vec<&str> = SyncReason::ALL.iter().map(|r| r.as_str()).collect();
        anyhow!("Unknown reason '{}'. Expected one of: {}", name, known.join(", "))
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}

fn format_timestamp(ts: Timestamp) -> String {
    chrono::DateTime::from_timestamp_millis(ts.as_millis())
        .map(|dt| {
            dt.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| format!("{} ms", ts.as_millis()))
}

fn format_connectivity(status: Option<&ConnectivityStatus>) -> String {
    match status {
        None => style("disabled").dim().to_string(),
        Some(ConnectivityStatus::Connected) => style("connected").green().to_string(),
        Some(ConnectivityStatus::Error(message)) => {
            style(format!("error: {}", message)).red().to_string()
        }
        Some(other) => style(other.to_string()).yellow().to_string(),
    }
}

fn format_source(source: PositionSource) -> &'static str {
    match source {
        PositionSource::Server => "synced",
        PositionSource::PendingSync => "pending",
        PositionSource::LocalOnly => "local only",
    }
}

fn format_result(result: HistoryResult) -> String {
    match result {
        HistoryResult::ServerConfirmed | HistoryResult::RemoteAdopted => {
            style(result).green().to_string()
        }
        HistoryResult::Failed | HistoryResult::Rejected => style(result).red().to_string(),
        _ => style(result).yellow().to_string(),
    }
}

fn check_mark(done: bool) -> &'static str {
    if done {
        "✓"
    } else {
        "✗"
    }
}

fn join_ids(ids: &[BookId]) -> String {
    if ids.is_empty() {
        "-".to_string()
    } else {
        ids.iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
