// FILE: crates/cli/src/main.rs

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

mod app;
mod commands;

use app::App;

fn book_arg() -> Arg {
    Arg::new("book")
        .required(true)
        .value_name("BOOK_ID")
        .help("Book identifier")
}

fn build_cli() -> Command {
    Command::new("storystream-sync")
        .version(env!("CARGO_PKG_VERSION"))
        .author("StoryStream Team")
        .about("Keeps reading positions in step between this device and the library and cloud backends")
        .arg(
            Arg::new("config-dir")
                .short('c')
                .long("config-dir")
                .value_name("DIR")
                .help("Directory holding config.toml (defaults to the platform config dir)")
                .value_parser(clap::value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("DIR")
                .help("Directory holding the pending queue and sync history")
                .value_parser(clap::value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print machine-readable JSON")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("sync")
                .about("Record a new reading position and push it to the backends")
                .arg(book_arg())
                .arg(
                    Arg::new("locator")
                        .required(true)
                        .value_name("LOCATOR")
                        .help("Position as href[#fragment...][@progression], e.g. ch3.xhtml#p4@0.42"),
                )
                .arg(
                    Arg::new("timestamp")
                        .short('t')
                        .long("timestamp")
                        .value_name("MILLIS")
                        .help("Logical timestamp in ms since the epoch (defaults to now)")
                        .value_parser(clap::value_parser!(i64)),
                )
                .arg(
                    Arg::new("reason")
                        .short('r')
                        .long("reason")
                        .value_name("REASON")
                        .help("Why the position changed, e.g. userPausedPlayback")
                        .default_value("userFlippedPage"),
                )
                .arg(
                    Arg::new("title")
                        .long("title")
                        .value_name("TITLE")
                        .help("Chapter title shown in history"),
                ),
        )
        .subcommand(Command::new("drain").about("Retry every update in the pending queue"))
        .subcommand(Command::new("reconcile").about("Merge positions held by the library and cloud backends"))
        .subcommand(Command::new("status").about("Show queue size and backend connectivity"))
        .subcommand(Command::new("pending").about("List updates waiting to be delivered"))
        .subcommand(
            Command::new("progress")
                .about("Show the best known position for one or all books")
                .arg(Arg::new("book").value_name("BOOK_ID").help("Book identifier (all books if omitted)")),
        )
        .subcommand(
            Command::new("history")
                .about("Show the sync history of a book, oldest first")
                .arg(book_arg()),
        )
        .subcommand(
            Command::new("clear-history")
                .about("Delete the sync history of a book")
                .arg(book_arg()),
        )
        .subcommand(
            Command::new("restore")
                .about("Re-apply a position from a book's history")
                .arg(book_arg())
                .arg(
                    Arg::new("index")
                        .required(true)
                        .value_name("INDEX")
                        .help("Entry index as shown by `history` (0 is the oldest)")
                        .value_parser(clap::value_parser!(usize)),
                ),
        )
        .subcommand(
            Command::new("local-only")
                .about("Keep a book's position on this device only")
                .arg(book_arg())
                .arg(
                    Arg::new("off")
                        .long("off")
                        .help("Resume syncing the book")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("watch").about("Monitor connectivity and retry the queue until Ctrl-C"))
        .subcommand(Command::new("init-config").about("Write a default config file if none exists"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    let app = App::load(
        matches.get_one::<PathBuf>("config-dir").cloned(),
        matches.get_one::<PathBuf>("data-dir").cloned(),
    )?;

    let level = app.config.app.log_level.to_string();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    log::debug!("Using data directory {}", app.data_dir.display());

    let json = matches.get_flag("json");

    match matches.subcommand() {
        Some(("init-config", _)) => commands::init_config(&app.manager),
        Some((name, sub_matches)) => {
            let engine = app.engine().await.context("Failed to start sync engine")?;
            match name {
                "sync" => commands::sync_position(&engine, sub_matches).await,
                "drain" => commands::drain(&engine, json).await,
                "reconcile" => commands::reconcile(&engine, json).await,
                "status" => commands::show_status(&engine, json),
                "pending" => commands::list_pending(&engine, json),
                "progress" => commands::show_progress(&engine, sub_matches, json),
                "history" => commands::show_history(&engine, sub_matches, json),
                "clear-history" => commands::clear_history(&engine, sub_matches),
                "restore" => commands::restore(&engine, sub_matches).await,
                "local-only" => commands::set_local_only(&engine, sub_matches),
                "watch" => commands::watch(engine, &app.config.sync).await,
                _ => {
                    build_cli().print_help()?;
                    Ok(())
                }
            }
        }
        None => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_sync_arguments_parse() {
        let matches = build_cli()
            .try_get_matches_from([
                "storystream-sync",
                "--data-dir",
                "/tmp/sync",
                "sync",
                "book-1",
                "ch3.xhtml#p4@0.42",
                "--timestamp",
                "1000",
                "--reason",
                "userPausedPlayback",
            ])
            .unwrap();

        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "sync");
        assert_eq!(sub.get_one::<i64>("timestamp"), Some(&1000));
        assert_eq!(
            matches.get_one::<PathBuf>("data-dir"),
            Some(&PathBuf::from("/tmp/sync"))
        );
    }

    #[test]
    fn test_restore_requires_numeric_index() {
        assert!(build_cli()
            .try_get_matches_from(["storystream-sync", "restore", "book-1", "latest"])
            .is_err());
    }
}
