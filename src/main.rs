//! # Track Usage CLI Entry Point
//!
//! Command-line access to the usage store: record plays, flip favorites and
//! print the same rankings the dashboards show.
//!
//! ## Usage
//!
//! ```bash
//! # Record a play, attributed to an agency and streamer
//! track-usage record track-42 --agency acme --streamer alice
//!
//! # Rankings
//! track-usage popular --limit 5
//! track-usage recent
//! track-usage favorites
//!
//! # Per-owner statistics, as JSON
//! track-usage --json agency acme
//!
//! # Use a different data file
//! track-usage --store ./usage.json list
//! ```
//!
//! ## Settings Precedence
//!
//! 1. Command-line flags (`--store`, `--log-level`)
//! 2. `~/.config/track-usage/config.json` (or `--config <FILE>`)
//! 3. Built-in defaults

use track_usage::config::Config;
use track_usage::logging;
use track_usage::usage::{
    JsonFileBackend, OwnerStats, Persistence, SystemClock, UsageRecord, UsageStore,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;

/// Track usage - play counts, favorites and recency for licensed tracks
#[derive(Parser, Debug)]
#[command(name = "track-usage")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and update per-track usage statistics", long_about = None)]
struct Args {
    /// Usage data file (defaults to the platform data directory)
    #[arg(long, value_name = "FILE", global = true)]
    store: Option<PathBuf>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is not set (e.g. "debug", "track_usage=trace")
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// Record one usage event for a track
    Record {
        track_id: String,
        /// Owning agency
        #[arg(long)]
        agency: Option<String>,
        /// Streamer who played the track
        #[arg(long)]
        streamer: Option<String>,
    },
    /// Show the usage record of one track
    Show { track_id: String },
    /// List every track in first-use order
    List,
    /// Most played tracks
    Popular {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Most recently played tracks
    Recent {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Favorite tracks, most played first
    Favorites,
    /// Toggle the favorite flag of a track
    Favorite { track_id: String },
    /// Usage statistics for an agency
    Agency { agency_id: String },
    /// Usage statistics for a streamer
    Streamer { streamer_id: String },
    /// Delete all usage data
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    logging::init(log_level)?;

    let mut store = match args.store.clone().or_else(|| config.store_path.clone()) {
        Some(path) => UsageStore::open(JsonFileBackend::new(path), SystemClock),
        None => UsageStore::open_default(),
    };

    let mut stdout = io::stdout().lock();
    let output = Output {
        json: args.json,
        default_limit: config.default_limit,
    };
    run_command(&mut store, &args.command, &output, &mut stdout)?;

    if let Some(warning) = close_store(store) {
        eprintln!("Warning: {}", warning);
    }

    Ok(())
}

/// Close the store, returning a warning when changes never reached storage.
fn close_store(store: UsageStore) -> Option<&'static str> {
    match store.close() {
        Persistence::MemoryOnly => {
            Some("usage data could not be saved, changes were kept in memory only")
        }
        Persistence::Saved | Persistence::Unchanged => None,
    }
}

/// How results are printed
struct Output {
    json: bool,
    default_limit: usize,
}

fn run_command(
    store: &mut UsageStore,
    command: &Command,
    output: &Output,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        Command::Record {
            track_id,
            agency,
            streamer,
        } => {
            let _ = store.record_usage(track_id, agency.as_deref(), streamer.as_deref());
            print_record(store.get_usage(track_id), track_id, output, out)
        }
        Command::Show { track_id } => print_record(store.get_usage(track_id), track_id, output, out),
        Command::List => print_records(&store.get_all_usage(), output, out),
        Command::Popular { limit } => {
            let limit = limit.unwrap_or(output.default_limit);
            print_records(&store.most_popular(limit), output, out)
        }
        Command::Recent { limit } => {
            let limit = limit.unwrap_or(output.default_limit);
            print_records(&store.recently_used(limit), output, out)
        }
        Command::Favorites => print_records(&store.favorites(), output, out),
        Command::Favorite { track_id } => {
            // Unknown tracks are left alone and print as not found
            let _ = store.toggle_favorite(track_id);
            print_record(store.get_usage(track_id), track_id, output, out)
        }
        Command::Agency { agency_id } => print_stats(&store.agency_stats(agency_id), output, out),
        Command::Streamer { streamer_id } => {
            print_stats(&store.streamer_stats(streamer_id), output, out)
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("Refusing to delete usage data without --yes");
            }
            let removed = store.len();
            let _ = store.clear_all();
            if output.json {
                return print_json(&serde_json::json!({ "cleared": removed }), out);
            }
            writeln!(out, "Cleared {} track(s)", removed)?;
            Ok(())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T, out: &mut impl Write) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    writeln!(out, "{}", json)?;
    Ok(())
}

fn print_record(
    record: Option<&UsageRecord>,
    track_id: &str,
    output: &Output,
    out: &mut impl Write,
) -> Result<()> {
    if output.json {
        return print_json(&record, out);
    }
    match record {
        Some(record) => writeln!(out, "{}", format_record(record))?,
        None => writeln!(out, "{}: not found", track_id)?,
    }
    Ok(())
}

fn print_records(records: &[&UsageRecord], output: &Output, out: &mut impl Write) -> Result<()> {
    if output.json {
        return print_json(records, out);
    }
    if records.is_empty() {
        writeln!(out, "No usage recorded")?;
    }
    for record in records {
        writeln!(out, "{}", format_record(record))?;
    }
    Ok(())
}

fn print_stats(stats: &OwnerStats, output: &Output, out: &mut impl Write) -> Result<()> {
    if output.json {
        return print_json(stats, out);
    }
    writeln!(out, "{}", stats.owner_id)?;
    writeln!(out, "  tracks:  {}", stats.total_tracks)?;
    writeln!(out, "  plays:   {}", stats.total_usage)?;
    writeln!(out, "  average: {:.2}", stats.average_usage_per_track)?;
    if let Some(top) = &stats.most_used_track {
        writeln!(out, "  top:     {} ({} plays)", top.track_id, top.usage_count)?;
    }
    Ok(())
}

fn format_record(record: &UsageRecord) -> String {
    let last_used = record
        .last_used
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    let star = if record.favorite { "★" } else { " " };
    let mut line = format!(
        "{} {:<24} {:>6}  {}",
        star, record.track_id, record.usage_count, last_used
    );
    if let Some(agency) = &record.agency_id {
        line.push_str(&format!("  agency={}", agency));
    }
    if let Some(streamer) = &record.streamer_id {
        line.push_str(&format!("  streamer={}", streamer));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use track_usage::usage::{ManualClock, MemoryBackend};

    fn test_store() -> UsageStore {
        let clock = ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        UsageStore::open(MemoryBackend::new(), clock)
    }

    fn json() -> Output {
        Output {
            json: true,
            default_limit: 10,
        }
    }

    fn text() -> Output {
        Output {
            json: false,
            default_limit: 10,
        }
    }

    fn run(store: &mut UsageStore, command: Command, output: &Output) -> String {
        let mut buf = Vec::new();
        run_command(store, &command, output, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_args_parse_record() {
        let args = Args::try_parse_from([
            "track-usage",
            "--store",
            "/tmp/u.json",
            "record",
            "t1",
            "--agency",
            "A",
        ])
        .unwrap();

        assert_eq!(args.store, Some(PathBuf::from("/tmp/u.json")));
        assert_eq!(
            args.command,
            Command::Record {
                track_id: "t1".to_string(),
                agency: Some("A".to_string()),
                streamer: None,
            }
        );
    }

    #[test]
    fn test_args_global_flags_after_subcommand() {
        let args = Args::try_parse_from(["track-usage", "popular", "-l", "3", "--json"]).unwrap();
        assert!(args.json);
        assert_eq!(args.command, Command::Popular { limit: Some(3) });
    }

    #[test]
    fn test_record_then_show() {
        let mut store = test_store();
        let output = run(
            &mut store,
            Command::Record {
                track_id: "t1".to_string(),
                agency: Some("A".to_string()),
                streamer: None,
            },
            &text(),
        );
        assert!(output.contains("t1"));
        assert!(output.contains("agency=A"));

        let output = run(
            &mut store,
            Command::Show {
                track_id: "missing".to_string(),
            },
            &text(),
        );
        assert_eq!(output, "missing: not found\n");
    }

    #[test]
    fn test_favorite_unknown_track() {
        let mut store = test_store();
        let output = run(
            &mut store,
            Command::Favorite {
                track_id: "ghost".to_string(),
            },
            &text(),
        );
        assert_eq!(output, "ghost: not found\n");
    }

    #[test]
    fn test_favorite_unknown_track_json() {
        let mut store = test_store();
        let output = run(
            &mut store,
            Command::Favorite {
                track_id: "ghost".to_string(),
            },
            &json(),
        );
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn test_favorite_known_track_json() {
        let mut store = test_store();
        let _ = store.record_usage("t1", None, None);
        let output = run(
            &mut store,
            Command::Favorite {
                track_id: "t1".to_string(),
            },
            &json(),
        );
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["favorite"], true);
    }

    #[test]
    fn test_clear_json() {
        let mut store = test_store();
        let _ = store.record_usage("t1", None, None);
        let _ = store.record_usage("t2", None, None);

        let output = run(&mut store, Command::Clear { yes: true }, &json());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["cleared"], 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_close_store_warns_once_when_storage_fails() {
        let backend = MemoryBackend::new();
        let clock = ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        let mut store = UsageStore::open(backend.clone(), clock);
        backend.set_fail_writes(true);

        let output = run(
            &mut store,
            Command::Record {
                track_id: "t1".to_string(),
                agency: None,
                streamer: None,
            },
            &text(),
        );
        assert!(output.contains("t1"));
        assert!(store.is_degraded());
        assert!(close_store(store).is_some());
    }

    #[test]
    fn test_close_store_healthy_is_silent() {
        let mut store = test_store();
        let _ = store.record_usage("t1", None, None);
        assert_eq!(close_store(store), None);
    }

    #[test]
    fn test_agency_json() {
        let mut store = test_store();
        let _ = store.record_usage("t1", Some("A"), None);
        let _ = store.record_usage("t1", Some("A"), None);

        let output = run(
            &mut store,
            Command::Agency {
                agency_id: "A".to_string(),
            },
            &json(),
        );
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["totalTracks"], 1);
        assert_eq!(value["totalUsage"], 2);
        assert_eq!(value["mostUsedTrack"]["trackId"], "t1");
    }

    #[test]
    fn test_popular_uses_default_limit() {
        let mut store = test_store();
        for id in ["a", "b", "c"] {
            let _ = store.record_usage(id, None, None);
        }
        let output = run(
            &mut store,
            Command::Popular { limit: None },
            &Output {
                json: false,
                default_limit: 2,
            },
        );
        assert_eq!(output.lines().count(), 2);
    }

    #[test]
    fn test_clear_requires_confirmation() {
        let mut store = test_store();
        let _ = store.record_usage("t1", None, None);

        let mut buf = Vec::new();
        let result = run_command(&mut store, &Command::Clear { yes: false }, &text(), &mut buf);
        assert!(result.is_err());
        assert_eq!(store.len(), 1);

        let output = run(&mut store, Command::Clear { yes: true }, &text());
        assert_eq!(output, "Cleared 1 track(s)\n");
        assert!(store.is_empty());
    }
}
