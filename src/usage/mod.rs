//! # Usage Tracking Module
//!
//! Durable per-track usage statistics: play counts, favorites and last-used
//! timestamps, with the aggregate queries dashboards are built from.
//!
//! ## Overview
//!
//! A [`UsageStore`] is opened once per process and handed to whatever needs
//! it. Opening loads any previously stored data; every mutation rewrites the
//! whole mapping before returning. Storage problems are logged and reported
//! as [`Persistence::MemoryOnly`], never as errors, so the in-memory view is
//! always available.
//!
//! ## Storage
//!
//! Usage data is stored in a single XDG-compliant file:
//! - Linux: `~/.local/share/track-usage/usage.json`
//! - macOS: `~/Library/Application Support/track-usage/usage.json`
//! - Windows: `%APPDATA%\track-usage\data\usage.json`
//!
//! ## Example
//!
//! ```
//! use track_usage::usage::{MemoryBackend, SystemClock, UsageStore};
//!
//! let mut store = UsageStore::open(MemoryBackend::new(), SystemClock);
//! let _ = store.record_usage("track-1", Some("agency-1"), Some("streamer-1"));
//! let _ = store.toggle_favorite("track-1");
//!
//! let record = store.get_usage("track-1").unwrap();
//! assert_eq!(record.usage_count, 1);
//! assert!(record.favorite);
//! assert_eq!(store.agency_stats("agency-1").total_usage, 1);
//! ```

mod clock;
mod record;
mod storage;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use record::{OwnerStats, UsageRecord};
pub use storage::{
    default_store_path, JsonFileBackend, MemoryBackend, StorageError, UsageBackend, UsageMap,
    USAGE_FILE,
};
pub use store::{Persistence, UsageStore, DEFAULT_LIMIT};
