//! # Usage Store
//!
//! The authoritative, durable view of track usage. Every mutation rewrites the
//! whole mapping through the injected [`UsageBackend`] before returning.
//! Storage failures never reach the caller as errors; they are logged and
//! reported through [`Persistence`].

use super::clock::{Clock, SystemClock};
use super::record::{OwnerStats, UsageRecord};
use super::storage::{JsonFileBackend, MemoryBackend, UsageBackend, UsageMap};
use std::cmp::Reverse;

/// Default number of records returned by the ranking queries
pub const DEFAULT_LIMIT: usize = 10;

/// Outcome of a mutation with respect to durable storage.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// The new state is on durable storage
    Saved,
    /// Storage rejected the write; the change only lives in memory
    MemoryOnly,
    /// Nothing changed, so nothing was written
    Unchanged,
}

/// Per-track usage statistics backed by durable storage.
#[derive(Debug)]
pub struct UsageStore {
    records: UsageMap,
    backend: Box<dyn UsageBackend>,
    clock: Box<dyn Clock>,
    /// Set while the last write to the backend failed
    degraded: bool,
}

impl UsageStore {
    /// Open a store, loading whatever the backend holds.
    ///
    /// Missing or unreadable data leaves the store empty; it never fails.
    pub fn open(backend: impl UsageBackend + 'static, clock: impl Clock + 'static) -> Self {
        let records = match backend.load() {
            Ok(Some(records)) => records,
            Ok(None) => UsageMap::new(),
            Err(e) => {
                tracing::warn!(
                    location = %backend.location(),
                    error = %e,
                    "Could not load usage data, starting empty"
                );
                UsageMap::new()
            }
        };

        tracing::debug!(
            location = %backend.location(),
            tracks = records.len(),
            "Opened usage store"
        );

        Self {
            records,
            backend: Box::new(backend),
            clock: Box::new(clock),
            degraded: false,
        }
    }

    /// Open the store at the platform data directory.
    ///
    /// Falls back to memory-only storage when no data directory is available.
    pub fn open_default() -> Self {
        match JsonFileBackend::at_default_location() {
            Ok(backend) => Self::open(backend, SystemClock),
            Err(e) => {
                tracing::warn!(error = %e, "No usage storage location, keeping usage in memory");
                Self::open(MemoryBackend::new(), SystemClock)
            }
        }
    }

    /// Record one usage event for `track_id`.
    ///
    /// `None` (or an empty string) for an owner leaves the stored value as it is.
    pub fn record_usage(
        &mut self,
        track_id: &str,
        agency_id: Option<&str>,
        streamer_id: Option<&str>,
    ) -> Persistence {
        let now = self.clock.now();
        match self.records.get_mut(track_id) {
            Some(record) => record.record_use(now, agency_id, streamer_id),
            None => self
                .records
                .insert(UsageRecord::first_use(track_id, now, agency_id, streamer_id)),
        }

        tracing::trace!(track_id, agency_id, streamer_id, "Recorded usage");
        self.persist()
    }

    pub fn get_usage(&self, track_id: &str) -> Option<&UsageRecord> {
        self.records.get(track_id)
    }

    /// All records in first-use order.
    pub fn get_all_usage(&self) -> Vec<&UsageRecord> {
        self.records.iter().collect()
    }

    /// Up to `limit` records by usage count, highest first.
    pub fn most_popular(&self, limit: usize) -> Vec<&UsageRecord> {
        let mut records = self.get_all_usage();
        records.sort_by_key(|r| Reverse(r.usage_count));
        records.truncate(limit);
        records
    }

    /// Up to `limit` records by last use, most recent first.
    pub fn recently_used(&self, limit: usize) -> Vec<&UsageRecord> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.last_used.is_some())
            .collect();
        records.sort_by_key(|r| Reverse(r.last_used));
        records.truncate(limit);
        records
    }

    /// Flip the favorite flag. Unknown tracks are left alone.
    pub fn toggle_favorite(&mut self, track_id: &str) -> Persistence {
        let Some(record) = self.records.get_mut(track_id) else {
            return Persistence::Unchanged;
        };
        record.favorite = !record.favorite;

        tracing::trace!(track_id, favorite = record.favorite, "Toggled favorite");
        self.persist()
    }

    /// Favorite records, most used first.
    pub fn favorites(&self) -> Vec<&UsageRecord> {
        let mut records: Vec<_> = self.records.iter().filter(|r| r.favorite).collect();
        records.sort_by_key(|r| Reverse(r.usage_count));
        records
    }

    pub fn agency_stats(&self, agency_id: &str) -> OwnerStats {
        OwnerStats::collect(
            agency_id,
            self.records
                .iter()
                .filter(|r| r.agency_id.as_deref() == Some(agency_id)),
        )
    }

    pub fn streamer_stats(&self, streamer_id: &str) -> OwnerStats {
        OwnerStats::collect(
            streamer_id,
            self.records
                .iter()
                .filter(|r| r.streamer_id.as_deref() == Some(streamer_id)),
        )
    }

    /// Drop every record and delete the stored copy. Irreversible.
    pub fn clear_all(&mut self) -> Persistence {
        self.records.clear();

        match self.backend.remove() {
            Ok(()) => {
                self.degraded = false;
                tracing::debug!(location = %self.backend.location(), "Cleared usage data");
                Persistence::Saved
            }
            Err(e) => {
                self.degraded = true;
                tracing::warn!(
                    location = %self.backend.location(),
                    error = %e,
                    "Could not remove stored usage data"
                );
                Persistence::MemoryOnly
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True while the in-memory state is ahead of durable storage.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn location(&self) -> String {
        self.backend.location()
    }

    /// Retry the last failed write, if any.
    pub fn flush(&mut self) -> Persistence {
        if self.degraded {
            self.persist()
        } else {
            Persistence::Unchanged
        }
    }

    /// End the store's lifecycle, making one last attempt to persist pending state.
    pub fn close(mut self) -> Persistence {
        let outcome = self.flush();
        tracing::debug!(location = %self.backend.location(), ?outcome, "Closed usage store");
        outcome
    }

    fn persist(&mut self) -> Persistence {
        match self.backend.save(&self.records) {
            Ok(()) => {
                self.degraded = false;
                Persistence::Saved
            }
            Err(e) => {
                self.degraded = true;
                tracing::warn!(
                    location = %self.backend.location(),
                    error = %e,
                    "Could not persist usage data, continuing in memory"
                );
                Persistence::MemoryOnly
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::clock::ManualClock;
    use chrono::{Duration, TimeZone, Utc};

    fn store() -> (UsageStore, MemoryBackend, ManualClock) {
        let backend = MemoryBackend::new();
        let clock = ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        let store = UsageStore::open(backend.clone(), clock.clone());
        (store, backend, clock)
    }

    #[test]
    fn test_unknown_track_is_absent() {
        let (store, _, _) = store();
        assert!(store.get_usage("nope").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_record_usage_first_and_repeat() {
        let (mut store, _, clock) = store();

        assert_eq!(store.record_usage("t1", None, None), Persistence::Saved);
        let record = store.get_usage("t1").unwrap();
        assert_eq!(record.usage_count, 1);
        assert!(!record.favorite);

        clock.advance(Duration::seconds(30));
        let _ = store.record_usage("t1", None, None);
        let record = store.get_usage("t1").unwrap();
        assert_eq!(record.usage_count, 2);
        assert_eq!(record.last_used, Some(clock.now()));
    }

    #[test]
    fn test_most_popular_ties_keep_first_use_order() {
        let (mut store, _, _) = store();
        for id in ["a", "b", "c"] {
            let _ = store.record_usage(id, None, None);
        }
        let _ = store.record_usage("c", None, None);

        let ids: Vec<_> = store
            .most_popular(DEFAULT_LIMIT)
            .iter()
            .map(|r| r.track_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_recently_used_orders_by_time() {
        let (mut store, _, clock) = store();
        for id in ["a", "b", "c"] {
            clock.advance(Duration::seconds(1));
            let _ = store.record_usage(id, None, None);
        }
        clock.advance(Duration::seconds(1));
        let _ = store.record_usage("a", None, None);

        let ids: Vec<_> = store
            .recently_used(2)
            .iter()
            .map(|r| r.track_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_toggle_favorite_unknown_track() {
        let (mut store, backend, _) = store();
        assert_eq!(store.toggle_favorite("ghost"), Persistence::Unchanged);
        assert!(store.get_usage("ghost").is_none());
        assert!(backend.raw().is_none());
    }

    #[test]
    fn test_write_failure_degrades_to_memory() {
        let (mut store, backend, _) = store();
        backend.set_fail_writes(true);

        assert_eq!(store.record_usage("t1", None, None), Persistence::MemoryOnly);
        assert!(store.is_degraded());
        assert_eq!(store.get_usage("t1").unwrap().usage_count, 1);

        backend.set_fail_writes(false);
        assert_eq!(store.flush(), Persistence::Saved);
        assert!(!store.is_degraded());
        assert_eq!(store.flush(), Persistence::Unchanged);
    }

    #[test]
    fn test_close_flushes_pending_state() {
        let (mut store, backend, clock) = store();
        backend.set_fail_writes(true);
        let _ = store.record_usage("t1", Some("A"), None);
        backend.set_fail_writes(false);

        assert_eq!(store.close(), Persistence::Saved);

        let reopened = UsageStore::open(backend, clock);
        assert_eq!(reopened.get_usage("t1").unwrap().usage_count, 1);
    }
}
