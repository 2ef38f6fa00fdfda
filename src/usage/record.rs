//! # Usage Records
//!
//! The per-track record kept by the store and the aggregate returned by the
//! per-owner statistics queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Usage statistics for a single track.
///
/// Field names are serialized in camelCase (`trackId`, `usageCount`, ...).
/// Every field except the key tolerates being absent in stored data so that
/// older or hand-edited files still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    /// Opaque track identifier, unique within a store
    #[serde(default)]
    pub track_id: String,
    /// Number of usage events seen for this track
    #[serde(default)]
    pub usage_count: u64,
    /// Timestamp of the most recent usage event
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    /// Owning agency, as last reported by a usage event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agency_id: Option<String>,
    /// Streamer who triggered the most recent attributed usage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streamer_id: Option<String>,
    /// Marked as favorite; independent of the usage count
    #[serde(default)]
    pub favorite: bool,
}

impl UsageRecord {
    /// Create the record for a track's first usage event.
    pub fn first_use(
        track_id: &str,
        at: DateTime<Utc>,
        agency_id: Option<&str>,
        streamer_id: Option<&str>,
    ) -> Self {
        Self {
            track_id: track_id.to_string(),
            usage_count: 1,
            last_used: Some(at),
            agency_id: supplied(agency_id).map(str::to_string),
            streamer_id: supplied(streamer_id).map(str::to_string),
            favorite: false,
        }
    }

    /// Apply a subsequent usage event.
    ///
    /// Owner fields are only overwritten when the event carries a value.
    pub fn record_use(
        &mut self,
        at: DateTime<Utc>,
        agency_id: Option<&str>,
        streamer_id: Option<&str>,
    ) {
        self.usage_count = self.usage_count.saturating_add(1);
        self.last_used = Some(at);
        if let Some(agency) = supplied(agency_id) {
            self.agency_id = Some(agency.to_string());
        }
        if let Some(streamer) = supplied(streamer_id) {
            self.streamer_id = Some(streamer.to_string());
        }
    }
}

/// An empty string is "not supplied", never "clear the field".
fn supplied(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Aggregate usage over every track attributed to one owner (agency or streamer).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerStats {
    /// The agency or streamer the statistics were computed for
    pub owner_id: String,
    /// Number of tracks attributed to the owner
    pub total_tracks: usize,
    /// Sum of `usage_count` over those tracks
    pub total_usage: u64,
    /// Track with the highest usage count; the first one seen wins a tie
    pub most_used_track: Option<UsageRecord>,
    /// `total_usage / total_tracks`, or 0 when the owner has no tracks
    pub average_usage_per_track: f64,
}

impl OwnerStats {
    /// Fold the given records into owner statistics.
    pub fn collect<'a>(
        owner_id: &str,
        records: impl IntoIterator<Item = &'a UsageRecord>,
    ) -> Self {
        let mut total_tracks = 0usize;
        let mut total_usage = 0u64;
        let mut most_used: Option<&UsageRecord> = None;

        for record in records {
            total_tracks += 1;
            total_usage = total_usage.saturating_add(record.usage_count);
            match most_used {
                Some(best) if best.usage_count >= record.usage_count => {}
                _ => most_used = Some(record),
            }
        }

        let average_usage_per_track = if total_tracks == 0 {
            0.0
        } else {
            total_usage as f64 / total_tracks as f64
        };

        Self {
            owner_id: owner_id.to_string(),
            total_tracks,
            total_usage,
            most_used_track: most_used.cloned(),
            average_usage_per_track,
        }
    }
}
