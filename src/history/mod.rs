//! Durable record of every track ever placed into a managed playlist.
//!
//! The record is keyed logically by `(track_id, playlist_id)`. Rows are only
//! ever appended during normal operation; [`dedup::dedup_history`] collapses
//! repeated keys when asked to.

pub mod cache;
mod columnar;
pub mod dedup;
pub mod store;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use cache::{CacheKey, HistoryCache};
pub use store::RecordStore;

/// Textual layout of `datetime_added`. Sorting these strings sorts by time.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// File name of the Record Store inside the history directory.
pub const HISTORY_FILE_NAME: &str = "hist_playlists_tracks.colgz";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("History file not found at {0}")]
    NotFound(PathBuf),
    #[error("Failed to access history file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("History file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

pub fn format_datetime(at: DateTime<Utc>) -> String {
    at.format(DATETIME_FORMAT).to_string()
}

pub fn now_datetime() -> String {
    format_datetime(Utc::now())
}

/// One row of the Record Store.
///
/// `playlist_id`, `playlist_name` and `source` are low-cardinality, so they
/// are shared `Arc<str>` values: a decoded table holds each distinct value once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEvent {
    pub track_id: String,
    pub playlist_id: Arc<str>,
    pub playlist_name: Arc<str>,
    pub datetime_added: String,
    pub source: Arc<str>,
}

impl TrackEvent {
    pub fn new(
        track_id: impl Into<String>,
        playlist_id: &str,
        playlist_name: &str,
        datetime_added: impl Into<String>,
        source: &str,
    ) -> Self {
        Self {
            track_id: track_id.into(),
            playlist_id: Arc::from(playlist_id),
            playlist_name: Arc::from(playlist_name),
            datetime_added: datetime_added.into(),
            source: Arc::from(source),
        }
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.track_id, &self.playlist_id)
    }
}

/// An in-memory slice of the Record Store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryTable {
    events: Vec<TrackEvent>,
}

impl HistoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<TrackEvent>) -> Self {
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[TrackEvent] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TrackEvent> {
        self.events.iter()
    }

    pub fn into_events(self) -> Vec<TrackEvent> {
        self.events
    }

    pub fn push(&mut self, event: TrackEvent) {
        self.events.push(event);
    }

    pub fn extend(&mut self, other: HistoryTable) {
        self.events.extend(other.events);
    }

    /// Distinct track ids present in this table. One row is enough to count
    /// a track as already added.
    pub fn track_ids(&self) -> HashSet<&str> {
        self.events.iter().map(|e| e.track_id.as_str()).collect()
    }

}

impl FromIterator<TrackEvent> for HistoryTable {
    fn from_iter<I: IntoIterator<Item = TrackEvent>>(iter: I) -> Self {
        Self::from_events(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a HistoryTable {
    type Item = &'a TrackEvent;
    type IntoIter = std::slice::Iter<'a, TrackEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
