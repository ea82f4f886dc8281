use tempfile::TempDir;

use crate::history::{RecordStore, TrackEvent};
use crate::ports::playlist::PlaylistTrack;

/// Record Store inside a fresh temporary directory. Keep the `TempDir` alive
/// for as long as the store is used.
pub fn temp_store() -> (TempDir, RecordStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::open(dir.path());
    (dir, store)
}

pub fn event(track_id: &str, playlist_id: &str, datetime_added: &str) -> TrackEvent {
    TrackEvent::new(
        track_id,
        playlist_id,
        &format!("Playlist {playlist_id}"),
        datetime_added,
        "test",
    )
}

pub fn playlist_track(track_id: &str) -> PlaylistTrack {
    PlaylistTrack {
        track_id: track_id.to_string(),
        position: 0,
        name: format!("Track {track_id}"),
        artist: Some("Artist".to_string()),
        added_at: Some("2024-01-01T00:00:00Z".to_string()),
    }
}

/// Tracks at consecutive positions starting from 0.
pub fn playlist_tracks(track_ids: &[&str]) -> Vec<PlaylistTrack> {
    track_ids
        .iter()
        .enumerate()
        .map(|(position, id)| PlaylistTrack {
            position,
            ..playlist_track(id)
        })
        .collect()
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
