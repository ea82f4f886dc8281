use serde::{Deserialize, Serialize};

/// Spotify user profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyUser {
    pub id: String,
}

/// One page of a paginated Spotify listing
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyPage<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyOwner {
    pub id: String,
}

/// Spotify playlist from API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyPlaylist {
    pub id: String,
    pub name: String,
    pub owner: SpotifyOwner,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyArtistName {
    pub name: String,
}

/// Track fields requested when listing playlist items.
///
/// `id` is absent for local files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyItemTrack {
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artists: Vec<SpotifyArtistName>,
}

/// Playlist item; `track` is null when the track was removed from Spotify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyPlaylistItem {
    pub added_at: Option<String>,
    pub track: Option<SpotifyItemTrack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotifySnapshot {
    pub snapshot_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyPlaylistDescription {
    pub description: Option<String>,
}

/// Track as returned by the search endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifySearchTrack {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<SpotifyArtistName>,
    pub duration_ms: u32,
    #[serde(default)]
    pub popularity: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpotifySearchResponse {
    pub tracks: SpotifyPage<SpotifySearchTrack>,
}
