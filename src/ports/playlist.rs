use color_eyre::eyre::Result;

/// Largest number of track ids the playlist API accepts in one call.
pub const MAX_ITEMS_PER_CALL: usize = 100;

/// A playlist visible to the authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRef {
    pub id: String,
    pub name: String,
    pub owner_id: String,
}

/// One entry of a playlist, restricted to the fields the core needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistTrack {
    pub track_id: String,
    /// Index in the live playlist, counting the local files and removed
    /// tracks that listings skip.
    pub position: usize,
    pub name: String,
    pub artist: Option<String>,
    pub added_at: Option<String>,
}

impl PlaylistTrack {
    /// `artist - name`, for log lines.
    pub fn label(&self) -> String {
        match &self.artist {
            Some(artist) => format!("{} - {}", artist, self.name),
            None => self.name.clone(),
        }
    }
}

/// A catalog track returned by a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackCandidate {
    pub track_id: String,
    pub name: String,
    pub artists: Vec<String>,
    pub duration_ms: u32,
    pub popularity: u32,
}

/// Result of an add call: which ids the API accepted and which it refused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddOutcome {
    pub confirmed: Vec<String>,
    pub rejected: Vec<String>,
}

impl AddOutcome {
    pub fn merge(&mut self, other: AddOutcome) {
        self.confirmed.extend(other.confirmed);
        self.rejected.extend(other.rejected);
    }
}

/// Port trait wrapping the playlist-mutation capabilities used by the core.
///
/// Implementations live in `services::spotify::client` (production) or test mocks.
/// Callers never pass more than [`MAX_ITEMS_PER_CALL`] ids to a single call.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PlaylistApi: Send + Sync {
    /// Playlists owned by the authenticated user.
    async fn list_playlists(&self) -> Result<Vec<PlaylistRef>>;

    async fn find_playlist(&self, name: &str) -> Result<Option<PlaylistRef>>;

    async fn create_playlist(&self, name: &str) -> Result<PlaylistRef>;

    /// Every track of the playlist, in playlist order. Local files and
    /// tracks removed from the catalog are skipped but keep their position.
    async fn list_tracks(&self, playlist_id: &str) -> Result<Vec<PlaylistTrack>>;

    async fn add_tracks(
        &self,
        playlist_id: &str,
        track_ids: &[String],
        position: Option<u32>,
    ) -> Result<AddOutcome>;

    /// Removes the occurrence of `track_id` at `position`. Returns `false`
    /// when the API cannot target a single occurrence.
    async fn remove_track_occurrence(
        &self,
        playlist_id: &str,
        track_id: &str,
        position: u32,
    ) -> Result<bool>;

    async fn remove_all_occurrences(&self, playlist_id: &str, track_ids: &[String]) -> Result<()>;

    /// Replaces the whole playlist with `track_ids`; an empty slice clears it.
    async fn replace_tracks(&self, playlist_id: &str, track_ids: &[String]) -> Result<()>;

    async fn playlist_description(&self, playlist_id: &str) -> Result<String>;

    async fn set_playlist_description(&self, playlist_id: &str, description: &str)
    -> Result<()>;

    /// Catalog tracks matching a free-text query, best match first. A query
    /// the catalog refuses yields no candidates.
    async fn search_tracks(&self, query: &str) -> Result<Vec<TrackCandidate>>;
}
