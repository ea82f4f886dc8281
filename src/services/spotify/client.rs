use std::future::Future;
use std::num::NonZeroU32;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use color_eyre::eyre::{Result, WrapErr};
use governor::{
    Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::direct::NotKeyed,
};

use crate::config::SpotifyConfig;
use crate::ports::playlist::{
    AddOutcome, PlaylistApi, PlaylistRef, PlaylistTrack, TrackCandidate,
};
use crate::spotify_rs::types::{SpotifyPlaylist, SpotifyPlaylistItem, SpotifySearchTrack};
use crate::spotify_rs::{SpotifyApiError, SpotifyClient};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// [`PlaylistApi`] backed by the Spotify Web API.
///
/// Every attempt, retries included, waits on a shared rate limiter. Transient
/// failures are retried with exponential backoff.
pub struct SpotifyHttpAdapter {
    client: SpotifyClient,
    user_id: String,
    limiter: DirectRateLimiter,
    max_retries: usize,
    /// Description given to playlists this adapter creates.
    playlist_description: String,
}

impl SpotifyHttpAdapter {
    pub fn new(client: SpotifyClient, user_id: String, config: &SpotifyConfig) -> Self {
        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            client,
            user_id,
            limiter: RateLimiter::direct(Quota::per_second(per_second)),
            max_retries: config.max_retries,
            playlist_description: String::new(),
        }
    }

    pub fn with_playlist_description(mut self, description: &str) -> Self {
        self.playlist_description = description.to_string();
        self
    }

    /// Builds the adapter from config, asking the API for the user id when
    /// none is configured.
    pub async fn connect(config: &SpotifyConfig) -> Result<Self> {
        let client = SpotifyClient::new(config.access_token.clone());
        let user_id = match config.user_id.as_deref() {
            Some(user_id) if !user_id.is_empty() => user_id.to_string(),
            _ => {
                client
                    .get_current_user()
                    .await
                    .wrap_err("Failed to get current Spotify user")?
                    .id
            }
        };
        tracing::info!("Using Spotify account {}", user_id);
        Ok(Self::new(client, user_id, config))
    }

    async fn call<T, F, Fut>(&self, what: &str, mut request: F) -> Result<T, SpotifyApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SpotifyApiError>>,
    {
        let attempt = || {
            let response = request();
            async move {
                self.limiter.until_ready().await;
                response.await
            }
        };
        attempt
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(500))
                    .with_max_times(self.max_retries),
            )
            .when(SpotifyApiError::is_transient)
            .notify(|error: &SpotifyApiError, delay: Duration| {
                tracing::warn!("{} failed, retrying in {:?}: {}", what, delay, error);
            })
            .await
    }

    async fn add_one_by_one(
        &self,
        playlist_id: &str,
        track_ids: &[String],
        position: Option<u32>,
    ) -> Result<AddOutcome> {
        let mut outcome = AddOutcome::default();
        for track_id in track_ids {
            let single = std::slice::from_ref(track_id);
            let at = position.map(|p| p + outcome.confirmed.len() as u32);
            match self
                .call("Add track", || self.client.add_items(playlist_id, single, at))
                .await
            {
                Ok(_) => outcome.confirmed.push(track_id.clone()),
                Err(error) if error.is_rejected() => {
                    tracing::debug!("Spotify rejected track {}: {}", track_id, error);
                    outcome.rejected.push(track_id.clone());
                }
                Err(error) => {
                    return Err(error)
                        .wrap_err_with(|| format!("Failed to add track {}", track_id));
                }
            }
        }
        Ok(outcome)
    }
}

fn to_playlist_ref(playlist: SpotifyPlaylist) -> PlaylistRef {
    PlaylistRef {
        id: playlist.id,
        name: playlist.name,
        owner_id: playlist.owner.id,
    }
}

/// `None` for local files and tracks no longer in the catalog.
fn to_playlist_track(item: SpotifyPlaylistItem, position: usize) -> Option<PlaylistTrack> {
    let track = item.track?;
    let track_id = track.id.filter(|id| !id.is_empty())?;
    let artists: Vec<String> = track.artists.into_iter().map(|a| a.name).collect();
    Some(PlaylistTrack {
        track_id,
        position,
        name: track.name,
        artist: (!artists.is_empty()).then(|| artists.join(", ")),
        added_at: item.added_at,
    })
}

fn to_track_candidate(track: SpotifySearchTrack) -> TrackCandidate {
    TrackCandidate {
        track_id: track.id,
        name: track.name,
        artists: track.artists.into_iter().map(|a| a.name).collect(),
        duration_ms: track.duration_ms,
        popularity: track.popularity,
    }
}

#[async_trait::async_trait]
impl PlaylistApi for SpotifyHttpAdapter {
    async fn list_playlists(&self) -> Result<Vec<PlaylistRef>> {
        let mut playlists = Vec::new();
        let mut next = Some(self.client.user_playlists_url());

        while let Some(url) = next {
            let page = self
                .call("List playlists", || self.client.get_user_playlists_page(&url))
                .await
                .wrap_err("Failed to list playlists")?;
            playlists.extend(
                page.items
                    .into_iter()
                    .filter(|p| p.owner.id == self.user_id)
                    .map(to_playlist_ref),
            );
            next = page.next;
        }

        Ok(playlists)
    }

    async fn find_playlist(&self, name: &str) -> Result<Option<PlaylistRef>> {
        Ok(self
            .list_playlists()
            .await?
            .into_iter()
            .find(|p| p.name == name))
    }

    async fn create_playlist(&self, name: &str) -> Result<PlaylistRef> {
        let playlist = self
            .call("Create playlist", || {
                self.client
                    .create_playlist(&self.user_id, name, &self.playlist_description)
            })
            .await
            .wrap_err_with(|| format!("Failed to create playlist {}", name))?;
        tracing::info!("Created playlist {} ({})", playlist.name, playlist.id);
        Ok(to_playlist_ref(playlist))
    }

    async fn list_tracks(&self, playlist_id: &str) -> Result<Vec<PlaylistTrack>> {
        let mut tracks = Vec::new();
        let mut position = 0;
        let mut next = Some(self.client.playlist_items_url(playlist_id));

        while let Some(url) = next {
            let page = self
                .call("List playlist tracks", || {
                    self.client.get_playlist_items_page(&url)
                })
                .await
                .wrap_err_with(|| format!("Failed to list tracks of playlist {}", playlist_id))?;
            for item in page.items {
                tracks.extend(to_playlist_track(item, position));
                position += 1;
            }
            next = page.next;
        }

        Ok(tracks)
    }

    async fn add_tracks(
        &self,
        playlist_id: &str,
        track_ids: &[String],
        position: Option<u32>,
    ) -> Result<AddOutcome> {
        if track_ids.is_empty() {
            return Ok(AddOutcome::default());
        }

        match self
            .call("Add tracks", || {
                self.client.add_items(playlist_id, track_ids, position)
            })
            .await
        {
            Ok(snapshot) => {
                tracing::debug!(
                    "Added {} tracks to {} (snapshot {})",
                    track_ids.len(),
                    playlist_id,
                    snapshot.snapshot_id
                );
                Ok(AddOutcome {
                    confirmed: track_ids.to_vec(),
                    rejected: Vec::new(),
                })
            }
            // one bad id fails the whole batch
            Err(error) if error.is_rejected() => {
                tracing::warn!(
                    "Batch of {} tracks rejected ({}), adding one by one",
                    track_ids.len(),
                    error
                );
                self.add_one_by_one(playlist_id, track_ids, position).await
            }
            Err(error) => Err(error)
                .wrap_err_with(|| format!("Failed to add tracks to playlist {}", playlist_id)),
        }
    }

    async fn remove_track_occurrence(
        &self,
        _playlist_id: &str,
        _track_id: &str,
        _position: u32,
    ) -> Result<bool> {
        // The Web API dropped positional removal.
        Ok(false)
    }

    async fn remove_all_occurrences(&self, playlist_id: &str, track_ids: &[String]) -> Result<()> {
        if track_ids.is_empty() {
            return Ok(());
        }
        self.call("Remove tracks", || {
            self.client.remove_items(playlist_id, track_ids)
        })
        .await
        .wrap_err_with(|| format!("Failed to remove tracks from playlist {}", playlist_id))?;
        Ok(())
    }

    async fn replace_tracks(&self, playlist_id: &str, track_ids: &[String]) -> Result<()> {
        self.call("Replace tracks", || {
            self.client.replace_items(playlist_id, track_ids)
        })
        .await
        .wrap_err_with(|| format!("Failed to replace tracks of playlist {}", playlist_id))
    }

    async fn playlist_description(&self, playlist_id: &str) -> Result<String> {
        let description = self
            .call("Get description", || {
                self.client.get_playlist_description(playlist_id)
            })
            .await
            .wrap_err_with(|| format!("Failed to get description of playlist {}", playlist_id))?;
        Ok(description.unwrap_or_default())
    }

    async fn set_playlist_description(&self, playlist_id: &str, description: &str) -> Result<()> {
        self.call("Set description", || {
            self.client.set_playlist_description(playlist_id, description)
        })
        .await
        .wrap_err_with(|| format!("Failed to set description of playlist {}", playlist_id))
    }

    async fn search_tracks(&self, query: &str) -> Result<Vec<TrackCandidate>> {
        match self
            .call("Search tracks", || self.client.search_tracks(query))
            .await
        {
            Ok(response) => Ok(response
                .tracks
                .items
                .into_iter()
                .map(to_track_candidate)
                .collect()),
            Err(error) if error.is_rejected() => {
                tracing::debug!("Spotify refused search \"{}\": {}", query, error);
                Ok(Vec::new())
            }
            Err(error) => {
                Err(error).wrap_err_with(|| format!("Failed to search for \"{}\"", query))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spotify_rs::types::{SpotifyArtistName, SpotifyItemTrack};
    use crate::test_utils::ids;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn item(id: Option<&str>, artists: &[&str]) -> SpotifyPlaylistItem {
        SpotifyPlaylistItem {
            added_at: Some("2024-02-03T04:05:06Z".to_string()),
            track: Some(SpotifyItemTrack {
                id: id.map(str::to_string),
                name: "Song".to_string(),
                artists: artists
                    .iter()
                    .map(|name| SpotifyArtistName {
                        name: name.to_string(),
                    })
                    .collect(),
            }),
        }
    }

    /// Answers one request per connection with the next `(status, body)` and
    /// returns every request seen as `"METHOD path body"`. `{base}` in a body
    /// becomes the stub's own URL.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let own_url = base_url.clone();

        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let body = body.replace("{base}", &own_url);
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
                let content_length = head
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .map(|(_, value)| value.trim().parse::<usize>().unwrap())
                    .unwrap_or(0);
                while buf.len() < header_end + content_length {
                    let n = socket.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                }

                let request_line = head.lines().next().unwrap_or_default();
                let mut parts = request_line.split(' ');
                let method = parts.next().unwrap_or_default();
                let path = parts.next().unwrap_or_default();
                let request_body = String::from_utf8_lossy(&buf[header_end..]);
                seen.push(format!("{} {} {}", method, path, request_body));

                let response = format!(
                    "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            seen
        });

        (base_url, handle)
    }

    fn adapter(base_url: String, max_retries: usize) -> SpotifyHttpAdapter {
        let config = SpotifyConfig {
            requests_per_second: 100,
            max_retries,
            ..SpotifyConfig::default()
        };
        SpotifyHttpAdapter::new(
            SpotifyClient::with_base_url("token".to_string(), base_url),
            "me".to_string(),
            &config,
        )
    }

    const SNAPSHOT: &str = r#"{"snapshot_id": "s1"}"#;
    const INVALID_ID: &str = r#"{"error": {"status": 400, "message": "Invalid base62 id"}}"#;

    #[test]
    fn test_playlist_track_joins_artists() {
        let track = to_playlist_track(item(Some("t1"), &["A", "B"]), 3).unwrap();
        assert_eq!(track.track_id, "t1");
        assert_eq!(track.position, 3);
        assert_eq!(track.artist.as_deref(), Some("A, B"));
        assert_eq!(track.added_at.as_deref(), Some("2024-02-03T04:05:06Z"));
        assert_eq!(track.label(), "A, B - Song");
    }

    #[test]
    fn test_playlist_track_without_artists() {
        let track = to_playlist_track(item(Some("t1"), &[]), 0).unwrap();
        assert_eq!(track.artist, None);
    }

    #[test]
    fn test_local_and_removed_tracks_are_skipped() {
        assert!(to_playlist_track(item(None, &["A"]), 0).is_none());
        assert!(to_playlist_track(item(Some(""), &["A"]), 0).is_none());

        let removed = SpotifyPlaylistItem {
            added_at: None,
            track: None,
        };
        assert!(to_playlist_track(removed, 0).is_none());
    }

    #[test]
    fn test_zero_rate_falls_back_to_one_per_second() {
        let config = SpotifyConfig {
            requests_per_second: 0,
            ..SpotifyConfig::default()
        };
        let adapter = SpotifyHttpAdapter::new(
            SpotifyClient::new("token".to_string()),
            "me".to_string(),
            &config,
        );
        assert_eq!(adapter.user_id, "me");
        assert!(adapter.limiter.check().is_ok());
        assert!(adapter.limiter.check().is_err());
    }

    #[tokio::test]
    async fn test_rejected_batch_is_split_into_confirmed_and_rejected() {
        let (base_url, server) = serve(vec![
            (400, INVALID_ID),
            (201, SNAPSHOT),
            (400, INVALID_ID),
            (201, SNAPSHOT),
        ])
        .await;
        let adapter = adapter(base_url, 4);

        let outcome = adapter
            .add_tracks("pl", &ids(&["t1", "bad", "t3"]), Some(0))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AddOutcome {
                confirmed: ids(&["t1", "t3"]),
                rejected: ids(&["bad"]),
            }
        );

        let seen = server.await.unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|r| r.starts_with("POST /playlists/pl/tracks ")));
        assert!(seen[0].contains("spotify:track:bad") && seen[0].contains("spotify:track:t3"));
        assert!(seen[1].contains(r#""position":0"#) && seen[1].contains("spotify:track:t1"));
        assert!(seen[2].contains("spotify:track:bad"));
        // the rejected id does not take a slot
        assert!(seen[3].contains(r#""position":1"#) && seen[3].contains("spotify:track:t3"));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let (base_url, server) = serve(vec![(503, "{}"), (201, SNAPSHOT)]).await;
        let adapter = adapter(base_url, 4);

        let outcome = adapter.add_tracks("pl", &ids(&["t1"]), None).await.unwrap();
        assert_eq!(outcome.confirmed, ids(&["t1"]));
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retries_wait_on_the_rate_limiter() {
        let (base_url, server) = serve(vec![(503, "{}"), (201, SNAPSHOT)]).await;
        let config = SpotifyConfig {
            requests_per_second: 1,
            max_retries: 1,
            ..SpotifyConfig::default()
        };
        let adapter = SpotifyHttpAdapter::new(
            SpotifyClient::with_base_url("token".to_string(), base_url),
            "me".to_string(),
            &config,
        );

        let started = std::time::Instant::now();
        adapter.add_tracks("pl", &ids(&["t1"]), None).await.unwrap();
        // backoff alone would retry after 500 ms
        assert!(started.elapsed() >= Duration::from_millis(900));
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_gives_up_after_max_retries() {
        let (base_url, server) = serve(vec![(503, "{}"), (503, "{}")]).await;
        let adapter = adapter(base_url, 1);

        assert!(adapter.add_tracks("pl", &ids(&["t1"]), None).await.is_err());
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried_by_playlist_calls() {
        let (base_url, server) = serve(vec![(404, "{}")]).await;
        let adapter = adapter(base_url, 4);

        assert!(adapter.replace_tracks("gone", &ids(&["t1"])).await.is_err());
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_created_playlist_gets_configured_description() {
        let (base_url, server) = serve(vec![(
            201,
            r#"{"id": "new", "name": "Beatport: Trance", "owner": {"id": "me"}}"#,
        )])
        .await;
        let adapter = adapter(base_url, 4).with_playlist_description("Synced from charts");

        let playlist = adapter.create_playlist("Beatport: Trance").await.unwrap();
        assert_eq!(playlist.id, "new");
        assert_eq!(playlist.owner_id, "me");

        let seen = server.await.unwrap();
        assert!(seen[0].starts_with("POST /users/me/playlists "));
        assert!(seen[0].contains(r#""description":"Synced from charts""#));
    }

    #[tokio::test]
    async fn test_list_tracks_keeps_live_positions_across_pages() {
        let (base_url, server) = serve(vec![
            (
                200,
                r#"{"items": [
                    {"added_at": null, "track": {"id": "a", "name": "A", "artists": []}},
                    {"added_at": null, "track": {"id": null, "name": "Local", "artists": []}}
                ], "next": "{base}/playlists/pl/tracks?offset=2"}"#,
            ),
            (
                200,
                r#"{"items": [
                    {"added_at": null, "track": null},
                    {"added_at": null, "track": {"id": "b", "name": "B", "artists": []}}
                ], "next": null}"#,
            ),
        ])
        .await;
        let adapter = adapter(base_url, 4);

        let tracks = adapter.list_tracks("pl").await.unwrap();
        let positions: Vec<_> = tracks
            .iter()
            .map(|t| (t.track_id.as_str(), t.position))
            .collect();
        assert_eq!(positions, vec![("a", 0), ("b", 3)]);

        let seen = server.await.unwrap();
        assert!(seen[1].starts_with("GET /playlists/pl/tracks?offset=2 "));
    }

    #[tokio::test]
    async fn test_search_maps_candidates_and_tolerates_refusal() {
        let (base_url, server) = serve(vec![
            (
                200,
                r#"{"tracks": {"items": [
                    {"id": "t1", "name": "Shivers - Original Mix", "artists": [{"name": "Armin van Buuren"}],
                     "duration_ms": 400000, "popularity": 42}
                ], "next": null}}"#,
            ),
            (400, r#"{"error": {"status": 400, "message": "No search query"}}"#),
        ])
        .await;
        let adapter = adapter(base_url, 4);

        let candidates = adapter.search_tracks("Shivers Armin").await.unwrap();
        assert_eq!(
            candidates,
            vec![TrackCandidate {
                track_id: "t1".into(),
                name: "Shivers - Original Mix".into(),
                artists: ids(&["Armin van Buuren"]),
                duration_ms: 400000,
                popularity: 42,
            }]
        );
        assert!(adapter.search_tracks("").await.unwrap().is_empty());

        let seen = server.await.unwrap();
        assert!(seen[0].starts_with("GET /search?type=track&limit=10&q=Shivers%20Armin "));
    }
}
