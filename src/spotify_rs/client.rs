use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::spotify_rs::types::{
    SpotifyPage, SpotifyPlaylist, SpotifyPlaylistDescription, SpotifyPlaylistItem,
    SpotifySearchResponse, SpotifySnapshot, SpotifyUser,
};

pub const SPOTIFY_API_URL: &str = "https://api.spotify.com/v1";

/// Only the fields the history engine needs; keeps each page small.
const PLAYLIST_ITEM_FIELDS: &str = "items(added_at,track(id,name,artists(name))),next";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const SEARCH_LIMIT: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum SpotifyApiError {
    #[error("Failed to send http request: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Spotify API returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Failed to parse response: {0}")]
    Decode(#[source] reqwest::Error),
}

impl SpotifyApiError {
    /// Worth retrying: the request may succeed unchanged later.
    pub fn is_transient(&self) -> bool {
        match self {
            SpotifyApiError::Transport(error) => {
                error.is_timeout() || error.is_connect() || error.is_request()
            }
            SpotifyApiError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            SpotifyApiError::Decode(_) => false,
        }
    }

    /// The API refused the request content, e.g. an unknown or unavailable track.
    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            SpotifyApiError::Status { status, .. }
                if *status == StatusCode::BAD_REQUEST
                    || *status == StatusCode::FORBIDDEN
                    || *status == StatusCode::NOT_FOUND
        )
    }
}

pub fn track_uri(track_id: &str) -> String {
    format!("spotify:track:{}", track_id)
}

#[derive(Serialize)]
struct TrackUri<'a> {
    uri: &'a str,
}

/// Spotify API client
pub struct SpotifyClient {
    access_token: String,
    base_url: String,
    client: reqwest::Client,
}

impl SpotifyClient {
    pub fn new(access_token: String) -> Self {
        Self::with_base_url(access_token, SPOTIFY_API_URL.to_string())
    }

    pub fn with_base_url(access_token: String, base_url: String) -> Self {
        Self {
            access_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SpotifyApiError> {
        let response = request
            .bearer_auth(&self.access_token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(SpotifyApiError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or("Failed to get error text".to_string());
            return Err(SpotifyApiError::Status { status, body });
        }

        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SpotifyApiError> {
        self.send(self.client.get(url))
            .await?
            .json()
            .await
            .map_err(SpotifyApiError::Decode)
    }

    /// Get the current user's profile
    pub async fn get_current_user(&self) -> Result<SpotifyUser, SpotifyApiError> {
        self.get_json(&self.url("/me")).await
    }

    pub fn user_playlists_url(&self) -> String {
        self.url("/me/playlists?limit=50")
    }

    /// One page of the current user's playlists
    pub async fn get_user_playlists_page(
        &self,
        url: &str,
    ) -> Result<SpotifyPage<SpotifyPlaylist>, SpotifyApiError> {
        self.get_json(url).await
    }

    pub fn playlist_items_url(&self, playlist_id: &str) -> String {
        self.url(&format!(
            "/playlists/{}/tracks?limit=100&additional_types=track&fields={}",
            urlencoding::encode(playlist_id),
            urlencoding::encode(PLAYLIST_ITEM_FIELDS)
        ))
    }

    /// One page of playlist items, restricted to id, name and artists
    pub async fn get_playlist_items_page(
        &self,
        url: &str,
    ) -> Result<SpotifyPage<SpotifyPlaylistItem>, SpotifyApiError> {
        self.get_json(url).await
    }

    /// Search the catalog for tracks
    pub async fn search_tracks(&self, query: &str) -> Result<SpotifySearchResponse, SpotifyApiError> {
        self.get_json(&self.url(&format!(
            "/search?type=track&limit={}&q={}",
            SEARCH_LIMIT,
            urlencoding::encode(query)
        )))
        .await
    }

    pub async fn create_playlist(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
    ) -> Result<SpotifyPlaylist, SpotifyApiError> {
        let request = self
            .client
            .post(self.url(&format!("/users/{}/playlists", urlencoding::encode(user_id))))
            .json(&json!({ "name": name, "description": description, "public": false }));

        self.send(request)
            .await?
            .json()
            .await
            .map_err(SpotifyApiError::Decode)
    }

    /// Add up to 100 tracks, optionally at a position
    pub async fn add_items(
        &self,
        playlist_id: &str,
        track_ids: &[String],
        position: Option<u32>,
    ) -> Result<SpotifySnapshot, SpotifyApiError> {
        let uris: Vec<String> = track_ids.iter().map(|id| track_uri(id)).collect();
        let body = match position {
            Some(position) => json!({ "uris": uris, "position": position }),
            None => json!({ "uris": uris }),
        };
        let request = self
            .client
            .post(self.url(&format!(
                "/playlists/{}/tracks",
                urlencoding::encode(playlist_id)
            )))
            .json(&body);

        self.send(request)
            .await?
            .json()
            .await
            .map_err(SpotifyApiError::Decode)
    }

    /// Remove every occurrence of up to 100 tracks
    pub async fn remove_items(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<SpotifySnapshot, SpotifyApiError> {
        let uris: Vec<String> = track_ids.iter().map(|id| track_uri(id)).collect();
        let tracks: Vec<TrackUri<'_>> = uris.iter().map(|uri| TrackUri { uri }).collect();
        let request = self
            .client
            .delete(self.url(&format!(
                "/playlists/{}/tracks",
                urlencoding::encode(playlist_id)
            )))
            .json(&json!({ "tracks": tracks }));

        self.send(request)
            .await?
            .json()
            .await
            .map_err(SpotifyApiError::Decode)
    }

    /// Replace the playlist contents with up to 100 tracks
    pub async fn replace_items(
        &self,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), SpotifyApiError> {
        let uris: Vec<String> = track_ids.iter().map(|id| track_uri(id)).collect();
        let request = self
            .client
            .put(self.url(&format!(
                "/playlists/{}/tracks",
                urlencoding::encode(playlist_id)
            )))
            .json(&json!({ "uris": uris }));

        self.send(request).await?;
        Ok(())
    }

    pub async fn get_playlist_description(
        &self,
        playlist_id: &str,
    ) -> Result<Option<String>, SpotifyApiError> {
        let details: SpotifyPlaylistDescription = self
            .get_json(&self.url(&format!(
                "/playlists/{}?fields=description",
                urlencoding::encode(playlist_id)
            )))
            .await?;
        Ok(details.description)
    }

    pub async fn set_playlist_description(
        &self,
        playlist_id: &str,
        description: &str,
    ) -> Result<(), SpotifyApiError> {
        let request = self
            .client
            .put(self.url(&format!("/playlists/{}", urlencoding::encode(playlist_id))))
            .json(&json!({ "description": description }));

        self.send(request).await?;
        Ok(())
    }
}
