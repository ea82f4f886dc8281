use std::time::Duration;

use color_eyre::eyre::{Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::ports::chart::{ObservedTrack, SyncTarget, TrackSource};

#[derive(Debug, Deserialize)]
struct FeedEntry {
    #[serde(default)]
    track_id: Option<String>,
    #[serde(default)]
    artists: Vec<String>,
    /// Single-artist shorthand for `artists`.
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    mix: Option<String>,
    #[serde(default)]
    release: Option<String>,
    #[serde(default)]
    duration_ms: Option<u32>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Reads a target's tracks from a JSON feed, in chart order:
/// `[{"track_id"?, "artists", "title", "mix"?, "release"?, "duration_ms"?}]`.
///
/// `feed` is fetched over HTTP when it is an http(s) URL and read from disk otherwise.
pub struct JsonFeedSource {
    client: Client,
}

impl JsonFeedSource {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    async fn fetch(&self, feed: &str) -> Result<String> {
        match Url::parse(feed) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                let response = self
                    .client
                    .get(url)
                    .timeout(Duration::from_secs(10))
                    .send()
                    .await?
                    .error_for_status()?;
                Ok(response.text().await?)
            }
            _ => Ok(tokio::fs::read_to_string(feed).await?),
        }
    }
}

fn parse_feed(body: &str) -> Result<Vec<ObservedTrack>> {
    let entries: Vec<FeedEntry> = serde_json::from_str(body)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let mut artists: Vec<String> = entry
                .artists
                .into_iter()
                .chain(entry.artist)
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            artists.dedup();
            let track = ObservedTrack {
                track_id: non_empty(entry.track_id),
                artists,
                title: entry.title.trim().to_string(),
                mix: non_empty(entry.mix),
                release: non_empty(entry.release),
                duration_ms: entry.duration_ms.filter(|d| *d > 0),
            };
            if track.track_id.is_none() && track.title.is_empty() {
                tracing::debug!("Skipping feed entry with neither id nor title");
                return None;
            }
            Some(track)
        })
        .collect())
}

#[async_trait::async_trait]
impl TrackSource for JsonFeedSource {
    async fn observe(&self, target: &SyncTarget) -> Result<Vec<ObservedTrack>> {
        let body = self
            .fetch(&target.feed)
            .await
            .wrap_err_with(|| format!("Failed to fetch feed {}", target.feed))?;
        let tracks = parse_feed(&body)
            .wrap_err_with(|| format!("Failed to parse feed {}", target.feed))?;
        tracing::debug!("Observed {} tracks for {}", tracks.len(), target.source_tag());
        Ok(tracks)
    }
}
