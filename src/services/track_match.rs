use color_eyre::eyre::{Result, WrapErr};
use unaccent::unaccent;

use crate::ports::chart::ObservedTrack;
use crate::ports::playlist::{PlaylistApi, TrackCandidate};

/// A single differing letter case already drops plain ratios to about 0.85.
const MATCH_THRESHOLD: f64 = 0.85;

/// Lowercase, accents stripped, punctuation turned into single spaces.
fn normalize(value: &str) -> String {
    unaccent(value)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn similarity(a: &str, b: &str) -> f64 {
    jaro_winkler::jaro_winkler(&normalize(a), &normalize(b))
}

fn full_title(track: &ObservedTrack) -> String {
    match &track.mix {
        Some(mix) => format!("{} - {}", track.title, mix),
        None => track.title.clone(),
    }
}

/// Within max(5 s, 3% of the shorter track).
fn durations_match(observed_ms: u32, found_ms: u32) -> bool {
    let shorter = observed_ms.min(found_ms);
    let tolerance = 5000u32.max((shorter as f64 * 0.03) as u32);
    observed_ms.abs_diff(found_ms) <= tolerance
}

/// Best artist pairing times title similarity, in `0.0..=1.0`.
fn score(track: &ObservedTrack, candidate: &TrackCandidate) -> f64 {
    let artist = if track.artists.is_empty() {
        1.0
    } else {
        track
            .artists
            .iter()
            .flat_map(|a| candidate.artists.iter().map(move |b| similarity(a, b)))
            .fold(0.0_f64, f64::max)
    };
    artist * similarity(&full_title(track), &candidate.name)
}

/// Picks the candidate that is `track`.
///
/// A lone result is taken as is. Among several, a single duration match that
/// looks similar enough wins, then the most similar candidate above the
/// threshold, then the most popular duration match.
fn best_match<'a>(
    track: &ObservedTrack,
    candidates: &'a [TrackCandidate],
) -> Option<&'a TrackCandidate> {
    if let [only] = candidates {
        return Some(only);
    }

    let duration_matches: Vec<&TrackCandidate> = match track.duration_ms {
        Some(observed) => candidates
            .iter()
            .filter(|c| durations_match(observed, c.duration_ms))
            .collect(),
        None => Vec::new(),
    };
    if let [only] = duration_matches.as_slice() {
        if score(track, only) >= MATCH_THRESHOLD {
            return Some(*only);
        }
    }

    let most_similar = candidates
        .iter()
        .map(|c| (c, score(track, c)))
        .filter(|(_, s)| *s >= MATCH_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c);
    if most_similar.is_some() {
        return most_similar;
    }

    duration_matches.into_iter().max_by_key(|c| c.popularity)
}

/// Queries from most to least specific; duplicates dropped.
fn search_queries(track: &ObservedTrack) -> Vec<String> {
    let artists = track.artists.join(" ");
    let mix = track.mix.as_deref().unwrap_or_default();
    let release = track.release.as_deref().unwrap_or_default();

    let mut queries: Vec<String> = Vec::new();
    for parts in [
        [track.title.as_str(), mix, artists.as_str(), release],
        [track.title.as_str(), mix, artists.as_str(), ""],
        [track.title.as_str(), "", artists.as_str(), release],
        [track.title.as_str(), "", artists.as_str(), ""],
    ] {
        let query = parts
            .iter()
            .filter(|p| !p.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        if !query.is_empty() && !queries.contains(&query) {
            queries.push(query);
        }
    }
    queries
}

/// Catalog id of `track`: the one the feed gave, or the best search result.
pub async fn resolve_track<A: PlaylistApi + ?Sized>(
    api: &A,
    track: &ObservedTrack,
) -> Result<Option<String>> {
    if let Some(track_id) = &track.track_id {
        return Ok(Some(track_id.clone()));
    }

    for query in search_queries(track) {
        let candidates = api
            .search_tracks(&query)
            .await
            .wrap_err_with(|| format!("Failed to search for {}", track.label()))?;
        if let Some(found) = best_match(track, &candidates) {
            tracing::debug!("Matched {} to {} ({})", track.label(), found.name, found.track_id);
            return Ok(Some(found.track_id.clone()));
        }
        tracing::trace!("No match for query \"{}\"", query);
    }
    Ok(None)
}

/// Catalog ids of `tracks` in order. Tracks that cannot be found are logged and skipped.
pub async fn resolve_tracks<A: PlaylistApi + ?Sized>(
    api: &A,
    tracks: &[ObservedTrack],
) -> Result<Vec<String>> {
    let mut resolved = Vec::with_capacity(tracks.len());
    for track in tracks {
        match resolve_track(api, track).await? {
            Some(track_id) => resolved.push(track_id),
            None => tracing::warn!("Could not find {} on Spotify, skipping", track.label()),
        }
    }
    Ok(resolved)
}
