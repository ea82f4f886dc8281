use std::collections::HashSet;

use color_eyre::eyre::{Result, WrapErr};

use crate::history::RecordStore;
use crate::ports::playlist::{MAX_ITEMS_PER_CALL, PlaylistApi, PlaylistRef};
use crate::services::reconcile::{ReconcileOutcome, Reconciler};

/// History source tag of tracks copied by a backup.
pub const BACKUP_SOURCE: &str = "backup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOutcome {
    pub target: PlaylistRef,
    pub source_tracks: usize,
    pub reconcile: ReconcileOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// Tracks now in the playlist. The replace call does not report per-id
    /// acceptance, so its whole first chunk counts once the call succeeds;
    /// later chunks count only confirmed ids.
    pub restored: usize,
    /// Live tracks that are not part of the restored sequence.
    pub removed: Vec<String>,
}

/// Finds the user's playlist called `name`, creating it when absent.
pub async fn resolve_playlist<A: PlaylistApi + ?Sized>(api: &A, name: &str) -> Result<PlaylistRef> {
    if let Some(playlist) = api
        .find_playlist(name)
        .await
        .wrap_err_with(|| format!("Failed to look up playlist \"{}\"", name))?
    {
        return Ok(playlist);
    }

    tracing::warn!("Playlist \"{}\" does not exist, creating it", name);
    api.create_playlist(name)
        .await
        .wrap_err_with(|| format!("Failed to create playlist \"{}\"", name))
}

/// Copies every track of `source_playlist_id` that `target_name` never held.
pub async fn backup<A: PlaylistApi>(
    reconciler: &mut Reconciler<A>,
    source_playlist_id: &str,
    target_name: &str,
) -> Result<BackupOutcome> {
    let target = resolve_playlist(reconciler.api(), target_name).await?;
    backup_into(reconciler, source_playlist_id, target).await
}

pub async fn backup_into<A: PlaylistApi>(
    reconciler: &mut Reconciler<A>,
    source_playlist_id: &str,
    target: PlaylistRef,
) -> Result<BackupOutcome> {
    tracing::info!(
        "Backing up playlist {} into \"{}\"",
        source_playlist_id,
        target.name
    );

    let source_ids: Vec<String> = reconciler
        .api()
        .list_tracks(source_playlist_id)
        .await
        .wrap_err_with(|| format!("Failed to list tracks of playlist {}", source_playlist_id))?
        .into_iter()
        .map(|track| track.track_id)
        .collect();
    let source_tracks = source_ids.len();

    let reconcile = reconciler
        .reconcile(&target, &source_ids, BACKUP_SOURCE)
        .await?;

    Ok(BackupOutcome {
        target,
        source_tracks,
        reconcile,
    })
}

/// Replaces the contents of `target_playlist_id` with exactly `track_ids`, in order.
///
/// History is left untouched.
pub async fn restore<A: PlaylistApi + ?Sized>(
    api: &A,
    target_playlist_id: &str,
    track_ids: &[String],
) -> Result<RestoreOutcome> {
    let removed: Vec<String> = {
        let desired: HashSet<&str> = track_ids.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        api.list_tracks(target_playlist_id)
            .await
            .wrap_err_with(|| format!("Failed to list tracks of playlist {}", target_playlist_id))?
            .into_iter()
            .map(|track| track.track_id)
            .filter(|id| !desired.contains(id.as_str()))
            .filter(|id| seen.insert(id.clone()))
            .collect()
    };

    let mut chunks = track_ids.chunks(MAX_ITEMS_PER_CALL);
    let first = chunks.next().unwrap_or(&[]);
    api.replace_tracks(target_playlist_id, first)
        .await
        .wrap_err_with(|| format!("Failed to replace tracks of playlist {}", target_playlist_id))?;

    // unconfirmed: the replace endpoint accepts or fails the chunk as a whole
    let mut restored = first.len();
    tracing::debug!(
        "Replaced playlist {} with its first {} tracks",
        target_playlist_id,
        restored
    );
    for chunk in chunks {
        let outcome = api
            .add_tracks(target_playlist_id, chunk, None)
            .await
            .wrap_err_with(|| {
                format!(
                    "Restore of playlist {} stopped after {} of {} tracks",
                    target_playlist_id,
                    restored,
                    track_ids.len()
                )
            })?;
        if !outcome.rejected.is_empty() {
            tracing::warn!(
                "Playlist API rejected {} tracks during restore: {:?}",
                outcome.rejected.len(),
                outcome.rejected
            );
        }
        restored += outcome.confirmed.len();
    }

    tracing::info!(
        "Restored {} tracks into playlist {} ({} tracks dropped)",
        restored,
        target_playlist_id,
        removed.len()
    );
    Ok(RestoreOutcome { restored, removed })
}

/// Tracks recorded for `playlist_id`, oldest first, each once.
pub fn track_ids_from_history(store: &RecordStore, playlist_id: &str) -> Result<Vec<String>> {
    let history = store
        .read(Some(playlist_id), false)
        .wrap_err_with(|| format!("Failed to read history of playlist {}", playlist_id))?;

    let mut events: Vec<_> = history.iter().collect();
    events.sort_by(|a, b| a.datetime_added.cmp(&b.datetime_added));

    let mut seen = HashSet::new();
    Ok(events
        .into_iter()
        .filter(|e| seen.insert(e.track_id.as_str()))
        .map(|e| e.track_id.clone())
        .collect())
}

/// Track ids from a text file: one per line, blank lines and `#` comments
/// ignored. `spotify:track:` URIs are accepted.
pub fn parse_track_ids(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.strip_prefix("spotify:track:").unwrap_or(line).to_string())
        .collect()
}
