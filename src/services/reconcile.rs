use std::collections::HashSet;

use chrono::{DateTime, Utc};
use color_eyre::eyre::{Report, Result, WrapErr};
use serde::{Deserialize, Serialize};

use crate::history::{HistoryTable, RecordStore, TrackEvent, format_datetime, now_datetime};
use crate::ports::playlist::{AddOutcome, MAX_ITEMS_PER_CALL, PlaylistApi, PlaylistRef};

/// Which part of history keeps a track from being added again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiggingMode {
    /// Tracks ever added to the same playlist.
    #[default]
    Playlist,
    /// Tracks ever added to any playlist.
    All,
    /// Only tracks currently in the playlist.
    Off,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    pub digging_mode: DiggingMode,
    /// Insert new tracks at the top of the playlist instead of appending.
    pub add_at_top: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Observed tracks absent from history, in observed order.
    pub to_add: Vec<String>,
    /// Tracks the playlist API confirmed; exactly these were recorded.
    pub added: Vec<String>,
    /// Tracks the playlist API refused; left out of history so a later run retries them.
    pub rejected: Vec<String>,
}

/// Observed ids in first-seen order, without blanks or repeats.
fn unique_ids(observed: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    observed
        .iter()
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(*id))
        .cloned()
        .collect()
}

/// Adds `track_ids` in batches of at most [`MAX_ITEMS_PER_CALL`].
///
/// Stops at the first failing batch. The outcome always holds what was
/// confirmed before the failure; the failure itself is returned alongside.
pub async fn add_in_batches<A: PlaylistApi + ?Sized>(
    api: &A,
    playlist_id: &str,
    track_ids: &[String],
    at_top: bool,
) -> (AddOutcome, Option<Report>) {
    let mut outcome = AddOutcome::default();

    for batch in track_ids.chunks(MAX_ITEMS_PER_CALL) {
        // keep observed order when inserting at the top
        let position = at_top.then_some(outcome.confirmed.len() as u32);
        match api.add_tracks(playlist_id, batch, position).await {
            Ok(batch_outcome) => outcome.merge(batch_outcome),
            Err(error) => return (outcome, Some(error)),
        }
    }

    (outcome, None)
}

/// Computes which observed tracks a playlist is missing and records the adds.
pub struct Reconciler<A: PlaylistApi> {
    api: A,
    store: RecordStore,
    options: ReconcileOptions,
}

impl<A: PlaylistApi> Reconciler<A> {
    pub fn new(api: A, store: RecordStore, options: ReconcileOptions) -> Self {
        Self {
            api,
            store,
            options,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RecordStore {
        &mut self.store
    }

    pub fn options(&self) -> ReconcileOptions {
        self.options
    }

    /// Track ids that must not be added to `playlist` again.
    async fn known_track_ids(&mut self, playlist: &PlaylistRef) -> Result<HashSet<String>> {
        let known: HashSet<String> = match self.options.digging_mode {
            DiggingMode::Playlist => {
                let history = self
                    .store
                    .load(Some(playlist.id.as_str()))
                    .wrap_err("Failed to load playlist history")?;
                history.iter().map(|e| e.track_id.clone()).collect()
            }
            DiggingMode::All => {
                let history = self
                    .store
                    .load(None)
                    .wrap_err("Failed to load history")?;
                history.iter().map(|e| e.track_id.clone()).collect()
            }
            DiggingMode::Off => self
                .api
                .list_tracks(&playlist.id)
                .await
                .wrap_err_with(|| format!("Failed to list tracks of {}", playlist.name))?
                .into_iter()
                .map(|t| t.track_id)
                .collect(),
        };
        Ok(known)
    }

    /// Adds every observed track that history does not know for `playlist`,
    /// then appends one history row per track the API confirmed.
    pub async fn reconcile(
        &mut self,
        playlist: &PlaylistRef,
        observed: &[String],
        source: &str,
    ) -> Result<ReconcileOutcome> {
        let observed = unique_ids(observed);
        if observed.is_empty() {
            tracing::debug!("Nothing observed for playlist {}", playlist.name);
            return Ok(ReconcileOutcome::default());
        }

        let to_add: Vec<String> = {
            let known = self.known_track_ids(playlist).await?;
            observed
                .into_iter()
                .filter(|id| !known.contains(id))
                .collect()
        };

        if to_add.is_empty() {
            tracing::info!("No new tracks to add to playlist \"{}\"", playlist.name);
            return Ok(ReconcileOutcome::default());
        }

        tracing::info!(
            "Adding {} new tracks to playlist \"{}\"",
            to_add.len(),
            playlist.name
        );
        let (outcome, failure) =
            add_in_batches(&self.api, &playlist.id, &to_add, self.options.add_at_top).await;

        if !outcome.rejected.is_empty() {
            tracing::warn!(
                "Playlist API rejected {} tracks for \"{}\": {:?}",
                outcome.rejected.len(),
                playlist.name,
                outcome.rejected
            );
        }

        let added_at = now_datetime();
        let events: HistoryTable = outcome
            .confirmed
            .iter()
            .map(|id| {
                TrackEvent::new(
                    id.as_str(),
                    &playlist.id,
                    &playlist.name,
                    added_at.as_str(),
                    source,
                )
            })
            .collect();
        self.store
            .append(events)
            .wrap_err_with(|| format!("Failed to record tracks added to {}", playlist.name))?;

        if let Some(error) = failure {
            return Err(error.wrap_err(format!(
                "Adding tracks to {} stopped after {} of {} tracks",
                playlist.name,
                outcome.confirmed.len(),
                to_add.len()
            )));
        }

        Ok(ReconcileOutcome {
            to_add,
            added: outcome.confirmed,
            rejected: outcome.rejected,
        })
    }

    /// Records every live track of `playlist` that history does not hold yet,
    /// so tracks added by hand are treated as already added.
    pub async fn refresh_playlist_history(&mut self, playlist: &PlaylistRef) -> Result<usize> {
        let live = self
            .api
            .list_tracks(&playlist.id)
            .await
            .wrap_err_with(|| format!("Failed to list tracks of {}", playlist.name))?;

        let missing: HistoryTable = {
            let history = self
                .store
                .load(Some(playlist.id.as_str()))
                .wrap_err("Failed to load playlist history")?;
            let mut known: HashSet<String> =
                history.iter().map(|e| e.track_id.clone()).collect();

            live.into_iter()
                .filter(|track| known.insert(track.track_id.clone()))
                .map(|track| {
                    let added_at = track
                        .added_at
                        .as_deref()
                        .and_then(|at| DateTime::parse_from_rfc3339(at).ok())
                        .map(|at| format_datetime(at.with_timezone(&Utc)))
                        .unwrap_or_else(now_datetime);
                    TrackEvent::new(
                        track.track_id,
                        &playlist.id,
                        &playlist.name,
                        added_at,
                        "refresh",
                    )
                })
                .collect()
        };

        let recorded = self
            .store
            .append(missing)
            .wrap_err_with(|| format!("Failed to record history of {}", playlist.name))?;
        if recorded > 0 {
            tracing::info!(
                "Recorded {} live tracks of \"{}\" into history",
                recorded,
                playlist.name
            );
        }
        Ok(recorded)
    }
}
