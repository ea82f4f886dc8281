use std::collections::BTreeMap;
use std::fmt;

use chrono::{Local, NaiveDate};
use color_eyre::eyre::{Result, WrapErr};
use regex::Regex;

use crate::config::Config;
use crate::history::dedup::{HistoryDedupReport, dedup_history};
use crate::ports::chart::{SyncTarget, TargetKind, TrackSource};
use crate::ports::mirror::ObjectMirror;
use crate::ports::playlist::{PlaylistApi, PlaylistRef};
use crate::services::backup::{backup_into, resolve_playlist};
use crate::services::mirror;
use crate::services::reconcile::Reconciler;
use crate::services::track_match::resolve_tracks;

/// Group of sync targets, processed in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum RunKind {
    Backups,
    Charts,
    Genres,
    Labels,
}

impl RunKind {
    pub const ALL: [RunKind; 4] = [
        RunKind::Backups,
        RunKind::Charts,
        RunKind::Genres,
        RunKind::Labels,
    ];

    fn for_target(kind: TargetKind) -> Self {
        match kind {
            TargetKind::Chart => RunKind::Charts,
            TargetKind::Genre => RunKind::Genres,
            TargetKind::Label => RunKind::Labels,
        }
    }

    /// `only` filtered to known kinds in run order; empty means everything.
    pub fn selection(only: &[RunKind]) -> Vec<RunKind> {
        RunKind::ALL
            .into_iter()
            .filter(|kind| only.is_empty() || only.contains(kind))
            .collect()
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunKind::Backups => "backups",
            RunKind::Charts => "charts",
            RunKind::Genres => "genres",
            RunKind::Labels => "labels",
        };
        f.write_str(name)
    }
}

/// Name of the playlist a chart target is synced into.
pub fn playlist_name(prefix: &str, target: &SyncTarget) -> String {
    match target.kind {
        TargetKind::Genre => format!("{}{} - Top 100", prefix, target.name),
        TargetKind::Chart | TargetKind::Label => format!("{}{}", prefix, target.name),
    }
}

/// `current` with any previous stamp removed and today's date appended.
pub fn stamped_description(current: &str, today: NaiveDate) -> Result<String> {
    let stamp =
        Regex::new(r"\s*Updated on \d{4}-\d{2}-\d{2}\.*").wrap_err("Failed to create regex")?;
    let cleaned = stamp.replace_all(current, "").replace("&#x2F;", "/");
    let date = today.format("%Y-%m-%d");
    if cleaned.trim().is_empty() {
        Ok(format!("Updated on {}.", date))
    } else {
        Ok(format!("{} Updated on {}.", cleaned.trim_end(), date))
    }
}

pub async fn stamp_description<A: PlaylistApi + ?Sized>(
    api: &A,
    playlist: &PlaylistRef,
) -> Result<()> {
    let current = api.playlist_description(&playlist.id).await?;
    let description = stamped_description(&current, Local::now().date_naive())?;
    api.set_playlist_description(&playlist.id, &description).await
}

/// What a run works on, read once from config.
#[derive(Debug, Clone, Default)]
pub struct SyncSettings {
    pub playlist_prefix: String,
    pub refresh_before_sync: bool,
    /// Target playlist name -> source playlist id
    pub backups: BTreeMap<String, String>,
    pub targets: Vec<SyncTarget>,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            playlist_prefix: config.playlist_prefix.clone(),
            refresh_before_sync: config.refresh_before_sync,
            backups: config.backups.clone(),
            targets: config.enabled_targets().cloned().collect(),
        }
    }

    /// Names of every playlist a run writes to.
    pub fn managed_playlist_names(&self) -> Vec<String> {
        self.backups
            .keys()
            .cloned()
            .chain(
                self.targets
                    .iter()
                    .map(|t| playlist_name(&self.playlist_prefix, t)),
            )
            .collect()
    }
}

/// The user's playlists that a run writes to, in listing order.
pub async fn managed_playlists<A: PlaylistApi + ?Sized>(
    api: &A,
    settings: &SyncSettings,
) -> Result<Vec<PlaylistRef>> {
    let names = settings.managed_playlist_names();
    Ok(api
        .list_playlists()
        .await?
        .into_iter()
        .filter(|p| names.contains(&p.name))
        .collect())
}

/// Records the live tracks of every playlist the user owns into history.
///
/// Returns the number of rows recorded. A failing playlist is logged and skipped.
pub async fn refresh_all_playlists<A: PlaylistApi>(reconciler: &mut Reconciler<A>) -> Result<usize> {
    let playlists = reconciler.api().list_playlists().await?;
    let mut recorded = 0;
    for playlist in &playlists {
        reconciler.store_mut().clear_cache();
        tracing::info!("Refreshing history for playlist \"{}\"", playlist.name);
        match reconciler.refresh_playlist_history(playlist).await {
            Ok(rows) => recorded += rows,
            Err(error) => tracing::warn!("Failed to refresh \"{}\": {:?}", playlist.name, error),
        }
    }
    Ok(recorded)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindReport {
    pub ok: usize,
    pub failed: usize,
    pub added: usize,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub kinds: BTreeMap<RunKind, KindReport>,
    /// `(target, error)` for every target that failed.
    pub failures: Vec<(String, String)>,
    pub history_dedup: Option<HistoryDedupReport>,
}

impl RunReport {
    fn record(&mut self, kind: RunKind, target: &str, result: Result<usize>) {
        let entry = self.kinds.entry(kind).or_default();
        match result {
            Ok(added) => {
                entry.ok += 1;
                entry.added += added;
            }
            Err(error) => {
                tracing::warn!("Failed to sync {}: {:?}", target, error);
                entry.failed += 1;
                self.failures.push((target.to_string(), format!("{:#}", error)));
            }
        }
    }

    pub fn total_added(&self) -> usize {
        self.kinds.values().map(|k| k.added).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.kinds.values().map(|k| k.failed).sum()
    }

    pub fn log_summary(&self) {
        for (kind, report) in &self.kinds {
            tracing::info!(
                "{}: {} synced, {} failed, {} tracks added",
                kind,
                report.ok,
                report.failed,
                report.added
            );
        }
        for (target, error) in &self.failures {
            tracing::warn!("Failed target {}: {}", target, error);
        }
    }
}

/// Runs every sync target one after another against a single Record Store.
pub struct SyncRunner<A: PlaylistApi, S: TrackSource> {
    reconciler: Reconciler<A>,
    source: S,
    mirror: Option<Box<dyn ObjectMirror>>,
    settings: SyncSettings,
}

impl<A: PlaylistApi, S: TrackSource> SyncRunner<A, S> {
    pub fn new(reconciler: Reconciler<A>, source: S, settings: SyncSettings) -> Self {
        Self {
            reconciler,
            source,
            mirror: None,
            settings,
        }
    }

    pub fn with_mirror(mut self, mirror: Box<dyn ObjectMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn reconciler(&self) -> &Reconciler<A> {
        &self.reconciler
    }

    /// Syncs the selected kinds, then deduplicates history and pushes it to the mirror.
    ///
    /// A failing target is recorded in the report and the run moves on.
    pub async fn run(&mut self, only: &[RunKind]) -> RunReport {
        let started = Local::now();
        tracing::info!("Starting sync run");

        if let Some(remote) = &self.mirror {
            mirror::pull_if_missing(self.reconciler.store_mut(), remote.as_ref()).await;
        }

        let mut report = RunReport::default();
        for kind in RunKind::selection(only) {
            match kind {
                RunKind::Backups => {
                    let backups: Vec<(String, String)> = self
                        .settings
                        .backups
                        .iter()
                        .map(|(name, source)| (name.clone(), source.clone()))
                        .collect();
                    for (name, source_id) in backups {
                        self.reconciler.store_mut().clear_cache();
                        let result = self.sync_backup(&name, &source_id).await;
                        report.record(kind, &name, result);
                    }
                }
                _ => {
                    let targets: Vec<SyncTarget> = self
                        .settings
                        .targets
                        .iter()
                        .filter(|t| RunKind::for_target(t.kind) == kind)
                        .cloned()
                        .collect();
                    for target in targets {
                        self.reconciler.store_mut().clear_cache();
                        let result = self.sync_target(&target).await;
                        report.record(kind, &target.source_tag(), result);
                    }
                }
            }
        }
        self.reconciler.store_mut().clear_cache();

        match dedup_history(self.reconciler.store_mut()) {
            Ok(dedup) => report.history_dedup = Some(dedup),
            Err(error) => tracing::warn!("Failed to deduplicate history: {:?}", error),
        }

        if let Some(remote) = &self.mirror {
            mirror::push(self.reconciler.store(), remote.as_ref()).await;
        }

        report.log_summary();
        tracing::info!(
            "Sync run done in {}s, {} tracks added",
            (Local::now() - started).num_seconds(),
            report.total_added()
        );
        report
    }

    async fn prepare(&mut self, name: &str) -> Result<PlaylistRef> {
        let playlist = resolve_playlist(self.reconciler.api(), name).await?;
        if self.settings.refresh_before_sync {
            self.reconciler.refresh_playlist_history(&playlist).await?;
        }
        Ok(playlist)
    }

    async fn finish(&self, playlist: &PlaylistRef, added: usize) -> Result<usize> {
        if added > 0 {
            stamp_description(self.reconciler.api(), playlist)
                .await
                .wrap_err_with(|| format!("Failed to update description of {}", playlist.name))?;
        }
        Ok(added)
    }

    async fn sync_target(&mut self, target: &SyncTarget) -> Result<usize> {
        let tracks = self.source.observe(target).await?;
        // searches share the adapter, and so its rate limit, with the writes
        let observed = resolve_tracks(self.reconciler.api(), &tracks).await?;
        tracing::info!(
            "Observed {} tracks for {} ({} found on Spotify)",
            tracks.len(),
            target.source_tag(),
            observed.len()
        );

        let name = playlist_name(&self.settings.playlist_prefix, target);
        let playlist = self.prepare(&name).await?;
        let outcome = self
            .reconciler
            .reconcile(&playlist, &observed, &target.source_tag())
            .await?;
        self.finish(&playlist, outcome.added.len()).await
    }

    async fn sync_backup(&mut self, name: &str, source_id: &str) -> Result<usize> {
        let playlist = self.prepare(name).await?;
        let outcome = backup_into(&mut self.reconciler, source_id, playlist).await?;
        self.finish(&outcome.target, outcome.reconcile.added.len())
            .await
    }
}
