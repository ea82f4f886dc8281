mod config;
mod history;
mod logging;
mod ports;
mod services;
mod spotify_rs;
#[cfg(test)]
mod test_utils;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};

use crate::{
    config::Config,
    history::{RecordStore, dedup::dedup_history},
    logging::init_tracing,
    services::{
        backup::{backup, parse_track_ids, restore, track_ids_from_history},
        chart_feed::JsonFeedSource,
        mirror::HttpObjectMirror,
        playlist_dedup::dedup_playlists,
        reconcile::Reconciler,
        spotify::SpotifyHttpAdapter,
        sync::{
            RunKind, SyncRunner, SyncSettings, managed_playlists, refresh_all_playlists,
            stamp_description,
        },
    },
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "CHART_SYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `chart_sync=debug`
    #[arg(long, default_value = "info", global = true, env = "CHART_SYNC_LOG")]
    log_level: String,

    /// Export spans to this OTLP (gRPC) endpoint
    #[arg(long, global = true, env = "CHART_SYNC_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync every configured backup, chart, genre and label playlist
    Sync {
        /// Only run these kinds of targets (default: all)
        #[arg(long, value_enum)]
        only: Vec<RunKind>,
    },
    /// Copy new tracks of a playlist into a backup playlist
    Backup {
        /// Id of the playlist to back up
        #[arg(short, long)]
        source: String,

        /// Name of the backup playlist, created when missing
        #[arg(short, long)]
        name: String,
    },
    /// Replace the contents of a playlist with an ordered list of tracks
    Restore {
        /// Id of the playlist to overwrite
        #[arg(short, long)]
        playlist: String,

        /// Restore the tracks history recorded for this playlist id, oldest first
        #[arg(long, conflicts_with = "ids_file", required_unless_present = "ids_file")]
        from_history: Option<String>,

        /// Restore the track ids listed in this file, one per line
        #[arg(long)]
        ids_file: Option<PathBuf>,
    },
    /// Collapse duplicate history records
    DedupHistory,
    /// Remove repeated tracks from every managed playlist
    DedupPlaylists,
    /// Record the live tracks of every owned playlist into history
    RefreshHistory,
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load(path).wrap_err("Failed to load chart-sync config")
}

async fn connect_spotify(config: &Config) -> Result<SpotifyHttpAdapter> {
    let spotify = config.spotify_config();
    if spotify.access_token.is_empty() {
        return Err(eyre!(
            "No Spotify access token. Set spotify.access_token or SPOTIFY_ACCESS_TOKEN"
        ));
    }
    Ok(SpotifyHttpAdapter::connect(&spotify)
        .await?
        .with_playlist_description(&config.playlist_description))
}

fn open_store(config: &Config) -> RecordStore {
    let store = RecordStore::open(&config.history_dir_path());
    tracing::debug!("Using history file {}", store.path().display());
    store
}

async fn run(args: Args) -> Result<()> {
    let config_path = args.config.as_deref();

    match args.command {
        Commands::Sync { only } => {
            let config = load_config(config_path)?;
            let api = connect_spotify(&config).await?;
            let reconciler = Reconciler::new(api, open_store(&config), config.reconcile_options());
            let mut runner = SyncRunner::new(
                reconciler,
                JsonFeedSource::new(),
                SyncSettings::from_config(&config),
            );
            if let Some(mirror) = &config.mirror {
                runner = runner.with_mirror(Box::new(HttpObjectMirror::new(mirror)));
            }

            let report = runner.run(&only).await;
            if report.total_failed() > 0 {
                tracing::warn!("{} targets failed", report.total_failed());
            }
        }
        Commands::Backup { source, name } => {
            let config = load_config(config_path)?;
            let api = connect_spotify(&config).await?;
            let mut reconciler =
                Reconciler::new(api, open_store(&config), config.reconcile_options());

            let outcome = backup(&mut reconciler, &source, &name).await?;
            if !outcome.reconcile.added.is_empty() {
                stamp_description(reconciler.api(), &outcome.target).await?;
            }
            tracing::info!(
                "Backed up {} of {} tracks into \"{}\"",
                outcome.reconcile.added.len(),
                outcome.source_tracks,
                outcome.target.name
            );
        }
        Commands::Restore {
            playlist,
            from_history,
            ids_file,
        } => {
            let config = load_config(config_path)?;
            let track_ids = match (from_history, ids_file) {
                (Some(history_playlist), _) => {
                    track_ids_from_history(&open_store(&config), &history_playlist)?
                }
                (None, Some(path)) => {
                    let contents = std::fs::read_to_string(&path)
                        .wrap_err(format!("Failed to read {}", path.display()))?;
                    parse_track_ids(&contents)
                }
                (None, None) => return Err(eyre!("Nothing to restore from")),
            };

            let api = connect_spotify(&config).await?;
            let outcome = restore(&api, &playlist, &track_ids).await?;
            if !outcome.removed.is_empty() {
                tracing::info!("Tracks no longer in the playlist: {:?}", outcome.removed);
            }
        }
        Commands::DedupHistory => {
            let config = load_config(config_path)?;
            let mut store = open_store(&config);
            let report = dedup_history(&mut store)?;
            tracing::info!(
                "History holds {} records ({} removed)",
                report.rows_after,
                report.removed()
            );
        }
        Commands::DedupPlaylists => {
            let config = load_config(config_path)?;
            let api = connect_spotify(&config).await?;
            let playlists = managed_playlists(&api, &SyncSettings::from_config(&config)).await?;
            let removed = dedup_playlists(&api, &playlists).await;
            tracing::info!(
                "Removed {} duplicates from {} playlists",
                removed,
                playlists.len()
            );
        }
        Commands::RefreshHistory => {
            let config = load_config(config_path)?;
            let api = connect_spotify(&config).await?;
            let mut reconciler =
                Reconciler::new(api, open_store(&config), config.reconcile_options());
            let recorded = refresh_all_playlists(&mut reconciler).await?;
            tracing::info!("Recorded {} tracks into history", recorded);
        }
        Commands::Config(config_commands) => match config_commands {
            ConfigCommands::CreateDefault => {
                let path = match config_path {
                    Some(path) => path.to_path_buf(),
                    None => Config::config_path().ok_or(eyre!("No default config path found"))?,
                };
                tracing::debug!("Creating default config at {}", path.display());
                Config::create_default(&path)?;
                tracing::info!("Default config created at {}", path.display());
            }
            ConfigCommands::Path => match Config::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No default config path found"),
            },
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let tracer_provider = init_tracing(
        "chart-sync",
        args.otlp_endpoint.as_deref(),
        &args.log_level,
    )?;

    tracing::debug!("chart-sync starting");
    let result = run(args).await;

    if let Some(provider) = tracer_provider {
        if let Err(error) = provider.shutdown() {
            eprintln!("Failed to flush traces: {error}");
        }
    }

    result
}
