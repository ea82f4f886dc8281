use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use color_eyre::Result;
use color_eyre::eyre::{Context, eyre};
use serde::{Deserialize, Serialize};

use crate::ports::chart::SyncTarget;
use crate::services::reconcile::{DiggingMode, ReconcileOptions};

pub const DEFAULT_PLAYLIST_PREFIX: &str = "Beatport: ";

const DEFAULT_CONFIG: &str = r#"# Folder holding the track history file
history_dir = "~/.local/share/chart-sync"

# Managed playlists are named "<prefix><name>"
playlist_prefix = "Beatport: "
playlist_description = ""

# Insert new tracks at the top of playlists instead of appending them
add_at_top = false

# Which history keeps a track from being added again:
# "playlist" (same playlist), "all" (any playlist), "off" (live playlist only)
digging_mode = "playlist"

# Merge live playlist contents into history before each target
refresh_before_sync = false

[spotify]
# Looked up from the token when empty
user_id = ""
# Falls back to the SPOTIFY_ACCESS_TOKEN environment variable
access_token = ""
requests_per_second = 5
max_retries = 4

# Best-effort remote copy of the history file
# [mirror]
# base_url = "https://storage.example.com/chart-sync"
# bearer_token = ""

# [[targets]]
# kind = "genre"
# name = "Trance"
# feed = "https://charts.example.com/genre/trance.json"
# enabled = true

# Backup playlists: target name = source playlist id
[backups]
# "My Likes (backup)" = "37i9dQZF1DXcBWIGoYBM5M"
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    history_dir: String,
    #[serde(default = "default_playlist_prefix")]
    pub playlist_prefix: String,
    #[serde(default)]
    pub playlist_description: String,
    #[serde(default)]
    pub add_at_top: bool,
    #[serde(default)]
    pub digging_mode: DiggingMode,
    #[serde(default)]
    pub refresh_before_sync: bool,
    #[serde(default)]
    spotify: SpotifyConfig,
    #[serde(default)]
    pub mirror: Option<MirrorConfig>,
    #[serde(default)]
    pub targets: Vec<SyncTarget>,
    /// Target playlist name -> source playlist id
    #[serde(default)]
    pub backups: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyConfig {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            access_token: String::new(),
            requests_per_second: default_requests_per_second(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub base_url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

fn default_playlist_prefix() -> String {
    DEFAULT_PLAYLIST_PREFIX.to_string()
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_max_retries() -> usize {
    4
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err(format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
            .wrap_err(format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    /// Default config file location
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join("chart-sync").join("config.toml"))
    }

    /// Load config from `path`, or from the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path().ok_or(eyre!("Config file not found"))?,
        };

        Self::from_file(&config_path)
    }

    /// Writes a commented default config. Refuses to overwrite an existing file.
    pub fn create_default(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(eyre!("Config file already exists: {}", path.display()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err(format!("Failed to create config directory: {}", parent.display()))?;
        }
        std::fs::write(path, DEFAULT_CONFIG)
            .wrap_err(format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Expand ~ to home directory
    fn expand_path(&self, path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    /// Get expanded history directory
    pub fn history_dir_path(&self) -> PathBuf {
        self.expand_path(&self.history_dir)
    }

    /// Get Spotify config, taking the token from the environment when unset
    pub fn spotify_config(&self) -> SpotifyConfig {
        let mut spotify = self.spotify.clone();
        if spotify.access_token.is_empty() {
            spotify.access_token = std::env::var("SPOTIFY_ACCESS_TOKEN").unwrap_or_default();
        }
        spotify
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            digging_mode: self.digging_mode,
            add_at_top: self.add_at_top,
        }
    }

    /// Enabled targets, in file order
    pub fn enabled_targets(&self) -> impl Iterator<Item = &SyncTarget> {
        self.targets.iter().filter(|t| t.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::chart::TargetKind;

    #[test]
    fn test_default_config_parses() {
        let config = Config::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.playlist_prefix, DEFAULT_PLAYLIST_PREFIX);
        assert_eq!(config.digging_mode, DiggingMode::Playlist);
        assert!(!config.add_at_top);
        assert!(config.targets.is_empty());
        assert!(config.backups.is_empty());
        assert!(config.mirror.is_none());
        assert_eq!(config.spotify.requests_per_second, 5);
        assert_eq!(config.spotify.max_retries, 4);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml(r#"history_dir = "/var/lib/chart-sync""#).unwrap();
        assert_eq!(config.history_dir_path(), PathBuf::from("/var/lib/chart-sync"));
        assert_eq!(config.playlist_prefix, DEFAULT_PLAYLIST_PREFIX);
        assert_eq!(config.spotify.max_retries, 4);
    }

    #[test]
    fn test_targets_and_backups() {
        let config = Config::from_toml(
            r#"
history_dir = "/tmp/history"
digging_mode = "all"
add_at_top = true

[mirror]
base_url = "https://storage.example.com"

[[targets]]
kind = "genre"
name = "Trance"
feed = "trance.json"

[[targets]]
kind = "label"
name = "Anjunabeats"
feed = "anjuna.json"
enabled = false

[backups]
"Likes backup" = "src123"
"#,
        )
        .unwrap();

        assert_eq!(config.digging_mode, DiggingMode::All);
        assert!(config.reconcile_options().add_at_top);
        assert_eq!(config.targets.len(), 2);
        let enabled: Vec<_> = config.enabled_targets().collect();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].kind, TargetKind::Genre);
        assert_eq!(config.backups.get("Likes backup").map(String::as_str), Some("src123"));
        assert_eq!(
            config.mirror.map(|m| m.base_url).as_deref(),
            Some("https://storage.example.com")
        );
    }

    #[test]
    fn test_unknown_digging_mode_is_rejected() {
        let result = Config::from_toml(
            r#"
history_dir = "/tmp/history"
digging_mode = "sometimes"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_home() {
        let config = Config::from_toml(r#"history_dir = "~/history""#).unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.history_dir_path(), home.join("history"));
        }
    }

    #[test]
    fn test_create_default_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        Config::create_default(&path).unwrap();
        assert!(Config::from_file(&path).is_ok());
        assert!(Config::create_default(&path).is_err());
    }
}
