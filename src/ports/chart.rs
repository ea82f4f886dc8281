use std::fmt;

use color_eyre::eyre::Result;
use serde::{Deserialize, Serialize};

/// What kind of external chart a sync target follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Genre,
    Label,
    Chart,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetKind::Genre => "genre",
            TargetKind::Label => "label",
            TargetKind::Chart => "chart",
        };
        f.write_str(name)
    }
}

fn default_enabled() -> bool {
    true
}

/// One chart, label or genre kept in sync with a playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTarget {
    pub kind: TargetKind,
    pub name: String,
    /// URL or local path of the JSON track feed for this target.
    pub feed: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl SyncTarget {
    /// Provenance tag written into history rows.
    pub fn source_tag(&self) -> String {
        format!("{}:{}", self.kind, self.name)
    }
}

/// A track as reported by a chart or label page.
///
/// Charts rarely know catalog ids; entries without one are resolved by
/// searching the catalog for artists and title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedTrack {
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub title: String,
    /// Mix or version name, e.g. `Extended Mix`.
    #[serde(default)]
    pub mix: Option<String>,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u32>,
}

impl ObservedTrack {
    /// `Artist A, Artist B - Title (Mix)`, for log lines.
    pub fn label(&self) -> String {
        let mut label = format!("{} - {}", self.artists.join(", "), self.title);
        if let Some(mix) = &self.mix {
            label.push_str(&format!(" ({})", mix));
        }
        label
    }
}

/// Port trait producing the currently observed tracks of a target, in chart order.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TrackSource: Send + Sync {
    async fn observe(&self, target: &SyncTarget) -> Result<Vec<ObservedTrack>>;
}
