pub mod backup;
pub mod chart_feed;
pub mod mirror;
pub mod playlist_dedup;
pub mod reconcile;
pub mod spotify;
pub mod sync;
pub mod track_match;
