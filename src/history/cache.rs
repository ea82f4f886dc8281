use std::collections::HashMap;
use std::sync::Arc;

use super::HistoryTable;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// The unfiltered Record Store.
    Whole,
    /// The Record Store filtered to one playlist id.
    Playlist(String),
}

impl CacheKey {
    pub fn for_filter(playlist_filter: Option<&str>) -> Self {
        match playlist_filter {
            Some(playlist_id) => CacheKey::Playlist(playlist_id.to_string()),
            None => CacheKey::Whole,
        }
    }
}

/// Process-local cache of loaded history tables.
///
/// Entries are never aged out. The owner clears the cache at the start of each
/// sync target and the Record Store clears it on every write, so an entry can
/// only live for one reconciliation call chain.
#[derive(Debug, Default)]
pub struct HistoryCache {
    entries: HashMap<CacheKey, Arc<HistoryTable>>,
}

impl HistoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<HistoryTable>> {
        self.entries.get(key).cloned()
    }

    pub fn set(&mut self, key: CacheKey, table: Arc<HistoryTable>) {
        self.entries.insert(key, table);
    }

    /// Drops every entry. Tables still referenced by a caller stay alive until
    /// that caller lets go of them.
    pub fn clear(&mut self) {
        if !self.is_empty() {
            tracing::trace!("Clearing {} history cache entries", self.len());
        }
        self.entries = HashMap::new();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
