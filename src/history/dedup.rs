use std::collections::HashMap;

use super::{HistoryTable, RecordStore, StoreError, TrackEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryDedupReport {
    pub rows_before: usize,
    pub rows_after: usize,
}

impl HistoryDedupReport {
    pub fn removed(&self) -> usize {
        self.rows_before - self.rows_after
    }
}

/// Collapses rows sharing a `(track_id, playlist_id)` key.
///
/// The row with the earliest `datetime_added` is kept, at the position where
/// its key first appeared. Ties keep the first row seen.
pub fn dedup_table(table: HistoryTable) -> HistoryTable {
    let mut kept: Vec<TrackEvent> = Vec::with_capacity(table.len());
    let mut positions: HashMap<(String, String), usize> = HashMap::new();

    for event in table.into_events() {
        let key = (event.track_id.clone(), event.playlist_id.to_string());
        match positions.get(&key) {
            Some(&pos) => {
                if event.datetime_added < kept[pos].datetime_added {
                    kept[pos] = event;
                }
            }
            None => {
                positions.insert(key, kept.len());
                kept.push(event);
            }
        }
    }

    HistoryTable::from_events(kept)
}

/// Rewrites the history file with one row per `(track_id, playlist_id)`.
///
/// Nothing is written when the file holds no duplicates.
pub fn dedup_history(store: &mut RecordStore) -> Result<HistoryDedupReport, StoreError> {
    let table = store.read(None, true)?;
    let rows_before = table.len();
    let deduped = dedup_table(table);
    let report = HistoryDedupReport {
        rows_before,
        rows_after: deduped.len(),
    };

    if report.removed() == 0 {
        tracing::info!("History holds no duplicate records ({} rows)", rows_before);
        return Ok(report);
    }

    tracing::warn!(
        "Found {} duplicate history records, rewriting {} rows",
        report.removed(),
        report.rows_after
    );
    store.save(&deduped)?;
    Ok(report)
}
