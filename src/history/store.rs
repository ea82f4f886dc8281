use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tempfile::NamedTempFile;

use super::cache::{CacheKey, HistoryCache};
use super::{HISTORY_FILE_NAME, HistoryTable, StoreError, columnar};

/// Sole owner of the history file on disk.
///
/// Reads go through the [`HistoryCache`]; every write replaces the file
/// atomically and clears the cache in the same call.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    cache: HistoryCache,
}

impl RecordStore {
    /// Store living in `history_dir` under the canonical file name.
    pub fn open(history_dir: &Path) -> Self {
        Self::at_path(history_dir.join(HISTORY_FILE_NAME))
    }

    pub fn at_path(path: PathBuf) -> Self {
        Self {
            path,
            cache: HistoryCache::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn cache(&self) -> &HistoryCache {
        &self.cache
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read_error(&self, source: io::Error) -> StoreError {
        match source.kind() {
            io::ErrorKind::InvalidData
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::UnexpectedEof => StoreError::Corrupt {
                path: self.path.clone(),
                reason: source.to_string(),
            },
            _ => self.io_error(source),
        }
    }

    /// Reads the history file, bypassing the cache.
    ///
    /// The playlist filter is applied while decoding, so rows of other
    /// playlists are never materialized.
    pub fn read(
        &self,
        playlist_filter: Option<&str>,
        allow_empty: bool,
    ) -> Result<HistoryTable, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if allow_empty {
                    tracing::debug!(
                        "No history file at {}, starting from empty history",
                        self.path.display()
                    );
                    return Ok(HistoryTable::new());
                }
                return Err(StoreError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let table = columnar::decode(GzDecoder::new(BufReader::new(file)), playlist_filter)
            .map_err(|e| self.read_error(e))?;

        tracing::debug!(
            "Loaded {} history records from {} (filter: {:?})",
            table.len(),
            self.path.display(),
            playlist_filter
        );
        Ok(table)
    }

    /// Loads history through the cache. A missing file reads as empty history.
    pub fn load(&mut self, playlist_filter: Option<&str>) -> Result<Arc<HistoryTable>, StoreError> {
        let key = CacheKey::for_filter(playlist_filter);
        if let Some(table) = self.cache.get(&key) {
            return Ok(table);
        }

        let table = Arc::new(self.read(playlist_filter, true)?);
        self.cache.set(key, table.clone());
        Ok(table)
    }

    /// Appends `new_events` to the history file and invalidates the cache.
    ///
    /// Returns the number of rows appended.
    pub fn append(&mut self, new_events: HistoryTable) -> Result<usize, StoreError> {
        self.cache.clear();
        if new_events.is_empty() {
            return Ok(0);
        }

        let appended = new_events.len();
        let mut merged = self.read(None, true)?;
        merged.extend(new_events);
        self.save(&merged)?;

        tracing::info!(
            "Appended {} records to history ({} total)",
            appended,
            merged.len()
        );
        Ok(appended)
    }

    /// Replaces the history file with `table` and invalidates the cache.
    pub fn save(&mut self, table: &HistoryTable) -> Result<(), StoreError> {
        self.cache.clear();

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        {
            let mut encoder =
                GzEncoder::new(BufWriter::new(tmp.as_file_mut()), Compression::default());
            columnar::encode(table, &mut encoder).map_err(|e| self.io_error(e))?;
            let mut buffered = encoder.finish().map_err(|e| self.io_error(e))?;
            buffered.flush().map_err(|e| self.io_error(e))?;
        }
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.io_error(e.error))?;

        tracing::debug!(
            "Saved {} history records to {}",
            table.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Raw compressed file contents, for mirroring. `None` when absent.
    pub fn raw_bytes(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Installs a raw file previously produced by [`RecordStore::raw_bytes`].
    ///
    /// The bytes are decoded first; a corrupt copy never replaces the file.
    pub fn install_raw(&mut self, bytes: &[u8]) -> Result<usize, StoreError> {
        let table = columnar::decode(GzDecoder::new(bytes), None).map_err(|e| {
            StoreError::Corrupt {
                path: self.path.clone(),
                reason: format!("mirror copy rejected: {e}"),
            }
        })?;
        self.save(&table)?;
        Ok(table.len())
    }
}
