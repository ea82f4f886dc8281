//! Column-oriented encoding of a [`HistoryTable`].
//!
//! Layout (the whole stream is gzip compressed by the caller):
//!
//! ```text
//! MAGIC VERSION
//! { u32-le header_len, header json, payload json }*
//! ```
//!
//! There is one row group per playlist id, so `playlist_id` is stored once per
//! group. `playlist_name` and `source` are dictionary encoded inside a group.
//! A filtered read inspects each header and streams past the payload of groups
//! for other playlists without decoding them.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{HistoryTable, TrackEvent};

const MAGIC: &[u8; 6] = b"CSHIST";
const VERSION: u8 = 1;
/// Headers only carry two small dictionaries; anything larger is garbage.
const MAX_HEADER_LEN: u32 = 16 * 1024 * 1024;
/// Far above any real playlist's columns.
const MAX_PAYLOAD_LEN: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct GroupHeader {
    playlist_id: String,
    playlist_names: Vec<String>,
    sources: Vec<String>,
    rows: usize,
    payload_len: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct GroupColumns {
    track_id: Vec<String>,
    datetime_added: Vec<String>,
    playlist_name_codes: Vec<u32>,
    source_codes: Vec<u32>,
}

#[derive(Default)]
struct Dictionary<'a> {
    values: Vec<&'a str>,
    index: HashMap<&'a str, u32>,
}

impl<'a> Dictionary<'a> {
    fn code(&mut self, value: &'a str) -> u32 {
        if let Some(code) = self.index.get(value) {
            return *code;
        }
        let code = self.values.len() as u32;
        self.values.push(value);
        self.index.insert(value, code);
        code
    }

    fn into_values(self) -> Vec<String> {
        self.values.into_iter().map(str::to_string).collect()
    }
}

fn invalid(reason: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.into())
}

/// Groups rows by playlist in order of first appearance.
fn row_groups(table: &HistoryTable) -> Vec<(&str, Vec<&TrackEvent>)> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&TrackEvent>)> = Vec::new();

    for event in table {
        let playlist_id: &str = &event.playlist_id;
        match positions.get(playlist_id) {
            Some(&pos) => groups[pos].1.push(event),
            None => {
                positions.insert(playlist_id, groups.len());
                groups.push((playlist_id, vec![event]));
            }
        }
    }

    groups
}

pub fn encode<W: Write>(table: &HistoryTable, mut writer: W) -> io::Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_all(&[VERSION])?;

    for (playlist_id, rows) in row_groups(table) {
        let mut names = Dictionary::default();
        let mut sources = Dictionary::default();
        let mut columns = GroupColumns {
            track_id: Vec::with_capacity(rows.len()),
            datetime_added: Vec::with_capacity(rows.len()),
            playlist_name_codes: Vec::with_capacity(rows.len()),
            source_codes: Vec::with_capacity(rows.len()),
        };

        for event in rows.iter().copied() {
            columns.track_id.push(event.track_id.clone());
            columns.datetime_added.push(event.datetime_added.clone());
            columns.playlist_name_codes.push(names.code(&event.playlist_name));
            columns.source_codes.push(sources.code(&event.source));
        }

        let payload = serde_json::to_vec(&columns)?;
        let header = serde_json::to_vec(&GroupHeader {
            playlist_id: playlist_id.to_string(),
            playlist_names: names.into_values(),
            sources: sources.into_values(),
            rows: rows.len(),
            payload_len: payload.len() as u64,
        })?;
        let header_len =
            u32::try_from(header.len()).map_err(|_| invalid("row group header too large"))?;

        writer.write_all(&header_len.to_le_bytes())?;
        writer.write_all(&header)?;
        writer.write_all(&payload)?;
    }

    writer.flush()
}

/// Reads the next little-endian u32, or `None` on a clean end of stream.
fn read_header_len<R: Read>(reader: &mut R) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(Some(u32::from_le_bytes(buf)))
}

fn decode_group(header: GroupHeader, columns: GroupColumns) -> io::Result<Vec<TrackEvent>> {
    let rows = header.rows;
    if columns.track_id.len() != rows
        || columns.datetime_added.len() != rows
        || columns.playlist_name_codes.len() != rows
        || columns.source_codes.len() != rows
    {
        return Err(invalid(format!(
            "row group for playlist {} has mismatched column lengths",
            header.playlist_id
        )));
    }

    let playlist_id: Arc<str> = Arc::from(header.playlist_id);
    let names: Vec<Arc<str>> = header.playlist_names.into_iter().map(Arc::from).collect();
    let sources: Vec<Arc<str>> = header.sources.into_iter().map(Arc::from).collect();

    let lookup = |dict: &[Arc<str>], code: u32| {
        dict.get(code as usize)
            .cloned()
            .ok_or_else(|| invalid(format!("dictionary code {code} out of range")))
    };

    let mut events = Vec::with_capacity(columns.track_id.len());
    for (((track_id, datetime_added), name_code), source_code) in columns
        .track_id
        .into_iter()
        .zip(columns.datetime_added)
        .zip(columns.playlist_name_codes)
        .zip(columns.source_codes)
    {
        events.push(TrackEvent {
            track_id,
            playlist_id: playlist_id.clone(),
            playlist_name: lookup(names.as_slice(), name_code)?,
            datetime_added,
            source: lookup(sources.as_slice(), source_code)?,
        });
    }
    Ok(events)
}

/// Decodes a table, materializing only row groups matching `playlist_filter`.
pub fn decode<R: Read>(mut reader: R, playlist_filter: Option<&str>) -> io::Result<HistoryTable> {
    let mut magic = [0u8; 7];
    reader.read_exact(&mut magic)?;
    if &magic[..6] != MAGIC {
        return Err(invalid("missing history file magic"));
    }
    if magic[6] != VERSION {
        return Err(invalid(format!("unsupported history format version {}", magic[6])));
    }

    let mut table = HistoryTable::new();
    while let Some(header_len) = read_header_len(&mut reader)? {
        if header_len > MAX_HEADER_LEN {
            return Err(invalid(format!("row group header of {header_len} bytes")));
        }
        let mut header_bytes = vec![0u8; header_len as usize];
        reader.read_exact(&mut header_bytes)?;
        let header: GroupHeader = serde_json::from_slice(&header_bytes)?;
        if header.payload_len > MAX_PAYLOAD_LEN {
            return Err(invalid(format!(
                "row group payload of {} bytes",
                header.payload_len
            )));
        }

        let wanted = playlist_filter.is_none_or(|p| p == header.playlist_id);
        let mut payload = (&mut reader).take(header.payload_len);

        if !wanted {
            let skipped = io::copy(&mut payload, &mut io::sink())?;
            if skipped != header.payload_len {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            continue;
        }

        // grows with what is actually read, never with the declared length
        let mut payload_bytes = Vec::new();
        payload.read_to_end(&mut payload_bytes)?;
        if payload_bytes.len() as u64 != header.payload_len {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let columns: GroupColumns = serde_json::from_slice(&payload_bytes)?;
        drop(payload_bytes);

        for event in decode_group(header, columns)? {
            table.push(event);
        }
    }

    Ok(table)
}
