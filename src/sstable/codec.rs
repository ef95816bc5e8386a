//! SST encoding: a payload stream and a parallel index stream.
//!
//! The data file is a concatenation of bincode-encoded [`Payload`]
//! records; records are located through the index rather than framed.
//! The index file is a sequence of length-prefixed [`IndexEntry`]
//! records, strictly sorted by key in the same order as the payloads.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};

use crate::error::StrataError;
use crate::ioutils;
use crate::types::{Key, Payload, Value};
use crate::Result;

/// Points at one payload record inside the data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry<K> {
    pub key: K,
    pub offset: u64,
    pub size: u64,
}

/// Writes `payloads` (already sorted by key) to `db` and the matching
/// index entries to `index`, then rewinds both files to offset 0.
pub fn encode<K: Key, V: Value>(
    db: &mut File,
    index: &mut File,
    payloads: &[Payload<K, V>],
) -> Result<()> {
    for payload in payloads {
        let offset = db.stream_position()?;
        let record =
            bincode::serialize(payload).map_err(|e| StrataError::Decode(e.to_string()))?;
        db.write_all(&record)?;

        let entry = IndexEntry {
            key: payload.key.clone(),
            offset,
            size: record.len() as u64,
        };
        let entry_record =
            bincode::serialize(&entry).map_err(|e| StrataError::Decode(e.to_string()))?;
        ioutils::write_frame(index, &entry_record)?;
    }
    db.seek(SeekFrom::Start(0))?;
    index.seek(SeekFrom::Start(0))?;
    Ok(())
}

/// Decodes a whole index stream. Unlike WAL replay there is no torn-tail
/// tolerance: an index is written and fsynced as a unit, so any decode
/// failure is corruption.
pub(crate) fn decode_index<K: Key>(
    buf: &[u8],
) -> std::result::Result<Vec<IndexEntry<K>>, String> {
    let mut entries = Vec::new();
    let mut consumed = 0usize;
    for frame in ioutils::frames(buf) {
        let entry: IndexEntry<K> =
            bincode::deserialize(frame).map_err(|e| format!("bad index entry: {}", e))?;
        entries.push(entry);
        consumed += ioutils::FRAME_HEADER_SIZE + frame.len();
    }
    if consumed != buf.len() {
        return Err(format!(
            "index stream truncated at byte {} of {}",
            consumed,
            buf.len()
        ));
    }
    Ok(entries)
}
