//! Read cache over SSTs.
//!
//! A [`CacheUnit`] pins the mmap views of one SST's data and index files
//! and decodes the index exactly once, on first access, no matter how
//! many threads race for it. The [`CacheManager`] guarantees at most one
//! unit per data path.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::env::file_system::{FileManager, FileReader};
use crate::error::StrataError;
use crate::sstable::codec;
use crate::sstable::codec::IndexEntry;
use crate::types::{Key, Lookup, Payload, Value};
use crate::Result;

pub struct CacheUnit<K: Key, V: Value> {
    // mmap views shared with every other holder of these files
    db: Arc<FileReader>,
    index: Arc<FileReader>,
    // decoded once; the error arm is sticky, like the decoded entries
    entries: OnceLock<std::result::Result<Vec<IndexEntry<K>>, String>>,
    _value: PhantomData<fn() -> V>,
}

impl<K: Key, V: Value> CacheUnit<K, V> {
    pub fn new(db: Arc<FileReader>, index: Arc<FileReader>) -> CacheUnit<K, V> {
        CacheUnit {
            db,
            index,
            entries: OnceLock::new(),
            _value: PhantomData,
        }
    }

    fn entries(&self) -> Result<&[IndexEntry<K>]> {
        match self
            .entries
            .get_or_init(|| codec::decode_index(self.index.payload()))
        {
            Ok(entries) => Ok(entries),
            Err(msg) => Err(StrataError::Decode(msg.clone())),
        }
    }

    /// Point lookup: binary search over the decoded index, then a single
    /// payload decode from the data mapping.
    pub fn get(&self, key: &K) -> Result<Lookup<V>> {
        let entries = self.entries()?;
        let slot = match entries.binary_search_by(|entry| entry.key.cmp(key)) {
            Ok(slot) => slot,
            Err(_) => return Ok(Lookup::Missing),
        };
        let payload = self.decode_at(&entries[slot])?;
        if payload.value.is_deleted() {
            return Ok(Lookup::Deleted);
        }
        Ok(Lookup::Found(payload.value))
    }

    /// Decodes the whole table in index order. Used by compaction; the
    /// result is never cached.
    pub fn get_all(&self) -> Result<Vec<Payload<K, V>>> {
        let entries = self.entries()?;
        let mut payloads = Vec::with_capacity(entries.len());
        for entry in entries {
            payloads.push(self.decode_at(entry)?);
        }
        Ok(payloads)
    }

    fn decode_at(&self, entry: &IndexEntry<K>) -> Result<Payload<K, V>> {
        let data = self.db.payload();
        let end = entry.offset.checked_add(entry.size);
        match end {
            Some(end) if end as usize <= data.len() => {
                let slice = &data[entry.offset as usize..end as usize];
                bincode::deserialize(slice).map_err(|e| StrataError::Decode(e.to_string()))
            }
            _ => Err(StrataError::IndexOutOfBound {
                offset: entry.offset,
                size: entry.size,
                mapped: data.len(),
            }),
        }
    }
}

/// Maps an SST data path to its cache unit, creating at most one unit per
/// path even under concurrent callers.
pub struct CacheManager<K: Key, V: Value> {
    units: DashMap<PathBuf, Arc<CacheUnit<K, V>>>,
}

impl<K: Key, V: Value> CacheManager<K, V> {
    pub fn new() -> CacheManager<K, V> {
        CacheManager {
            units: DashMap::new(),
        }
    }

    fn unit(&self, db_path: &Path, index_path: &Path) -> Result<Arc<CacheUnit<K, V>>> {
        if let Some(unit) = self.units.get(db_path) {
            return Ok(unit.clone());
        }
        let manager = FileManager::global();
        let db = manager.open_for_read(db_path)?;
        let index = manager.open_for_read(index_path)?;
        let unit = Arc::new(CacheUnit::new(db, index));
        let entry = self.units.entry(db_path.to_path_buf()).or_insert(unit);
        Ok(entry.value().clone())
    }

    pub fn get(&self, db_path: &Path, index_path: &Path, key: &K) -> Result<Lookup<V>> {
        self.unit(db_path, index_path)?.get(key)
    }

    pub fn get_all(&self, db_path: &Path, index_path: &Path) -> Result<Vec<Payload<K, V>>> {
        self.unit(db_path, index_path)?.get_all()
    }

    /// Opportunistically drops the unit for a deleted SST. Readers still
    /// holding the unit keep a valid mapping.
    pub fn evict(&self, db_path: &Path) {
        self.units.remove(db_path);
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl<K: Key, V: Value> Default for CacheManager<K, V> {
    fn default() -> CacheManager<K, V> {
        CacheManager::new()
    }
}
