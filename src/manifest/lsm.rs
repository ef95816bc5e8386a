//! Runtime LSM topology: levels and the SSTs they hold.
//!
//! The runtime tree is lock-guarded; the `*View` structs are plain
//! snapshots used for JSON serialization, since serde must see a stable
//! structure with no locks in it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Manifest record of one on-disk SST.
#[derive(Debug, Clone, PartialEq)]
pub struct SstMeta {
    pub db_path: PathBuf,
    pub index_path: PathBuf,
    pub size_in_bytes: i64,
}

/// An unordered collection of SSTs with a monotonically increasing id
/// counter. Level 0 is written only by the flusher, levels >= 1 only by
/// the compactor; readers are unbounded.
pub struct Level {
    tables: RwLock<HashMap<u64, SstMeta>>,
    size_in_bytes: AtomicI64,
    next_id: AtomicU64,
}

impl Level {
    fn new() -> Level {
        Level {
            tables: RwLock::new(HashMap::new()),
            size_in_bytes: AtomicI64::new(0),
            next_id: AtomicU64::new(0),
        }
    }

    /// Allocates the next table id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Installs `meta` under `id` and grows the level size. Expected to be
    /// called by a single writer per level (flusher for L0, compactor for
    /// the rest).
    pub fn set_sstable(&self, id: u64, meta: SstMeta) {
        let mut tables = self.tables.write().unwrap();
        self.size_in_bytes
            .fetch_add(meta.size_in_bytes, Ordering::SeqCst);
        tables.insert(id, meta);
    }

    /// Removes the given table ids, shrinking the level size accordingly.
    pub fn clear(&self, ids: &[u64]) {
        let mut tables = self.tables.write().unwrap();
        for id in ids {
            if let Some(meta) = tables.remove(id) {
                self.size_in_bytes
                    .fetch_sub(meta.size_in_bytes, Ordering::SeqCst);
            }
        }
    }

    /// Snapshot of the level's table map.
    pub fn tables(&self) -> HashMap<u64, SstMeta> {
        self.tables.read().unwrap().clone()
    }

    pub fn tables_count(&self) -> usize {
        self.tables.read().unwrap().len()
    }

    pub fn size_in_bytes(&self) -> i64 {
        self.size_in_bytes.load(Ordering::SeqCst)
    }

    fn to_view(&self) -> LevelView {
        let tables = self.tables.read().unwrap();
        LevelView {
            size_in_bytes: self.size_in_bytes.load(Ordering::SeqCst),
            next_id: self.next_id.load(Ordering::SeqCst),
            tables: tables
                .iter()
                .map(|(id, meta)| {
                    (
                        *id,
                        SstView {
                            db_path: meta.db_path.clone(),
                            index_path: meta.index_path.clone(),
                            size_in_bytes: meta.size_in_bytes,
                        },
                    )
                })
                .collect(),
        }
    }

    fn from_view(view: LevelView) -> Level {
        let tables = view
            .tables
            .into_iter()
            .map(|(id, sst)| {
                (
                    id,
                    SstMeta {
                        db_path: sst.db_path,
                        index_path: sst.index_path,
                        size_in_bytes: sst.size_in_bytes,
                    },
                )
            })
            .collect();
        Level {
            tables: RwLock::new(tables),
            size_in_bytes: AtomicI64::new(view.size_in_bytes),
            next_id: AtomicU64::new(view.next_id),
        }
    }
}

/// The ordered sequence of levels. A fresh tree always has level 0.
pub struct Lsm {
    name: String,
    levels: RwLock<Vec<Arc<Level>>>,
}

impl Lsm {
    pub fn new(name: &str) -> Lsm {
        Lsm {
            name: name.to_owned(),
            levels: RwLock::new(vec![Arc::new(Level::new())]),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_level(&self, level: usize) -> Option<Arc<Level>> {
        self.levels.read().unwrap().get(level).cloned()
    }

    pub fn append_level(&self) {
        self.levels.write().unwrap().push(Arc::new(Level::new()));
    }

    /// Returns level `level`, appending empty levels until it exists.
    pub fn ensure_level(&self, level: usize) -> Arc<Level> {
        loop {
            if let Some(found) = self.get_level(level) {
                return found;
            }
            self.append_level();
        }
    }

    pub fn depth(&self) -> usize {
        self.levels.read().unwrap().len()
    }

    pub fn to_view(&self) -> LsmView {
        let levels = self.levels.read().unwrap();
        LsmView {
            name: self.name.clone(),
            levels: levels.iter().map(|level| level.to_view()).collect(),
        }
    }

    pub fn from_view(view: LsmView) -> Lsm {
        let levels = view.levels.into_iter().map(Level::from_view);
        Lsm {
            name: view.name,
            levels: RwLock::new(levels.map(Arc::new).collect()),
        }
    }
}

/// Serializable snapshot of the whole tree. The field names are the
/// on-disk manifest schema and must stay stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LsmView {
    pub name: String,
    pub levels: Vec<LevelView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelView {
    #[serde(rename = "size")]
    pub size_in_bytes: i64,
    #[serde(rename = "nextId")]
    pub next_id: u64,
    pub tables: HashMap<u64, SstView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SstView {
    #[serde(rename = "dBPath")]
    pub db_path: PathBuf,
    #[serde(rename = "indexPath")]
    pub index_path: PathBuf,
    #[serde(rename = "size")]
    pub size_in_bytes: i64,
}
