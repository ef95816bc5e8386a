//! Background compaction (GC).
//!
//! The compactor journals every file-level step to its own WAL so that a
//! crash mid-compaction can be rolled back on the next start: orphan
//! writes are deleted, half-finished deletes are completed. The strategy
//! itself is pluggable; [`size_tiered::SizeTieredCompaction`] is the one
//! the engine ships.

pub mod size_tiered;

pub use size_tiered::{SizeTieredCompaction, SizeTieredOpts};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{select, tick};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::env::file_system::FileManager;
use crate::error::StrataError;
use crate::manifest::Manifest;
use crate::sstable::CacheManager;
use crate::task::TaskHandle;
use crate::types::{Key, Value};
use crate::wal::{Wal, WalOpts};
use crate::Result;

pub const GC_WAL_FILE: &str = "gc-wal.log";

/// File-level steps of a compaction, journaled in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompactionEvent {
    WriteStarted(PathBuf),
    WriteCompleted(PathBuf),
    DeleteStarted(PathBuf),
    DeleteCompleted(PathBuf),
}

#[derive(Debug, Clone)]
pub struct GcOpts {
    /// Compaction tick period.
    pub time_interval: Duration,
    /// Directory holding the compaction WAL.
    pub wal_dir: PathBuf,
    pub wal_time_interval: Duration,
    pub wal_event_ch_size: usize,
    pub wal_writer_buffer_size: usize,
}

/// Strategy contract: inspect `level` and merge it into `level + 1` when
/// its budget is exceeded.
pub trait CompactionStrategy<K: Key, V: Value>: Send + Sync {
    fn compact(
        &self,
        manifest: &Manifest,
        cache: &CacheManager<K, V>,
        wal: &Wal<CompactionEvent>,
        level: usize,
    ) -> Result<()>;
}

pub struct Gc<K: Key, V: Value> {
    manifest: Arc<Manifest>,
    cache: Arc<CacheManager<K, V>>,
    strategy: Box<dyn CompactionStrategy<K, V>>,
    wal: Wal<CompactionEvent>,
    opts: GcOpts,
}

impl<K: Key, V: Value> Gc<K, V> {
    pub fn new(
        manifest: Arc<Manifest>,
        cache: Arc<CacheManager<K, V>>,
        strategy: Box<dyn CompactionStrategy<K, V>>,
        opts: GcOpts,
    ) -> Result<Gc<K, V>> {
        let wal = Wal::new(WalOpts {
            path: opts.wal_dir.join(GC_WAL_FILE),
            flush_interval: opts.wal_time_interval,
            event_ch_size: opts.wal_event_ch_size,
            writer_buffer_size: opts.wal_writer_buffer_size,
        })?;
        Ok(Gc {
            manifest,
            cache,
            strategy,
            wal,
            opts,
        })
    }

    /// Starts the compaction loop. Every tick re-evaluates level 0; the
    /// strategy recurses into deeper levels as needed. A failed iteration
    /// is logged and abandoned without touching the manifest.
    pub(crate) fn spawn(self) -> std::io::Result<TaskHandle> {
        TaskHandle::spawn("compactor", move |shutdown| {
            let ticker = tick(self.opts.time_interval);
            loop {
                select! {
                    recv(shutdown) -> _ => break,
                    recv(ticker) -> _ => {
                        if let Err(e) =
                            self.strategy
                                .compact(&self.manifest, &self.cache, &self.wal, 0)
                        {
                            error!("compaction aborted: {}", e);
                        }
                    }
                }
            }
            self.wal.close();
        })
    }
}

/// Replays the compaction WAL at `path` and removes every file whose
/// write or delete never completed. Must run before the flusher and
/// compactor start.
pub fn recover(path: &Path) {
    let events = match Wal::<CompactionEvent>::replay(path) {
        Ok(events) => events,
        Err(StrataError::FileNotFound(_)) => return,
        Err(e) => {
            warn!("compaction wal replay failed: {}", e);
            return;
        }
    };
    rollback(&events);
}

/// Folds the journal into partial-write and partial-delete sets and
/// deletes every path left in either: orphan SST fragments were never
/// installed in the manifest, and half-deleted files are already gone
/// from it.
fn rollback(events: &[CompactionEvent]) {
    let mut partial_writes: HashSet<&PathBuf> = HashSet::new();
    let mut partial_deletes: HashSet<&PathBuf> = HashSet::new();
    for event in events {
        match event {
            CompactionEvent::WriteStarted(path) => {
                partial_writes.insert(path);
            }
            CompactionEvent::WriteCompleted(path) => {
                partial_writes.remove(path);
            }
            CompactionEvent::DeleteStarted(path) => {
                partial_deletes.insert(path);
            }
            CompactionEvent::DeleteCompleted(path) => {
                partial_deletes.remove(path);
            }
        }
    }

    let manager = FileManager::global();
    for path in partial_writes.iter().chain(partial_deletes.iter()) {
        match manager.delete(path) {
            Ok(()) => info!("rolled back partial compaction file {:?}", path),
            Err(StrataError::FileNotFound(_)) => {}
            Err(e) => warn!("failed to roll back {:?}: {}", path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_rollback_removes_partial_files() {
        let temp_dir = TempDir::new().unwrap();
        let orphan_write = temp_dir.path().join("sst-3.db");
        let half_delete = temp_dir.path().join("sst-1.db");
        let survivor = temp_dir.path().join("sst-2.db");
        for path in [&orphan_write, &half_delete, &survivor] {
            fs::write(path, b"x").unwrap();
        }

        let events = vec![
            CompactionEvent::WriteStarted(survivor.clone()),
            CompactionEvent::WriteCompleted(survivor.clone()),
            CompactionEvent::WriteStarted(orphan_write.clone()),
            CompactionEvent::DeleteStarted(half_delete.clone()),
        ];
        rollback(&events);

        assert!(!orphan_write.exists());
        assert!(!half_delete.exists());
        assert!(survivor.exists());
    }

    #[test]
    fn test_rollback_tolerates_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let events = vec![CompactionEvent::DeleteStarted(
            temp_dir.path().join("already-gone.db"),
        )];
        // must not panic or error
        rollback(&events);
    }

    #[test]
    fn test_recover_without_journal_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        recover(&temp_dir.path().join(GC_WAL_FILE));
    }
}
