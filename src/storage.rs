//! Storage façade: binds the manifest, memtable store, flusher and
//! compactor into one named collection with `put`/`get`/`delete`.

use std::sync::Arc;

use crate::compact;
use crate::compact::{Gc, GcOpts, SizeTieredCompaction, SizeTieredOpts, GC_WAL_FILE};
use crate::config::{StorageOpts, DEFAULT_MANIFEST_SYNC_INTERVAL};
use crate::error::StrataError;
use crate::manifest::{Manifest, ManifestOpts};
use crate::memtable::{MemtableOpts, MemtableStore};
use crate::task::TaskHandle;
use crate::types::{Key, Value};
use crate::Result;

pub struct Storage<K: Key, V: Value> {
    name: String,
    manifest: Arc<Manifest>,
    store: Arc<MemtableStore<K, V>>,
    gc_task: Option<TaskHandle>,
    sync_task: Option<TaskHandle>,
}

impl<K: Key, V: Value> Storage<K, V> {
    /// Creates or loads the collection `name` under `opts.directory`,
    /// rolls back any partial compaction, replays memtable WALs (when
    /// enabled) and starts the background tasks.
    pub fn open(name: &str, opts: StorageOpts) -> Result<Storage<K, V>> {
        let opts = opts.normalized();

        let manifest = Arc::new(Manifest::load(
            name,
            ManifestOpts {
                dir: opts.directory.clone(),
            },
        )?);
        let sync_task = manifest.spawn_sync(DEFAULT_MANIFEST_SYNC_INTERVAL)?;

        // partial-progress rollback must precede the flush/compaction tasks
        compact::recover(&opts.gc_dir().join(GC_WAL_FILE));

        let store = Arc::new(MemtableStore::new(
            manifest.clone(),
            MemtableOpts {
                soft_limit_in_bytes: opts.memtable_threshold,
                queue_hard_limit: opts.queue_hard_limit,
                queue_soft_limit: opts.queue_soft_limit,
                flush_time_interval: opts.flush_time_interval,
                turn_on_wal: opts.turn_on_memtable_wal,
                wal_dir: opts.wal_dir(),
                wal_time_interval: opts.memtable_wal_time_interval,
                wal_event_ch_size: opts.memtable_wal_event_ch_size,
                wal_writer_buffer_size: opts.memtable_wal_writer_buffer_size,
            },
        )?);

        let gc_task = if opts.turn_on_compaction {
            let gc = Gc::new(
                manifest.clone(),
                store.decoder_cache().clone(),
                Box::new(SizeTieredCompaction {
                    opts: SizeTieredOpts {
                        level0_max_size_in_bytes: opts.level0_max_size_in_bytes,
                        max_size_in_bytes_growth_factor: opts.max_size_in_bytes_growth_factor,
                    },
                }),
                GcOpts {
                    time_interval: opts.compaction_time_interval,
                    wal_dir: opts.gc_dir(),
                    wal_time_interval: opts.compaction_wal_time_interval,
                    wal_event_ch_size: opts.compaction_wal_event_ch_size,
                    wal_writer_buffer_size: opts.compaction_wal_writer_buffer_size,
                },
            )?;
            Some(gc.spawn()?)
        } else {
            None
        };

        Ok(Storage {
            name: name.to_owned(),
            manifest,
            store,
            gc_task,
            sync_task: Some(sync_task),
        })
    }

    pub fn put(&self, key: K, value: V) -> Result<()> {
        self.store.write(key, value);
        Ok(())
    }

    /// Returns `KeyNotFound` for both missing and tombstoned keys.
    pub fn get(&self, key: &K) -> Result<V> {
        self.store.read(key).ok_or(StrataError::KeyNotFound)
    }

    pub fn delete(&self, key: K, tombstone: V) -> Result<()> {
        self.store.delete(key, tombstone);
        Ok(())
    }

    /// Replays the memtable WALs; see
    /// [`MemtableStore::rollback_all`]. The store already replays on
    /// open, so this is only needed to re-apply logs written since.
    pub fn rollback_all(&self) -> Result<()> {
        self.store.rollback_all()
    }

    /// Every live value across memtables and all levels.
    pub fn read_all(&self) -> Result<Vec<V>> {
        self.store.read_all()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    /// Tears the engine down in dependency order: compactor first, then
    /// the flusher and WALs, then the manifest sync loop (which takes a
    /// final snapshot).
    pub fn close(&mut self) {
        if let Some(task) = self.gc_task.take() {
            task.stop();
        }
        self.store.close();
        if let Some(task) = self.sync_task.take() {
            task.stop();
        }
    }
}

impl<K: Key, V: Value> Drop for Storage<K, V> {
    fn drop(&mut self) {
        self.close();
    }
}
