//! Memtable store: the writable head, the flush queue behind it, and the
//! fused read path across memtables and SST levels.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use log::{info, warn};

use crate::error::StrataError;
use crate::manifest::Manifest;
use crate::memtable::flush::Flusher;
use crate::memtable::queue::{Node, Queue, QueueOpts};
use crate::memtable::{Memtable, MemtableEvent, MemtableOpts};
use crate::sstable::CacheManager;
use crate::task::TaskHandle;
use crate::types::{Key, Lookup, Value};
use crate::wal::Wal;
use crate::Result;

pub struct MemtableStore<K: Key, V: Value> {
    manifest: Arc<Manifest>,
    queue: Arc<Queue<K, V>>,
    // current writable head; every head node also lives in the queue
    head: RwLock<Arc<Node<K, V>>>,
    cache: Arc<CacheManager<K, V>>,
    flusher: Mutex<Option<TaskHandle>>,
    opts: MemtableOpts,
}

impl<K: Key, V: Value> MemtableStore<K, V> {
    /// Builds the store and starts the flusher. With WAL enabled, logs
    /// left behind by a previous run are replayed before the store
    /// accepts writes.
    pub fn new(manifest: Arc<Manifest>, opts: MemtableOpts) -> Result<MemtableStore<K, V>> {
        let queue = Arc::new(Queue::new(QueueOpts {
            hard_limit: opts.queue_hard_limit,
        }));
        let mem = Arc::new(Memtable::new(opts.clone()));
        let node = Arc::new(Node::new(mem));
        queue.push(node.clone());

        let flusher = Flusher::new(queue.clone(), manifest.clone());
        let flusher_task = flusher.spawn(opts.flush_time_interval)?;

        let store = MemtableStore {
            manifest,
            queue,
            head: RwLock::new(node),
            cache: Arc::new(CacheManager::new()),
            flusher: Mutex::new(Some(flusher_task)),
            opts,
        };
        if store.opts.turn_on_wal {
            if let Err(e) = store.rollback_all() {
                warn!("wal replay skipped: {}", e);
            }
        }
        Ok(store)
    }

    /// Writes through the head memtable. On overflow the head is sealed
    /// for flushing and a fresh memtable takes its place; returns `true`
    /// when that rotation happened.
    pub fn write(&self, key: K, value: V) -> bool {
        {
            let head = self.head.read().unwrap();
            if head.mem.write(key.clone(), value.clone()) {
                return false;
            }
        }

        let mut head = self.head.write().unwrap();
        // another writer may have rotated while we waited for the lock
        if head.mem.write(key.clone(), value.clone()) {
            return true;
        }
        info!("memtable overflow, sealing current head");

        let mem = Arc::new(Memtable::new(self.opts.clone()));
        let node = Arc::new(Node::new(mem));
        // backpressure: blocks while the flush queue is at its hard limit
        self.queue.push(node.clone());
        let _ = node.mem.write(key, value);
        self.queue.seal(&head);
        *head = node;
        true
    }

    /// Tombstones `key` in the head memtable. No overflow check.
    pub fn delete(&self, key: K, tombstone: V) {
        let head = self.head.read().unwrap();
        head.mem.delete(key, tombstone);
    }

    /// Point lookup: memtables newest-to-oldest, then levels 0..N with
    /// tables in decreasing id order. The first hit wins; the first
    /// tombstone is a terminal miss. An unreadable SST is logged and
    /// skipped so one corrupt table cannot fail unrelated reads.
    pub fn read(&self, key: &K) -> Option<V> {
        let nodes = self.queue.snapshot();
        for node in nodes.iter().rev() {
            match node.mem.read(key) {
                Lookup::Found(value) => return Some(value),
                Lookup::Deleted => return None,
                Lookup::Missing => {}
            }
        }

        let lsm = self.manifest.lsm();
        let mut level_no = 0;
        while let Some(level) = lsm.get_level(level_no) {
            let tables = level.tables();
            let mut ids: Vec<u64> = tables.keys().copied().collect();
            ids.sort_unstable_by(|a, b| b.cmp(a));
            for id in ids {
                let meta = &tables[&id];
                match self.cache.get(&meta.db_path, &meta.index_path, key) {
                    Ok(Lookup::Found(value)) => return Some(value),
                    Ok(Lookup::Deleted) => return None,
                    Ok(Lookup::Missing) => {}
                    Err(e) => {
                        warn!("sstable {:?} unreadable, skipping: {}", meta.db_path, e);
                    }
                }
            }
            level_no += 1;
        }
        None
    }

    /// Materializes every live value across memtables and all levels,
    /// newest occurrence winning and tombstones suppressing older copies.
    pub fn read_all(&self) -> Result<Vec<V>> {
        let mut result = Vec::new();
        let mut seen: std::collections::HashSet<K> = std::collections::HashSet::new();

        let nodes = self.queue.snapshot();
        for node in nodes.iter().rev() {
            let (payloads, _) = node.mem.build_payload_list();
            for payload in payloads {
                if seen.insert(payload.key) && !payload.value.is_deleted() {
                    result.push(payload.value);
                }
            }
        }

        let lsm = self.manifest.lsm();
        let mut level_no = 0;
        while let Some(level) = lsm.get_level(level_no) {
            let tables = level.tables();
            let mut ids: Vec<u64> = tables.keys().copied().collect();
            ids.sort_unstable_by(|a, b| b.cmp(a));
            for id in ids {
                let meta = &tables[&id];
                let payloads = self.cache.get_all(&meta.db_path, &meta.index_path)?;
                for payload in payloads {
                    if seen.insert(payload.key) && !payload.value.is_deleted() {
                        result.push(payload.value);
                    }
                }
            }
            level_no += 1;
        }
        Ok(result)
    }

    /// Replays every `wal-<nanos>.log` under the WAL directory in
    /// timestamp order, re-applying writes and deletes. Startup-time
    /// recovery; fails with `WalDisabled` when the WAL is off.
    pub fn rollback_all(&self) -> Result<()> {
        if !self.opts.turn_on_wal {
            return Err(StrataError::WalDisabled);
        }

        let mut logs: Vec<(i64, PathBuf)> = Vec::new();
        let entries = match fs::read_dir(&self.opts.wal_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if let Some(nanos) = wal_timestamp(&path) {
                logs.push((nanos, path));
            }
        }
        logs.sort_unstable_by_key(|(nanos, _)| *nanos);

        for (_, path) in logs {
            self.rollback(&path);
        }
        Ok(())
    }

    fn rollback(&self, path: &std::path::Path) {
        let events = match Wal::<MemtableEvent<K, V>>::replay(path) {
            Ok(events) => events,
            Err(e) => {
                warn!("skipping unreadable wal {:?}: {}", path, e);
                return;
            }
        };
        for event in events {
            match event {
                MemtableEvent::Write { key, value } => {
                    self.write(key, value);
                }
                MemtableEvent::Delete { key, tombstone } => {
                    self.delete(key, tombstone);
                }
            }
        }
    }

    /// Test helper: drops the head's contents and installs a fresh empty
    /// head. The old node leaves the queue unflushed, so its WAL file (if
    /// any) stays on disk for replay.
    pub fn clear(&self) {
        let mut head = self.head.write().unwrap();
        head.mem.clear_data();
        head.mem.close_wal();
        self.queue.remove(&head);

        let mem = Arc::new(Memtable::new(self.opts.clone()));
        let node = Arc::new(Node::new(mem));
        self.queue.push(node.clone());
        *head = node;
    }

    /// Shared decoder cache; the compactor reads SSTs through it.
    pub fn decoder_cache(&self) -> &Arc<CacheManager<K, V>> {
        &self.cache
    }

    /// Stops the flusher, then closes the head WAL so buffered events are
    /// flushed and become replayable.
    pub fn close(&self) {
        if let Some(task) = self.flusher.lock().unwrap().take() {
            task.stop();
        }
        let head = self.head.read().unwrap();
        head.mem.close_wal();
    }
}

impl<K: Key, V: Value> Drop for MemtableStore<K, V> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Extracts the nanosecond timestamp from a `wal-<nanos>.log` file name.
fn wal_timestamp(path: &std::path::Path) -> Option<i64> {
    let name = path.file_name()?.to_str()?;
    let nanos = name.strip_prefix("wal-")?.strip_suffix(".log")?;
    nanos.parse().ok()
}
