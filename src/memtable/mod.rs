//! In-memory write buffer and its flush pipeline.

pub mod flush;
pub mod queue;
pub mod store;

pub use store::MemtableStore;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::error;
use serde::{Deserialize, Serialize};

use crate::types::{Key, Lookup, Payload, Value};
use crate::wal::{Wal, WalOpts};

#[derive(Debug, Clone)]
pub struct MemtableOpts {
    /// Soft byte limit after which writes are rejected and the memtable is
    /// sealed for flushing.
    pub soft_limit_in_bytes: i64,
    /// Flush queue hard limit; 0 means unbounded.
    pub queue_hard_limit: usize,
    /// Threshold for proactive flushing before the hard limit is hit.
    pub queue_soft_limit: usize,
    /// Flusher tick period.
    pub flush_time_interval: Duration,
    /// Enables the per-memtable write-ahead log.
    pub turn_on_wal: bool,
    /// Directory holding `wal-<nanos>.log` files.
    pub wal_dir: PathBuf,
    pub wal_time_interval: Duration,
    pub wal_event_ch_size: usize,
    pub wal_writer_buffer_size: usize,
}

impl Default for MemtableOpts {
    fn default() -> MemtableOpts {
        MemtableOpts {
            soft_limit_in_bytes: crate::config::DEFAULT_MEMTABLE_THRESHOLD,
            queue_hard_limit: crate::config::DEFAULT_QUEUE_HARD_LIMIT,
            queue_soft_limit: crate::config::DEFAULT_QUEUE_SOFT_LIMIT,
            flush_time_interval: crate::config::DEFAULT_FLUSH_TIME_INTERVAL,
            turn_on_wal: false,
            wal_dir: std::env::temp_dir().join("wal"),
            wal_time_interval: crate::config::DEFAULT_WAL_TIME_INTERVAL,
            wal_event_ch_size: crate::config::DEFAULT_WAL_EVENT_CH_SIZE,
            wal_writer_buffer_size: crate::config::DEFAULT_WRITER_BUFFER_SIZE,
        }
    }
}

/// One durable memtable mutation. `Delete` carries the tombstone template
/// so replay can re-apply it against a value type with no default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MemtableEvent<K, V> {
    Write { key: K, value: V },
    Delete { key: K, tombstone: V },
}

/// Ordered in-memory buffer with a soft byte budget. All operations lock
/// the inner map in the obvious mode; WAL appends happen after the lock
/// is released.
pub struct Memtable<K: Key, V: Value> {
    data: RwLock<BTreeMap<K, V>>,
    wal: Option<Wal<MemtableEvent<K, V>>>,
    opts: MemtableOpts,
}

impl<K: Key, V: Value> Memtable<K, V> {
    /// Creates a memtable; with WAL enabled, a fresh `wal-<nanos>.log` is
    /// opened whose timestamp defines replay order.
    pub fn new(opts: MemtableOpts) -> Memtable<K, V> {
        let wal = if opts.turn_on_wal {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let path = opts.wal_dir.join(format!("wal-{}.log", nanos));
            match Wal::new(WalOpts {
                path,
                flush_interval: opts.wal_time_interval,
                event_ch_size: opts.wal_event_ch_size,
                writer_buffer_size: opts.wal_writer_buffer_size,
            }) {
                Ok(wal) => Some(wal),
                Err(e) => {
                    error!("failed to open memtable wal: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Memtable {
            data: RwLock::new(BTreeMap::new()),
            wal,
            opts,
        }
    }

    /// Inserts unless the write would push the table over its soft limit,
    /// in which case `false` is returned without inserting and the caller
    /// is expected to seal this memtable and retry on a fresh one.
    ///
    /// The overflow check is `(entry_count + 1) * size(incoming value)`,
    /// deliberately priced with the incoming value only.
    pub fn write(&self, key: K, value: V) -> bool {
        {
            let mut data = self.data.write().unwrap();
            let projected = (data.len() as i64 + 1) * value.size_in_bytes() as i64;
            if projected > self.opts.soft_limit_in_bytes {
                return false;
            }
            data.insert(key.clone(), value.clone());
        }
        if let Some(wal) = &self.wal {
            wal.append(MemtableEvent::Write { key, value });
        }
        true
    }

    /// Installs the tombstone template when `key` is absent; in all cases
    /// marks the stored value deleted.
    pub fn delete(&self, key: K, tombstone: V) {
        {
            let mut data = self.data.write().unwrap();
            data.entry(key.clone())
                .or_insert_with(|| tombstone.clone())
                .mark_deleted();
        }
        if let Some(wal) = &self.wal {
            wal.append(MemtableEvent::Delete { key, tombstone });
        }
    }

    pub fn read(&self, key: &K) -> Lookup<V> {
        let data = self.data.read().unwrap();
        match data.get(key) {
            None => Lookup::Missing,
            Some(value) if value.is_deleted() => Lookup::Deleted,
            Some(value) => Lookup::Found(value.clone()),
        }
    }

    /// Materializes the entries sorted by key ascending, together with the
    /// summed value sizes.
    pub fn build_payload_list(&self) -> (Vec<Payload<K, V>>, i64) {
        let data = self.data.read().unwrap();
        let mut size = 0i64;
        let mut payloads = Vec::with_capacity(data.len());
        for (key, value) in data.iter() {
            size += value.size_in_bytes() as i64;
            payloads.push(Payload {
                key: key.clone(),
                value: value.clone(),
            });
        }
        (payloads, size)
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn clear_data(&self) {
        self.data.write().unwrap().clear();
    }

    pub(crate) fn wal(&self) -> Option<&Wal<MemtableEvent<K, V>>> {
        self.wal.as_ref()
    }

    /// Flushes and closes the WAL without deleting it; buffered events
    /// become replayable.
    pub(crate) fn close_wal(&self) {
        if let Some(wal) = &self.wal {
            wal.close();
        }
    }
}
