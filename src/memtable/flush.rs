//! Background flusher: turns sealed memtables into level-0 SSTs.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{select, tick};
use log::{debug, error};

use crate::env::file_system::FileManager;
use crate::manifest::{Manifest, SstMeta};
use crate::memtable::queue::Queue;
use crate::memtable::Memtable;
use crate::sstable::codec;
use crate::task::TaskHandle;
use crate::types::{Key, Value};
use crate::Result;

pub(crate) struct Flusher<K: Key, V: Value> {
    queue: Arc<Queue<K, V>>,
    manifest: Arc<Manifest>,
}

impl<K: Key, V: Value> Flusher<K, V> {
    pub fn new(queue: Arc<Queue<K, V>>, manifest: Arc<Manifest>) -> Flusher<K, V> {
        Flusher { queue, manifest }
    }

    /// Starts the flush loop: each tick waits for the oldest sealed
    /// memtable and persists it.
    pub fn spawn(self, interval: Duration) -> std::io::Result<TaskHandle> {
        TaskHandle::spawn("flusher", move |shutdown| {
            let ticker = tick(interval);
            loop {
                select! {
                    recv(shutdown) -> _ => break,
                    recv(ticker) -> _ => {
                        if let Some(mem) = self.queue.pop(interval) {
                            if let Err(e) = self.flush(&mem) {
                                error!("flush failed: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }

    /// Order of update: encode the SST, fsync it, install it in the
    /// manifest, clear the memtable, delete its WAL. A crash before the
    /// install leaves an orphan SST that the WAL replay makes redundant.
    fn flush(&self, mem: &Memtable<K, V>) -> Result<()> {
        let level0 = match self.manifest.lsm().get_level(0) {
            Some(level) => level,
            None => return Ok(()),
        };

        let (payloads, total_size) = mem.build_payload_list();
        if payloads.is_empty() {
            // nothing to persist; the log is obsolete all the same
            if let Some(wal) = mem.wal() {
                wal.delete()?;
            }
            return Ok(());
        }

        let id = level0.next_id();
        let db_path = self.manifest.format_db_path(0, id);
        let index_path = self.manifest.format_index_path(0, id);

        let manager = FileManager::global();
        let mut db_writer = manager.open_for_write(&db_path)?;
        let mut index_writer = manager.open_for_write(&index_path)?;

        codec::encode(db_writer.file_mut(), index_writer.file_mut(), &payloads)?;
        db_writer.sync()?;

        level0.set_sstable(
            id,
            SstMeta {
                db_path: db_path.clone(),
                index_path,
                size_in_bytes: total_size,
            },
        );

        mem.clear_data();
        if let Some(wal) = mem.wal() {
            wal.delete()?;
        }
        debug!("flushed memtable to {:?}", db_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestOpts;
    use crate::memtable::queue::{Node, QueueOpts};
    use crate::memtable::MemtableOpts;
    use crate::sstable::CacheManager;
    use crate::types::{IntKey, IntValue, Lookup};
    use tempfile::TempDir;

    #[test]
    fn test_flush_installs_level0_table() {
        let temp_dir = TempDir::new().unwrap();
        let manifest = Arc::new(
            Manifest::load(
                "flush-test",
                ManifestOpts {
                    dir: temp_dir.path().to_path_buf(),
                },
            )
            .unwrap(),
        );
        let queue = Arc::new(Queue::new(QueueOpts { hard_limit: 0 }));

        let mem = Arc::new(Memtable::<IntKey, IntValue>::new(MemtableOpts::default()));
        for i in 0..100 {
            mem.write(IntKey(i), IntValue::new(i as i32));
        }
        let node = Arc::new(Node::new(mem.clone()));
        queue.push(node.clone());
        queue.seal(&node);

        let flusher = Flusher::new(queue.clone(), manifest.clone());
        let popped = queue.pop(Duration::from_millis(100)).unwrap();
        flusher.flush(&popped).unwrap();

        assert!(mem.is_empty());
        let level0 = manifest.lsm().get_level(0).unwrap();
        assert_eq!(1, level0.tables_count());
        assert_eq!(400, level0.size_in_bytes());

        let tables = level0.tables();
        let meta = tables.values().next().unwrap();
        let cache = CacheManager::<IntKey, IntValue>::new();
        assert_eq!(
            Lookup::Found(IntValue::new(42)),
            cache.get(&meta.db_path, &meta.index_path, &IntKey(42)).unwrap()
        );
    }

    #[test]
    fn test_flush_skips_empty_memtable() {
        let temp_dir = TempDir::new().unwrap();
        let manifest = Arc::new(
            Manifest::load(
                "flush-empty",
                ManifestOpts {
                    dir: temp_dir.path().to_path_buf(),
                },
            )
            .unwrap(),
        );
        let queue = Arc::new(Queue::new(QueueOpts { hard_limit: 0 }));
        let flusher = Flusher::new(queue, manifest.clone());

        let mem = Memtable::<IntKey, IntValue>::new(MemtableOpts::default());
        flusher.flush(&mem).unwrap();
        assert_eq!(0, manifest.lsm().get_level(0).unwrap().tables_count());
    }
}
