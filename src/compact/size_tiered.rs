//! Size-tiered compaction: when a level's total size exceeds its budget,
//! every table in the level is k-way merged into a single SST at the
//! next level.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use log::info;

use crate::compact::{CompactionEvent, CompactionStrategy};
use crate::env::file_system::FileManager;
use crate::manifest::{Manifest, SstMeta};
use crate::sstable::{codec, CacheManager};
use crate::types::{Key, Payload, Value};
use crate::wal::Wal;
use crate::Result;

#[derive(Debug, Clone)]
pub struct SizeTieredOpts {
    /// Soft size limit for level 0 (in bytes).
    pub level0_max_size_in_bytes: i64,
    /// Budget multiplier: level `l` may hold
    /// `level0_max_size_in_bytes * max(l * growth_factor, 1)` bytes.
    pub max_size_in_bytes_growth_factor: i32,
}

pub struct SizeTieredCompaction {
    pub opts: SizeTieredOpts,
}

impl SizeTieredCompaction {
    fn budget(&self, level: usize) -> i64 {
        let factor = (level as i64 * self.opts.max_size_in_bytes_growth_factor as i64).max(1);
        self.opts.level0_max_size_in_bytes * factor
    }
}

impl<K: Key, V: Value> CompactionStrategy<K, V> for SizeTieredCompaction {
    /// Merges the whole of `level_no` into one table at `level_no + 1`,
    /// journaling each file-level step, then recurses: installing the
    /// merged table may have pushed the next level over its own budget.
    fn compact(
        &self,
        manifest: &Manifest,
        cache: &CacheManager<K, V>,
        wal: &Wal<CompactionEvent>,
        level_no: usize,
    ) -> Result<()> {
        let lsm = manifest.lsm();
        let level = match lsm.get_level(level_no) {
            Some(level) => level,
            None => return Ok(()),
        };
        if level.size_in_bytes() <= self.budget(level_no) {
            return Ok(());
        }

        // snapshot the level: ids ascending so later merge inputs are newer
        let tables = level.tables();
        if tables.is_empty() {
            return Ok(());
        }
        let mut ids: Vec<u64> = tables.keys().copied().collect();
        ids.sort_unstable();
        info!(
            "compacting level {}: {} tables, {} bytes over budget {}",
            level_no,
            ids.len(),
            level.size_in_bytes(),
            self.budget(level_no)
        );

        let mut lists = Vec::with_capacity(ids.len());
        let mut total_size = 0i64;
        for id in &ids {
            let meta = &tables[id];
            // a corrupt table aborts the iteration before any manifest change
            lists.push(cache.get_all(&meta.db_path, &meta.index_path)?);
            total_size += meta.size_in_bytes;
        }
        let merged = merge_sorted(lists);

        let next_level = lsm.ensure_level(level_no + 1);
        let next_id = next_level.next_id();
        let db_path = manifest.format_db_path(level_no + 1, next_id);
        let index_path = manifest.format_index_path(level_no + 1, next_id);

        let manager = FileManager::global();
        let mut db_writer = manager.open_for_write(&db_path)?;
        let mut index_writer = manager.open_for_write(&index_path)?;

        wal.append(CompactionEvent::WriteStarted(db_path.clone()));
        codec::encode(db_writer.file_mut(), index_writer.file_mut(), &merged)?;
        wal.append(CompactionEvent::WriteCompleted(db_path.clone()));

        db_writer.sync()?;
        index_writer.sync()?;

        next_level.set_sstable(
            next_id,
            SstMeta {
                db_path,
                index_path,
                size_in_bytes: total_size,
            },
        );
        level.clear(&ids);

        // journaled deletes: data files first, then index files. Readers
        // still holding the old mappings keep them until they drop.
        for id in &ids {
            let meta = &tables[id];
            wal.append(CompactionEvent::DeleteStarted(meta.db_path.clone()));
            manager.delete(&meta.db_path)?;
            cache.evict(&meta.db_path);
            wal.append(CompactionEvent::DeleteCompleted(meta.db_path.clone()));
        }
        for id in &ids {
            let meta = &tables[id];
            wal.append(CompactionEvent::DeleteStarted(meta.index_path.clone()));
            manager.delete(&meta.index_path)?;
            wal.append(CompactionEvent::DeleteCompleted(meta.index_path.clone()));
        }

        self.compact(manifest, cache, wal, level_no + 1)
    }
}

struct HeapEntry<K: Ord> {
    key: K,
    list: usize,
    pos: usize,
}

impl<K: Ord> PartialEq for HeapEntry<K> {
    fn eq(&self, other: &HeapEntry<K>) -> bool {
        self.key == other.key && self.list == other.list
    }
}

impl<K: Ord> Eq for HeapEntry<K> {}

impl<K: Ord> PartialOrd for HeapEntry<K> {
    fn partial_cmp(&self, other: &HeapEntry<K>) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for HeapEntry<K> {
    fn cmp(&self, other: &HeapEntry<K>) -> std::cmp::Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.list.cmp(&other.list))
    }
}

/// K-way merge of per-table sorted payload lists. Lists must be ordered
/// oldest to newest: on duplicate keys the entry from the higher list
/// index replaces the earlier one, so the newest value (or tombstone)
/// survives and the output is strictly sorted. Tombstones are preserved.
fn merge_sorted<K: Key, V: Value>(lists: Vec<Vec<Payload<K, V>>>) -> Vec<Payload<K, V>> {
    let mut heap = BinaryHeap::new();
    let mut key_count = 0;
    for (list, payloads) in lists.iter().enumerate() {
        key_count += payloads.len();
        if let Some(first) = payloads.first() {
            heap.push(Reverse(HeapEntry {
                key: first.key.clone(),
                list,
                pos: 0,
            }));
        }
    }

    let mut merged: Vec<Payload<K, V>> = Vec::with_capacity(key_count);
    while let Some(Reverse(entry)) = heap.pop() {
        let payload = lists[entry.list][entry.pos].clone();
        match merged.last_mut() {
            Some(last) if last.key == payload.key => *last = payload,
            _ => merged.push(payload),
        }
        let next = entry.pos + 1;
        if next < lists[entry.list].len() {
            heap.push(Reverse(HeapEntry {
                key: lists[entry.list][next].key.clone(),
                list: entry.list,
                pos: next,
            }));
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IntKey, IntValue};

    fn payload(key: i64, value: i32) -> Payload<IntKey, IntValue> {
        Payload {
            key: IntKey(key),
            value: IntValue::new(value),
        }
    }

    #[test]
    fn test_budget_growth() {
        let strategy = SizeTieredCompaction {
            opts: SizeTieredOpts {
                level0_max_size_in_bytes: 2048,
                max_size_in_bytes_growth_factor: 2,
            },
        };
        assert_eq!(2048, strategy.budget(0));
        assert_eq!(2048 * 2, strategy.budget(1));
        assert_eq!(2048 * 4, strategy.budget(2));
    }

    #[test]
    fn test_merge_interleaves_sorted_lists() {
        let merged = merge_sorted(vec![
            vec![payload(1, 1), payload(4, 4), payload(7, 7)],
            vec![payload(2, 2), payload(5, 5)],
            vec![payload(0, 0), payload(9, 9)],
        ]);
        let keys: Vec<i64> = merged.iter().map(|p| p.key.0).collect();
        assert_eq!(vec![0, 1, 2, 4, 5, 7, 9], keys);
    }

    #[test]
    fn test_merge_newest_wins_on_duplicate_keys() {
        // list index 1 is the newer table
        let merged = merge_sorted(vec![
            vec![payload(1, 10), payload(2, 20)],
            vec![payload(2, 99)],
        ]);
        assert_eq!(2, merged.len());
        assert_eq!(10, merged[0].value.v);
        assert_eq!(99, merged[1].value.v);
    }

    #[test]
    fn test_merge_preserves_tombstones() {
        let mut dead = payload(3, 3);
        dead.value.mark_deleted();
        let merged = merge_sorted(vec![vec![payload(3, 3)], vec![dead]]);
        assert_eq!(1, merged.len());
        assert!(merged[0].value.is_deleted());
    }

    #[test]
    fn test_merge_empty_input() {
        let merged: Vec<Payload<IntKey, IntValue>> = merge_sorted(vec![vec![], vec![]]);
        assert!(merged.is_empty());
    }
}
