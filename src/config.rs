//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_WAL_TIME_INTERVAL: Duration = Duration::from_micros(100);
pub const DEFAULT_WAL_EVENT_CH_SIZE: usize = 1024;
pub const DEFAULT_WRITER_BUFFER_SIZE: usize = 4 * 1024 * 1024;

pub const DEFAULT_FLUSH_TIME_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_COMPACTION_TIME_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_MANIFEST_SYNC_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_MEMTABLE_THRESHOLD: i64 = 4 * 1024 * 1024;
pub const DEFAULT_QUEUE_HARD_LIMIT: usize = 16;
pub const DEFAULT_QUEUE_SOFT_LIMIT: usize = 8;

pub const DEFAULT_LEVEL0_MAX_SIZE_IN_BYTES: i64 = 64 * 1024 * 1024;
pub const DEFAULT_GROWTH_FACTOR: i32 = 10;

/// Configuration for [`crate::Storage`]. Zero/empty fields are replaced by
/// the defaults above when the engine opens, so callers only need to fill
/// in what they care about on top of `StorageOpts::default()`.
#[derive(Debug, Clone)]
pub struct StorageOpts {
    /// Root directory for data, manifest and WALs.
    pub directory: PathBuf,

    /// Soft byte limit after which the active memtable is sealed for flush.
    pub memtable_threshold: i64,
    /// Maximum number of memtables in the flush queue before writers block.
    pub queue_hard_limit: usize,
    /// Threshold for proactive flushing before the hard limit is hit.
    pub queue_soft_limit: usize,
    /// Flusher tick period.
    pub flush_time_interval: Duration,

    /// Enables the per-memtable write-ahead log.
    pub turn_on_memtable_wal: bool,
    pub memtable_wal_time_interval: Duration,
    pub memtable_wal_event_ch_size: usize,
    pub memtable_wal_writer_buffer_size: usize,

    /// Enables background compaction.
    pub turn_on_compaction: bool,
    /// Soft size limit for level 0 (in bytes). For level `l` the budget is
    /// `level0_max_size_in_bytes * max(l * growth_factor, 1)`.
    pub level0_max_size_in_bytes: i64,
    pub max_size_in_bytes_growth_factor: i32,
    pub compaction_time_interval: Duration,
    pub compaction_wal_time_interval: Duration,
    pub compaction_wal_event_ch_size: usize,
    pub compaction_wal_writer_buffer_size: usize,
}

impl Default for StorageOpts {
    fn default() -> StorageOpts {
        StorageOpts {
            directory: std::env::temp_dir(),
            memtable_threshold: DEFAULT_MEMTABLE_THRESHOLD,
            queue_hard_limit: DEFAULT_QUEUE_HARD_LIMIT,
            queue_soft_limit: DEFAULT_QUEUE_SOFT_LIMIT,
            flush_time_interval: DEFAULT_FLUSH_TIME_INTERVAL,
            turn_on_memtable_wal: false,
            memtable_wal_time_interval: DEFAULT_WAL_TIME_INTERVAL,
            memtable_wal_event_ch_size: DEFAULT_WAL_EVENT_CH_SIZE,
            memtable_wal_writer_buffer_size: DEFAULT_WRITER_BUFFER_SIZE,
            turn_on_compaction: false,
            level0_max_size_in_bytes: DEFAULT_LEVEL0_MAX_SIZE_IN_BYTES,
            max_size_in_bytes_growth_factor: DEFAULT_GROWTH_FACTOR,
            compaction_time_interval: DEFAULT_COMPACTION_TIME_INTERVAL,
            compaction_wal_time_interval: DEFAULT_WAL_TIME_INTERVAL,
            compaction_wal_event_ch_size: DEFAULT_WAL_EVENT_CH_SIZE,
            compaction_wal_writer_buffer_size: DEFAULT_WRITER_BUFFER_SIZE,
        }
    }
}

impl StorageOpts {
    /// Replaces zero-valued tunables with their defaults.
    pub(crate) fn normalized(mut self) -> StorageOpts {
        if self.memtable_threshold <= 0 {
            self.memtable_threshold = DEFAULT_MEMTABLE_THRESHOLD;
        }
        if self.queue_hard_limit == 0 {
            self.queue_hard_limit = DEFAULT_QUEUE_HARD_LIMIT;
        }
        if self.queue_soft_limit == 0 {
            self.queue_soft_limit = DEFAULT_QUEUE_SOFT_LIMIT;
        }
        if self.flush_time_interval.is_zero() {
            self.flush_time_interval = DEFAULT_FLUSH_TIME_INTERVAL;
        }
        if self.memtable_wal_time_interval.is_zero() {
            self.memtable_wal_time_interval = DEFAULT_WAL_TIME_INTERVAL;
        }
        if self.memtable_wal_event_ch_size == 0 {
            self.memtable_wal_event_ch_size = DEFAULT_WAL_EVENT_CH_SIZE;
        }
        if self.memtable_wal_writer_buffer_size == 0 {
            self.memtable_wal_writer_buffer_size = DEFAULT_WRITER_BUFFER_SIZE;
        }
        if self.level0_max_size_in_bytes <= 0 {
            self.level0_max_size_in_bytes = DEFAULT_LEVEL0_MAX_SIZE_IN_BYTES;
        }
        if self.max_size_in_bytes_growth_factor <= 0 {
            self.max_size_in_bytes_growth_factor = DEFAULT_GROWTH_FACTOR;
        }
        if self.compaction_time_interval.is_zero() {
            self.compaction_time_interval = DEFAULT_COMPACTION_TIME_INTERVAL;
        }
        if self.compaction_wal_time_interval.is_zero() {
            self.compaction_wal_time_interval = DEFAULT_WAL_TIME_INTERVAL;
        }
        if self.compaction_wal_event_ch_size == 0 {
            self.compaction_wal_event_ch_size = DEFAULT_WAL_EVENT_CH_SIZE;
        }
        if self.compaction_wal_writer_buffer_size == 0 {
            self.compaction_wal_writer_buffer_size = DEFAULT_WRITER_BUFFER_SIZE;
        }
        self
    }

    /// Directory holding the per-memtable WAL files.
    pub(crate) fn wal_dir(&self) -> PathBuf {
        self.directory.join("wal")
    }

    /// Directory holding the compaction journal.
    pub(crate) fn gc_dir(&self) -> PathBuf {
        self.directory.join("gc")
    }
}
