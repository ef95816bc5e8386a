//! An embeddable LSM-tree storage engine.
//!
//! Writes land in an in-memory [`memtable::Memtable`]; full memtables are
//! sealed and queued for a background flusher that persists them as sorted
//! tables (SSTs) at level 0. A size-tiered compactor merges overflowing
//! levels downwards. Durability comes from per-memtable write-ahead logs
//! and a compaction journal, both replayed on startup.

pub mod compact;
pub mod config;
pub mod env;
pub mod error;
mod ioutils;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod storage;
mod task;
pub mod types;
pub mod wal;

pub type Result<T> = std::result::Result<T, error::StrataError>;

pub use config::StorageOpts;
pub use error::StrataError;
pub use storage::Storage;
pub use types::{IntKey, IntValue, Key, StringKey, StringValue, Value};
