//! On-disk sorted tables: codec for the data/index stream pair and the
//! mmap-backed read cache.

pub mod cache;
pub mod codec;

pub use cache::{CacheManager, CacheUnit};
pub use codec::IndexEntry;
