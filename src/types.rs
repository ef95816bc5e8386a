//! Key/value capability contracts and the concrete types shipped with the
//! engine.

use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Capabilities the engine requires of a key: total order, equality,
/// hashing, and a deterministic serialized form for SST/WAL records.
pub trait Key:
    Ord + Eq + Hash + Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> Key for T where
    T: Ord + Eq + Hash + Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// Capabilities the engine requires of a value: a byte-cost estimate for
/// memtable accounting and an inline tombstone bit.
pub trait Value:
    Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    fn size_in_bytes(&self) -> u64;
    fn is_deleted(&self) -> bool;
    fn mark_deleted(&mut self);
}

/// A key-value pair as written to an SST data stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload<K, V> {
    pub key: K,
    pub value: V,
}

/// Outcome of a point lookup against a memtable or a single SST. A
/// tombstone is a terminal negative: the caller must not consult older
/// tables once it sees `Deleted`.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    Found(V),
    Deleted,
    Missing,
}

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct IntKey(pub i64);

#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StringKey(pub String);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntValue {
    pub v: i32,
    deleted: bool,
}

impl IntValue {
    pub fn new(v: i32) -> IntValue {
        IntValue { v, deleted: false }
    }
}

impl Value for IntValue {
    fn size_in_bytes(&self) -> u64 {
        4
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn mark_deleted(&mut self) {
        self.deleted = true;
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringValue {
    pub v: String,
    deleted: bool,
}

impl StringValue {
    pub fn new(v: impl Into<String>) -> StringValue {
        StringValue {
            v: v.into(),
            deleted: false,
        }
    }
}

impl Value for StringValue {
    fn size_in_bytes(&self) -> u64 {
        self.v.len() as u64
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn mark_deleted(&mut self) {
        self.deleted = true;
    }
}
