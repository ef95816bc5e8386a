use std::io;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum StrataError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("key not found")]
    KeyNotFound,

    /// Cache-layer signal for a tombstoned key; converted to
    /// [`StrataError::KeyNotFound`] at the store boundary.
    #[error("key deleted")]
    KeyDeleted,

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to decode: {0}")]
    Decode(String),

    #[error("index out of bound: offset={offset} size={size} mapped={mapped}")]
    IndexOutOfBound {
        offset: u64,
        size: u64,
        mapped: usize,
    },

    #[error("wal disabled")]
    WalDisabled,
}
