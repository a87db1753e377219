use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file size mismatch for {path}: expected {expected}, found {actual}")]
    FileSizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    #[error("range of {length} bytes at offset {offset} is out of bounds")]
    OutOfRange { offset: u64, length: u64 },

    #[error("map is read-only")]
    ReadOnlyMap,

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    #[error("invalid block offset: piece {piece}, offset {offset}")]
    InvalidBlockOffset { piece: u32, offset: u32 },
}
