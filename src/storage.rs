//! Memory-mapped file storage.
//!
//! A torrent's payload is a single logical byte sequence split across one
//! or more files on disk. This module maps every file into memory and
//! presents the concatenation as one contiguous address space with random
//! access reads and writes at arbitrary byte offsets.
//!
//! # Components
//!
//! - [`StorageMap`] - The mapped, position-indexed file concatenation
//! - [`OpenMode`] - How the backing files are opened and mapped
//! - [`StorageError`] - Everything that can go wrong at this layer
//!
//! # Examples
//!
//! ```no_run
//! use riptide::storage::{OpenMode, StorageMap};
//!
//! # fn example() -> Result<(), riptide::storage::StorageError> {
//! let layout = [("downloads/a.bin", 10_000u64), ("downloads/b.bin", 5_000)];
//! let map = StorageMap::open(&layout, OpenMode::ReadWriteEx)?;
//!
//! assert_eq!(map.size(), 15_000);
//!
//! // Writes and reads address the logical concatenation; this write
//! // lands partly in a.bin and partly in b.bin.
//! map.write(9_998, b"spanning")?;
//! let back = map.read(9_998, 8)?;
//! assert_eq!(&back, b"spanning");
//! # Ok(())
//! # }
//! ```
//!
//! Reads copy out of the mapping so the returned buffer outlives the map.
//! [`StorageMap::view`] is the zero-copy alternative; its borrow is tied
//! to the map itself.

mod error;
mod map;

pub use error::StorageError;
pub use map::{OpenMode, StorageMap};

#[cfg(test)]
mod tests;
