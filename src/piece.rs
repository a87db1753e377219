//! Piece bookkeeping on top of the storage map.
//!
//! Torrent content is divided into fixed-size pieces, each with a known
//! SHA-1 hash, and pieces are transferred as 16 KiB blocks. This module
//! owns that accounting:
//!
//! - [`Bitfield`] - Which pieces a side of a connection has
//! - [`Block`] / [`BlockRequest`] - The transfer unit and its address
//! - [`PieceStore`] - Block assembly, hash verification, and the client
//!   bitfield, reading and writing through a [`StorageMap`]
//!
//! [`StorageMap`]: crate::storage::StorageMap

mod bitfield;
mod block;
mod store;

pub use bitfield::Bitfield;
pub use block::{block_count, block_length, Block, BlockRequest, BLOCK_SIZE};
pub use store::PieceStore;
