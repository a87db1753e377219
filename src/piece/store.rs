use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use parking_lot::RwLock;
use sha1::{Digest, Sha1};

use super::bitfield::Bitfield;
use super::block::{block_length, Block, BlockRequest, BLOCK_SIZE};
use crate::storage::{StorageError, StorageMap};

/// Verifies pieces and assembles blocks on top of a [`StorageMap`].
///
/// Each piece moves `Missing → Partial → Complete`; a `Complete` piece is
/// never demoted, and the client bitfield reflects exactly the complete
/// set. Block writes land directly in the map; the piece is hashed once
/// every block has arrived, and a mismatch resets the piece to `Missing`.
pub struct PieceStore {
    map: StorageMap,
    piece_length: u64,
    piece_hashes: Vec<[u8; 20]>,
    state: RwLock<StoreState>,
}

struct StoreState {
    bitfield: Bitfield,
    // Received block offsets per in-flight piece.
    partial: HashMap<u32, HashSet<u32>>,
}

impl PieceStore {
    /// Creates a store over an open map.
    ///
    /// `piece_hashes` come from the metainfo, one SHA-1 per piece; the
    /// final piece covers whatever of the map remains after the others.
    pub fn new(map: StorageMap, piece_length: u64, piece_hashes: Vec<[u8; 20]>) -> Self {
        let piece_count = piece_hashes.len();
        Self {
            map,
            piece_length,
            piece_hashes,
            state: RwLock::new(StoreState {
                bitfield: Bitfield::new(piece_count),
                partial: HashMap::new(),
            }),
        }
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.map.size()
    }

    /// Size of one piece (the final piece may be shorter).
    pub fn piece_size(&self, index: u32) -> u64 {
        let count = self.piece_hashes.len();
        if count == 0 || index as usize >= count {
            return 0;
        }
        if (index as usize) < count - 1 {
            return self.piece_length;
        }
        let remainder = self.map.size() % self.piece_length;
        if remainder == 0 {
            self.piece_length
        } else {
            remainder
        }
    }

    /// Snapshot of the verified pieces.
    pub fn client_bitfield(&self) -> Bitfield {
        self.state.read().bitfield.clone()
    }

    /// Returns true if every piece is verified.
    pub fn is_complete(&self) -> bool {
        self.state.read().bitfield.is_complete()
    }

    /// Reads a block out of the map.
    pub fn get_block(&self, request: &BlockRequest) -> Result<Block, StorageError> {
        self.check_bounds(request.piece_index, request.offset, request.length)?;

        let start = self.piece_length * request.piece_index as u64 + request.offset as u64;
        let data = self.map.read(start, request.length as usize)?;
        Ok(Block::new(
            request.piece_index,
            request.offset,
            Bytes::from(data),
        ))
    }

    /// Writes a block into the map and updates the piece accounting.
    ///
    /// Returns `true` iff this block completed its piece and the piece's
    /// SHA-1 matches the expected hash. On a mismatch the accounting for
    /// the piece is reset so its blocks can be fetched again. Blocks for
    /// already-complete pieces are ignored.
    pub fn put_block(&self, block: &Block) -> Result<bool, StorageError> {
        let index = block.piece_index;
        self.check_bounds(index, block.offset, block.data.len() as u32)?;

        let mut state = self.state.write();
        if state.bitfield.has(index as usize) {
            return Ok(false);
        }

        let start = self.piece_length * index as u64 + block.offset as u64;
        self.map.write(start, &block.data)?;

        let received = state.partial.entry(index).or_default();
        received.insert(block.offset);

        let piece_size = self.piece_size(index);
        let all_present = (0..piece_size)
            .step_by(BLOCK_SIZE as usize)
            .all(|offset| received.contains(&(offset as u32)));
        if !all_present {
            return Ok(false);
        }

        // Hash the assembled bytes as they landed in the map, under the
        // state lock so a concurrent writer cannot race the verdict.
        let assembled = self
            .map
            .read(self.piece_length * index as u64, piece_size as usize)?;
        if Sha1::digest(&assembled).as_slice() == self.piece_hashes[index as usize] {
            state.partial.remove(&index);
            state.bitfield.set(index as usize);
            tracing::debug!(piece = index, "piece complete");
            Ok(true)
        } else {
            state.partial.remove(&index);
            tracing::warn!(piece = index, "piece hash mismatch, dropping blocks");
            Ok(false)
        }
    }

    /// Block requests still needed for a piece, in sequential order.
    ///
    /// Empty when the piece is complete or the index is out of range.
    pub fn select_block(&self, piece_index: u32) -> Vec<BlockRequest> {
        let piece_size = self.piece_size(piece_index);
        if piece_size == 0 {
            return Vec::new();
        }

        let state = self.state.read();
        if state.bitfield.has(piece_index as usize) {
            return Vec::new();
        }
        let received = state.partial.get(&piece_index);

        let mut requests = Vec::new();
        let mut offset = 0u32;
        while (offset as u64) < piece_size {
            if received.map_or(true, |set| !set.contains(&offset)) {
                requests.push(BlockRequest::new(
                    piece_index,
                    offset,
                    block_length(piece_size, offset),
                ));
            }
            offset += BLOCK_SIZE;
        }

        requests
    }

    /// Re-hashes every piece against the map and seeds the bitfield with
    /// the ones already intact, returning how many verified.
    ///
    /// Used when a map is opened over existing content to resume.
    pub fn recheck(&self) -> Result<usize, StorageError> {
        let mut verified = 0usize;
        let mut state = self.state.write();

        for index in 0..self.piece_hashes.len() as u32 {
            let piece_size = self.piece_size(index);
            let assembled = self
                .map
                .read(self.piece_length * index as u64, piece_size as usize)?;
            if Sha1::digest(&assembled).as_slice() == self.piece_hashes[index as usize] {
                state.bitfield.set(index as usize);
                state.partial.remove(&index);
                verified += 1;
            }
        }

        tracing::debug!(
            verified,
            total = self.piece_hashes.len(),
            "recheck complete"
        );
        Ok(verified)
    }

    fn check_bounds(&self, index: u32, offset: u32, length: u32) -> Result<(), StorageError> {
        if index as usize >= self.piece_hashes.len() {
            return Err(StorageError::InvalidPieceIndex(index));
        }
        if offset as u64 + length as u64 > self.piece_size(index) {
            return Err(StorageError::InvalidBlockOffset {
                piece: index,
                offset,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for PieceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PieceStore")
            .field("pieces", &self.piece_hashes.len())
            .field("piece_length", &self.piece_length)
            .finish()
    }
}
