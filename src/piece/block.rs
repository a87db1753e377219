use bytes::Bytes;

/// Standard block size (16 KiB).
pub const BLOCK_SIZE: u32 = 16384;

/// Address of a block within a torrent: piece index, byte offset into
/// the piece, and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub piece_index: u32,
    pub offset: u32,
    pub length: u32,
}

impl BlockRequest {
    pub fn new(piece_index: u32, offset: u32, length: u32) -> Self {
        Self {
            piece_index,
            offset,
            length,
        }
    }
}

/// A block of piece data in transit.
#[derive(Debug, Clone)]
pub struct Block {
    pub piece_index: u32,
    pub offset: u32,
    pub data: Bytes,
}

impl Block {
    pub fn new(piece_index: u32, offset: u32, data: Bytes) -> Self {
        Self {
            piece_index,
            offset,
            data,
        }
    }

    /// The request this block answers.
    pub fn request(&self) -> BlockRequest {
        BlockRequest {
            piece_index: self.piece_index,
            offset: self.offset,
            length: self.data.len() as u32,
        }
    }
}

/// Number of blocks in a piece of the given length.
pub fn block_count(piece_length: u64) -> u32 {
    piece_length.div_ceil(BLOCK_SIZE as u64) as u32
}

/// Length of the block starting at `offset` in a piece of the given
/// length (the final block may be short).
pub fn block_length(piece_length: u64, offset: u32) -> u32 {
    piece_length.saturating_sub(offset as u64).min(BLOCK_SIZE as u64) as u32
}
