use bytes::Bytes;

/// A set of piece indices, packed one bit per piece.
///
/// Bits are numbered from the high bit of the first byte, matching the
/// wire encoding of the `Bitfield` peer message. Only indices below the
/// piece count are representable; out-of-range operations are no-ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: usize,
}

impl Bitfield {
    /// Creates an empty bitfield for `piece_count` pieces.
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
            piece_count,
        }
    }

    /// Creates a bitfield with every piece set.
    pub fn full(piece_count: usize) -> Self {
        let mut bf = Self {
            bits: vec![0xFF; piece_count.div_ceil(8)],
            piece_count,
        };
        bf.clear_spare_bits();
        bf
    }

    /// Creates a bitfield from wire bytes, resized to `piece_count`.
    pub fn from_bytes(bytes: Bytes, piece_count: usize) -> Self {
        let mut bits = bytes.to_vec();
        bits.resize(piece_count.div_ceil(8), 0);

        let mut bf = Self { bits, piece_count };
        bf.clear_spare_bits();
        bf
    }

    pub fn has(&self, index: usize) -> bool {
        if index >= self.piece_count {
            return false;
        }
        (self.bits[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    pub fn set(&mut self, index: usize) {
        if index < self.piece_count {
            self.bits[index / 8] |= 1 << (7 - index % 8);
        }
    }

    pub fn clear(&mut self, index: usize) {
        if index < self.piece_count {
            self.bits[index / 8] &= !(1 << (7 - index % 8));
        }
    }

    /// Number of pieces in the set.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Total number of pieces the field can represent.
    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    /// Returns true if every piece is set.
    pub fn is_complete(&self) -> bool {
        self.count() == self.piece_count
    }

    /// Smallest index in the set.
    pub fn first_set(&self) -> Option<usize> {
        for (byte_index, &byte) in self.bits.iter().enumerate() {
            if byte != 0 {
                let index = byte_index * 8 + byte.leading_zeros() as usize;
                return (index < self.piece_count).then_some(index);
            }
        }
        None
    }

    /// Adds every piece of `other` to this set.
    pub fn union_with(&mut self, other: &Bitfield) {
        debug_assert_eq!(self.piece_count, other.piece_count);
        for (dst, src) in self.bits.iter_mut().zip(&other.bits) {
            *dst |= src;
        }
        self.clear_spare_bits();
    }

    /// Pieces in this set that are not in `other`.
    pub fn difference(&self, other: &Bitfield) -> Bitfield {
        debug_assert_eq!(self.piece_count, other.piece_count);
        let bits = self
            .bits
            .iter()
            .zip(&other.bits)
            .map(|(a, b)| a & !b)
            .collect();
        let mut bf = Bitfield {
            bits,
            piece_count: self.piece_count,
        };
        bf.clear_spare_bits();
        bf
    }

    /// Raw wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Owned wire bytes.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    // Bits past the piece count in the last byte must stay zero or
    // union/difference/count would observe phantom pieces.
    fn clear_spare_bits(&mut self) {
        let spare = self.bits.len() * 8 - self.piece_count;
        if spare > 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= 0xFFu8 << spare;
            }
        }
    }
}
