use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};

use super::error::StorageError;

/// How the backing files are opened and mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Map existing files read-only. Writes fail with
    /// [`StorageError::ReadOnlyMap`].
    ReadOnly,
    /// Map existing files read-write. Every file must already have
    /// exactly its expected size.
    #[default]
    ReadWrite,
    /// Like `ReadWrite`, but missing files are created and short files
    /// are extended to their expected size before mapping.
    ReadWriteEx,
}

enum Backing {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Backing {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::ReadOnly(map) => map,
            Backing::ReadWrite(map) => map,
        }
    }

    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    /// Copies `src` into the mapping at `offset`.
    ///
    /// Takes `&self` so disjoint ranges can be written concurrently.
    /// Overlapping writers must be coordinated a layer up (the piece
    /// store holds a piece-granularity lock).
    fn write_at(&self, offset: usize, src: &[u8]) {
        if let Backing::ReadWrite(map) = self {
            debug_assert!(offset + src.len() <= map.len());
            unsafe {
                std::ptr::copy_nonoverlapping(
                    src.as_ptr(),
                    map.as_ptr().cast_mut().add(offset),
                    src.len(),
                );
            }
        }
    }
}

struct Region {
    base_offset: u64,
    path: PathBuf,
    backing: Backing,
}

impl Region {
    fn end(&self) -> u64 {
        self.base_offset + self.backing.len()
    }
}

/// A contiguous logical address space over a list of memory-mapped files.
///
/// Adjacent entries meet exactly: entry `i + 1` begins where entry `i`
/// ends, so every logical offset below [`size`](StorageMap::size) falls
/// into exactly one file.
pub struct StorageMap {
    regions: Vec<Region>,
    mode: OpenMode,
}

impl StorageMap {
    /// Maps every file in `layout` and assembles the logical address
    /// space in layout order.
    ///
    /// `layout` is an ordered list of `(path, expected_size)` pairs with
    /// sizes greater than zero. If any file cannot be mapped at exactly
    /// its expected size, every mapping established so far is released
    /// before the error is returned.
    pub fn open<P: AsRef<Path>>(
        layout: &[(P, u64)],
        mode: OpenMode,
    ) -> Result<Self, StorageError> {
        let mut regions = Vec::with_capacity(layout.len());
        let mut base_offset = 0u64;

        for (path, expected) in layout {
            let path = path.as_ref();
            if *expected == 0 {
                return Err(StorageError::InvalidLayout(format!(
                    "zero-length entry: {}",
                    path.display()
                )));
            }

            // An early return drops `regions`, unmapping everything
            // established so far.
            let backing = Self::map_file(path, *expected, mode)?;
            if backing.len() != *expected {
                return Err(StorageError::FileSizeMismatch {
                    path: path.to_path_buf(),
                    expected: *expected,
                    actual: backing.len(),
                });
            }

            regions.push(Region {
                base_offset,
                path: path.to_path_buf(),
                backing,
            });
            base_offset += expected;
        }

        tracing::debug!(files = regions.len(), bytes = base_offset, "storage map opened");

        Ok(Self { regions, mode })
    }

    fn map_file(path: &Path, expected: u64, mode: OpenMode) -> Result<Backing, StorageError> {
        let size_mismatch = |actual| StorageError::FileSizeMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        };

        match mode {
            OpenMode::ReadOnly => {
                let file = File::open(path)?;
                let actual = file.metadata()?.len();
                if actual != expected {
                    return Err(size_mismatch(actual));
                }
                Ok(Backing::ReadOnly(unsafe { Mmap::map(&file)? }))
            }
            OpenMode::ReadWrite => {
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                let actual = file.metadata()?.len();
                if actual != expected {
                    return Err(size_mismatch(actual));
                }
                Ok(Backing::ReadWrite(unsafe { MmapMut::map_mut(&file)? }))
            }
            OpenMode::ReadWriteEx => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let file = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(false)
                    .open(path)?;
                if file.metadata()?.len() != expected {
                    file.set_len(expected)?;
                }
                Ok(Backing::ReadWrite(unsafe { MmapMut::map_mut(&file)? }))
            }
        }
    }

    /// Total logical size in bytes.
    pub fn size(&self) -> u64 {
        self.regions.last().map(|r| r.end()).unwrap_or(0)
    }

    /// Number of mapped files.
    pub fn file_count(&self) -> usize {
        self.regions.len()
    }

    /// Path of the file backing entry `index`.
    pub fn file_path(&self, index: usize) -> Option<&Path> {
        self.regions.get(index).map(|r| r.path.as_path())
    }

    /// Resolves a logical offset to `(entry_index, intra_file_offset)`.
    ///
    /// Returns `None` when `offset` is at or past the end of the map.
    pub fn resolve(&self, offset: u64) -> Option<(usize, u64)> {
        let mut lo = 0usize;
        let mut hi = self.regions.len();

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let region = &self.regions[mid];
            if offset < region.base_offset {
                hi = mid;
            } else if offset >= region.end() {
                lo = mid + 1;
            } else {
                return Some((mid, offset - region.base_offset));
            }
        }

        None
    }

    /// Reads exactly `length` bytes starting at `offset` into a fresh
    /// buffer.
    ///
    /// The copy means the result is still valid after
    /// [`close`](StorageMap::close). Fails with
    /// [`StorageError::OutOfRange`] when the range does not lie entirely
    /// within the map.
    pub fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>, StorageError> {
        let out_of_range = || StorageError::OutOfRange {
            offset,
            length: length as u64,
        };

        if offset.checked_add(length as u64).ok_or_else(out_of_range)? > self.size() {
            return Err(out_of_range());
        }
        if length == 0 {
            return Ok(Vec::new());
        }

        let (mut index, inner) = self.resolve(offset).ok_or_else(out_of_range)?;
        let mut inner = inner as usize;
        let mut out = Vec::with_capacity(length);

        while out.len() < length {
            let slice = self.regions[index].backing.as_slice();
            let take = (length - out.len()).min(slice.len() - inner);
            out.extend_from_slice(&slice[inner..inner + take]);
            index += 1;
            inner = 0;
        }

        Ok(out)
    }

    /// Writes `data` at `offset`, returning the number of bytes written.
    ///
    /// Writes that run past the end of the map are silently clipped; a
    /// caller that must not lose bytes checks [`size`](StorageMap::size)
    /// first. Writes are immediately visible to concurrent readers of
    /// the same region.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<u64, StorageError> {
        if self.mode == OpenMode::ReadOnly {
            return Err(StorageError::ReadOnlyMap);
        }

        let size = self.size();
        if offset >= size || data.is_empty() {
            return Ok(0);
        }
        let writable = (data.len() as u64).min(size - offset) as usize;

        let (mut index, inner) = match self.resolve(offset) {
            Some(at) => at,
            None => return Ok(0),
        };
        let mut inner = inner as usize;
        let mut written = 0usize;

        while written < writable {
            let region = &self.regions[index];
            let take = (writable - written).min(region.backing.len() as usize - inner);
            region.backing.write_at(inner, &data[written..written + take]);
            written += take;
            index += 1;
            inner = 0;
        }

        Ok(written as u64)
    }

    /// Borrows `length` bytes at `offset` directly out of the mapping.
    ///
    /// The slice aliases the mapped file, so the range must lie within a
    /// single file entry; ranges that cross an entry boundary (or run
    /// past the end) fail with [`StorageError::OutOfRange`]. Use
    /// [`read`](StorageMap::read) for a copy that can span entries.
    pub fn view(&self, offset: u64, length: usize) -> Result<&[u8], StorageError> {
        let out_of_range = || StorageError::OutOfRange {
            offset,
            length: length as u64,
        };

        let (index, inner) = self.resolve(offset).ok_or_else(out_of_range)?;
        let slice = self.regions[index].backing.as_slice();
        let inner = inner as usize;
        if inner + length > slice.len() {
            return Err(out_of_range());
        }
        Ok(&slice[inner..inner + length])
    }

    /// Releases every mapping. Idempotent; the map is empty afterwards.
    pub fn close(&mut self) {
        if !self.regions.is_empty() {
            tracing::debug!(files = self.regions.len(), "storage map closed");
        }
        self.regions.clear();
    }
}

impl std::fmt::Debug for StorageMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageMap")
            .field("files", &self.regions.len())
            .field("size", &self.size())
            .field("mode", &self.mode)
            .finish()
    }
}
