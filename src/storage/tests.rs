use super::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn layout(temp: &TempDir, sizes: &[(&str, u64)]) -> Vec<(PathBuf, u64)> {
    sizes
        .iter()
        .map(|(name, size)| (temp.path().join(name), *size))
        .collect()
}

fn open_fresh(temp: &TempDir, sizes: &[(&str, u64)]) -> StorageMap {
    StorageMap::open(&layout(temp, sizes), OpenMode::ReadWriteEx).expect("test map creation")
}

#[test]
fn test_size_is_layout_sum() {
    let temp = TempDir::new().unwrap();
    let map = open_fresh(&temp, &[("a", 10), ("b", 5), ("c", 20)]);
    assert_eq!(map.size(), 35);
    assert_eq!(map.file_count(), 3);
}

#[test]
fn test_resolve_layout() {
    let temp = TempDir::new().unwrap();
    let map = open_fresh(&temp, &[("a", 10), ("b", 5), ("c", 20)]);

    assert_eq!(map.resolve(0), Some((0, 0)));
    assert_eq!(map.resolve(9), Some((0, 9)));
    assert_eq!(map.resolve(10), Some((1, 0)));
    assert_eq!(map.resolve(14), Some((1, 4)));
    assert_eq!(map.resolve(15), Some((2, 0)));
    assert_eq!(map.resolve(34), Some((2, 19)));
    assert_eq!(map.resolve(35), None);
}

#[test]
fn test_resolve_empty_map() {
    let map = StorageMap::open::<PathBuf>(&[], OpenMode::ReadWrite).unwrap();
    assert_eq!(map.size(), 0);
    assert_eq!(map.resolve(0), None);
}

#[test]
fn test_write_read_round_trip() {
    let temp = TempDir::new().unwrap();
    let map = open_fresh(&temp, &[("a", 64)]);

    let data: Vec<u8> = (0..32u8).collect();
    assert_eq!(map.write(16, &data).unwrap(), 32);
    assert_eq!(map.read(16, 32).unwrap(), data);
}

#[test]
fn test_write_read_across_file_boundary() {
    let temp = TempDir::new().unwrap();
    let map = open_fresh(&temp, &[("a", 10), ("b", 5), ("c", 20)]);

    let data: Vec<u8> = (0..20u8).collect();
    assert_eq!(map.write(5, &data).unwrap(), 20);
    assert_eq!(map.read(5, 20).unwrap(), data);

    // The concatenation of the backing files equals the logical content.
    let everything = map.read(0, 35).unwrap();
    let mut on_disk = Vec::new();
    for name in ["a", "b", "c"] {
        on_disk.extend_from_slice(&std::fs::read(temp.path().join(name)).unwrap());
    }
    assert_eq!(everything, on_disk);
}

#[test]
fn test_write_clips_at_end_of_map() {
    let temp = TempDir::new().unwrap();
    let map = open_fresh(&temp, &[("a", 8)]);

    assert_eq!(map.write(7, b"XY").unwrap(), 1);
    assert_eq!(map.read(7, 1).unwrap(), b"X");

    assert_eq!(map.write(8, b"XY").unwrap(), 0);
    assert_eq!(map.write(100, b"XY").unwrap(), 0);
}

#[test]
fn test_read_boundaries() {
    let temp = TempDir::new().unwrap();
    let map = open_fresh(&temp, &[("a", 8)]);

    assert!(map.read(8, 0).unwrap().is_empty());
    assert!(matches!(
        map.read(8, 1),
        Err(StorageError::OutOfRange { .. })
    ));
    assert!(matches!(
        map.read(0, 9),
        Err(StorageError::OutOfRange { .. })
    ));
}

#[test]
fn test_view_within_one_file() {
    let temp = TempDir::new().unwrap();
    let map = open_fresh(&temp, &[("a", 10), ("b", 10)]);
    map.write(0, &[7u8; 20]).unwrap();

    assert_eq!(map.view(2, 8).unwrap(), &[7u8; 8]);

    // A borrowed slice cannot span two mappings.
    assert!(matches!(
        map.view(8, 4),
        Err(StorageError::OutOfRange { .. })
    ));
}

#[test]
fn test_read_only_rejects_writes() {
    let temp = TempDir::new().unwrap();
    open_fresh(&temp, &[("a", 16)]);

    let map = StorageMap::open(&layout(&temp, &[("a", 16)]), OpenMode::ReadOnly).unwrap();
    assert!(matches!(map.write(0, b"x"), Err(StorageError::ReadOnlyMap)));
}

#[test]
fn test_size_mismatch_is_rejected() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("short"), b"abc").unwrap();

    let result = StorageMap::open(&layout(&temp, &[("short", 100)]), OpenMode::ReadWrite);
    assert!(matches!(
        result,
        Err(StorageError::FileSizeMismatch { expected: 100, actual: 3, .. })
    ));
}

#[test]
fn test_read_write_requires_existing_files() {
    let temp = TempDir::new().unwrap();
    let result = StorageMap::open(&layout(&temp, &[("missing", 10)]), OpenMode::ReadWrite);
    assert!(matches!(result, Err(StorageError::Io(_))));
}

#[test]
fn test_zero_length_entry_is_rejected() {
    let temp = TempDir::new().unwrap();
    let result = StorageMap::open(&layout(&temp, &[("a", 0)]), OpenMode::ReadWriteEx);
    assert!(matches!(result, Err(StorageError::InvalidLayout(_))));
}

#[test]
fn test_close_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let mut map = open_fresh(&temp, &[("a", 16)]);

    map.close();
    assert_eq!(map.size(), 0);
    map.close();
    assert_eq!(map.size(), 0);
}

#[test]
fn test_read_write_ex_extends_short_files() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("a"), b"abc").unwrap();

    let map = StorageMap::open(&layout(&temp, &[("a", 10)]), OpenMode::ReadWriteEx).unwrap();
    assert_eq!(map.size(), 10);
    assert_eq!(map.read(0, 3).unwrap(), b"abc");
}
