// Store functionality tests

use super::*;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

#[test]
fn test_file_store_pread_pwrite() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileStore::create(temp_dir.path().join("region.dat"), 4 * 4096).unwrap();

    // Write data at specific offsets
    let data1 = b"Hello";
    let data2 = b"World";
    assert_eq!(store.write_to_store(data1, 0).unwrap(), data1.len());
    assert_eq!(store.write_to_store(data2, 4096).unwrap(), data2.len());

    let mut buf1 = [0u8; 5];
    let mut buf2 = [0u8; 5];
    assert_eq!(store.read_from_store(&mut buf1, 0).unwrap(), 5);
    assert_eq!(store.read_from_store(&mut buf2, 4096).unwrap(), 5);
    assert_eq!(&buf1, data1);
    assert_eq!(&buf2, data2);
}

#[test]
fn test_file_store_short_read_at_end() {
    let temp_dir = TempDir::new().unwrap();
    let store = FileStore::create(temp_dir.path().join("short.dat"), 100).unwrap();

    let mut buf = [0xffu8; 4096];
    assert_eq!(store.read_from_store(&mut buf, 0).unwrap(), 100);
    assert!(buf[..100].iter().all(|b| *b == 0));
    assert_eq!(store.read_from_store(&mut buf, 8192).unwrap(), 0);
}

#[test]
fn test_file_store_reopen_sees_data() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("persist.dat");
    {
        let store = FileStore::create(&path, 4096).unwrap();
        store.write_to_store(b"durable", 10).unwrap();
        store.sync().unwrap();
    }

    let store = FileStore::open(&path).unwrap();
    assert_eq!(store.path(), path.as_path());
    let mut buf = [0u8; 7];
    store.read_from_store(&mut buf, 10).unwrap();
    assert_eq!(&buf, b"durable");
}

#[test]
fn test_file_store_open_missing() {
    let temp_dir = TempDir::new().unwrap();
    let result = FileStore::open(temp_dir.path().join("missing.dat"));
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[test]
fn test_file_store_concurrent_pages() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::create(temp_dir.path().join("conc.dat"), 0).unwrap());

    let handles: Vec<_> = (0..8u8)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || {
                let page = [i; 4096];
                store.write_to_store(&page, i as u64 * 4096).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut page = [0u8; 4096];
    for i in 0..8u8 {
        store.read_from_store(&mut page, i as u64 * 4096).unwrap();
        assert!(page.iter().all(|b| *b == i));
    }
}

#[test]
fn test_memory_store_counts_and_grows() {
    let store = MemoryStore::new();
    assert!(store.is_empty());

    let mut buf = [1u8; 16];
    assert_eq!(store.read_from_store(&mut buf, 0).unwrap(), 0);
    assert_eq!(store.write_to_store(&[7u8; 16], 32).unwrap(), 16);
    assert_eq!(store.len(), 48);

    assert_eq!(store.read_from_store(&mut buf, 40).unwrap(), 8);
    assert_eq!(&buf[..8], &[7u8; 8]);
    assert_eq!(store.snapshot(30, 4), vec![0, 0, 7, 7]);

    assert_eq!(store.read_count(), 2);
    assert_eq!(store.write_count(), 1);
}

#[test]
fn test_pwrite_short_counts_are_resumed() {
    let mut calls = Vec::new();
    let written = file::write_all_at(&[7u8; 10], 100, |chunk, at| {
        calls.push((chunk.len(), at));
        chunk.len().min(4) as isize
    })
    .unwrap();

    assert_eq!(written, 10);
    assert_eq!(calls, vec![(10, 100), (6, 104), (2, 108)]);
}

#[test]
fn test_pwrite_without_progress_fails() {
    let mut calls = 0;
    let result = file::write_all_at(&[1u8; 16], 0, |_, _| {
        calls += 1;
        0
    });

    assert!(matches!(result, Err(StoreError::SystemError(libc::EIO, _))));
    assert_eq!(calls, 1);
}

#[test]
fn test_store_error_display() {
    let err = StoreError::SystemError(5, "pwrite failed".to_string());
    assert_eq!(err.to_string(), "System error (errno 5): pwrite failed");

    let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
    let err: StoreError = io_err.into();
    assert!(matches!(err, StoreError::IoError(_)));
}
