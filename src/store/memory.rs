//! In-memory store
//!
//! Holds region content in a growable byte vector. Useful as a stand-in for
//! remote object stores and for exercising the write-back pipeline.

use crate::store::error::StoreResult;
use crate::store::interface::Store;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct MemoryStore {
    data: Mutex<Vec<u8>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// Create a store holding `bytes`
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        MemoryStore {
            data: Mutex::new(bytes),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of read calls served
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of write calls served
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Current length of the stored content
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of `len` bytes at `offset`, zero-filled past the end
    pub fn snapshot(&self, offset: u64, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        let data = self.data.lock();
        let start = (offset as usize).min(data.len());
        let end = (start + len).min(data.len());
        out[..end - start].copy_from_slice(&data[start..end]);
        out
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn read_from_store(&self, buf: &mut [u8], offset: u64) -> StoreResult<usize> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let data = self.data.lock();
        let start = offset as usize;
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_to_store(&self, buf: &[u8], offset: u64) -> StoreResult<usize> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut data = self.data.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }
}
