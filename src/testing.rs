//! Test helpers shared by the buffer and engine suites

use crate::config::BufferConfig;
use crate::fault::{FaultError, FaultHandler, FaultResult};
use crate::types::PageAddr;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Content and protection of one installed page
#[derive(Debug, Clone)]
pub struct RecordedPage {
    pub data: Vec<u8>,
    pub write_protected: bool,
}

/// Fault handler keeping installed pages in a map instead of real memory
#[derive(Default)]
pub struct RecordingFaults {
    pages: Mutex<HashMap<PageAddr, RecordedPage>>,
    pub installs: AtomicU64,
    pub releases: AtomicU64,
    pub protects: AtomicU64,
    pub unprotects: AtomicU64,
}

impl RecordingFaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self, addr: PageAddr) -> Option<RecordedPage> {
        self.pages.lock().get(&addr).cloned()
    }

    pub fn is_resident(&self, addr: PageAddr) -> bool {
        self.pages.lock().contains_key(&addr)
    }

    pub fn resident_count(&self) -> usize {
        self.pages.lock().len()
    }

    /// Simulates the application writing to a resident page
    pub fn write(&self, addr: PageAddr, offset: usize, bytes: &[u8]) {
        let mut pages = self.pages.lock();
        let page = pages.get_mut(&addr).expect("writing to a non-resident page");
        assert!(!page.write_protected, "writing to a write protected page");
        page.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn count(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }
}

impl FaultHandler for RecordingFaults {
    fn install(&self, page: PageAddr, data: &[u8], write_protect: bool) -> FaultResult<()> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        self.pages.lock().insert(
            page,
            RecordedPage {
                data: data.to_vec(),
                write_protected: write_protect,
            },
        );
        Ok(())
    }

    fn write_protect(&self, page: PageAddr, _len: usize) -> FaultResult<()> {
        self.protects.fetch_add(1, Ordering::SeqCst);
        match self.pages.lock().get_mut(&page) {
            Some(p) => {
                p.write_protected = true;
                Ok(())
            }
            None => Err(FaultError::OutOfRange(page, 0)),
        }
    }

    fn write_unprotect(&self, page: PageAddr, _len: usize) -> FaultResult<()> {
        self.unprotects.fetch_add(1, Ordering::SeqCst);
        match self.pages.lock().get_mut(&page) {
            Some(p) => {
                p.write_protected = false;
                Ok(())
            }
            None => Err(FaultError::OutOfRange(page, 0)),
        }
    }

    fn read_page(&self, page: PageAddr, buf: &mut [u8]) -> FaultResult<()> {
        match self.pages.lock().get(&page) {
            Some(p) => {
                buf.copy_from_slice(&p.data);
                Ok(())
            }
            None => Err(FaultError::OutOfRange(page, buf.len())),
        }
    }

    fn release(&self, page: PageAddr, len: usize) -> FaultResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        match self.pages.lock().remove(&page) {
            Some(_) => Ok(()),
            None => Err(FaultError::OutOfRange(page, len)),
        }
    }
}

/// Small single-worker configuration with background loops off
pub fn small_config(buffer_size: usize) -> BufferConfig {
    BufferConfig {
        buffer_size,
        num_fillers: 1,
        num_evictors: 1,
        monitor_freq_secs: 0,
        adapt_freq_secs: 0,
        ..BufferConfig::default()
    }
}
