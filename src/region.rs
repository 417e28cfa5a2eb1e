//! Mapped regions
//!
//! A region is a page-aligned address range whose content is served from an
//! optional backing store. Regions without a store hold scratch pages: they
//! fill with zeroes and are never written back.

use crate::store::Store;
use crate::types::{PageAddr, RegionId};
use std::fmt;
use std::sync::Arc;

pub struct Region {
    id: RegionId,
    base: PageAddr,
    len: usize,
    page_size: usize,
    store: Option<Arc<dyn Store>>,
    /// Store offset that corresponds to `base`
    store_offset: u64,
}

impl Region {
    pub fn new(
        id: RegionId,
        base: PageAddr,
        len: usize,
        page_size: usize,
        store: Option<Arc<dyn Store>>,
        store_offset: u64,
    ) -> Self {
        assert!(page_size.is_power_of_two(), "page size must be a power of two");
        assert_eq!(base % page_size, 0, "region base must be page aligned");
        Self {
            id,
            base,
            len,
            page_size,
            store,
            store_offset,
        }
    }

    #[inline]
    pub fn id(&self) -> RegionId {
        self.id
    }

    #[inline]
    pub fn base(&self) -> PageAddr {
        self.base
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last address of the region
    #[inline]
    pub fn end(&self) -> PageAddr {
        self.base + self.len
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    #[inline]
    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }

    #[inline]
    pub fn contains(&self, addr: PageAddr) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// Rounds `addr` down to the start of its page
    #[inline]
    pub fn page_align(&self, addr: PageAddr) -> PageAddr {
        addr & !(self.page_size - 1)
    }

    /// Byte offset in the store backing the page at `page`
    #[inline]
    pub fn store_offset(&self, page: PageAddr) -> u64 {
        debug_assert!(self.contains(page));
        self.store_offset + (page - self.base) as u64
    }

    /// Returns true if the two address ranges intersect
    pub fn overlaps(&self, base: PageAddr, len: usize) -> bool {
        base < self.end() && self.base < base + len
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id)
            .field("base", &format_args!("{:#x}", self.base))
            .field("len", &self.len)
            .field("page_size", &self.page_size)
            .field("has_store", &self.store.is_some())
            .field("store_offset", &self.store_offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_offsets_and_alignment() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let region = Region::new(7, 0x40000, 16 * 4096, 4096, Some(store), 8192);

        assert!(region.contains(0x40000));
        assert!(region.contains(0x40000 + 16 * 4096 - 1));
        assert!(!region.contains(0x40000 + 16 * 4096));
        assert_eq!(region.page_align(0x41234), 0x41000);
        assert_eq!(region.store_offset(0x40000), 8192);
        assert_eq!(region.store_offset(0x42000), 8192 + 0x2000);
    }

    #[test]
    fn test_overlaps() {
        let region = Region::new(1, 0x10000, 0x4000, 4096, None, 0);
        assert!(region.overlaps(0x13000, 0x1000));
        assert!(region.overlaps(0xf000, 0x2000));
        assert!(!region.overlaps(0x14000, 0x1000));
        assert!(!region.overlaps(0xf000, 0x1000));
    }

    #[test]
    #[should_panic(expected = "page aligned")]
    fn test_unaligned_base_panics() {
        Region::new(1, 0x10010, 0x4000, 4096, None, 0);
    }
}
