//! Shared engine context
//!
//! Explicitly constructed registry handed to the buffer and both worker pools:
//! it owns the configuration, the table of mapped regions and the queues that
//! route work between components.

use crate::config::{BufferConfig, ConfigError};
use crate::evict::{EvictRequest, FlushWork};
use crate::fill::FillWork;
use crate::region::Region;
use crate::store::Store;
use crate::types::{PageAddr, PagebufError, PagebufResult, RegionId};
use crate::worker::WorkQueue;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct Context {
    config: BufferConfig,
    /// Mapped regions keyed by base address
    regions: RwLock<BTreeMap<PageAddr, Arc<Region>>>,
    next_region_id: AtomicU64,
    fill_queue: Arc<WorkQueue<FillWork>>,
    evict_queue: Arc<WorkQueue<EvictRequest>>,
    flush_queue: Arc<WorkQueue<FlushWork>>,
}

impl Context {
    pub fn new(config: BufferConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Ok(Arc::new(Context {
            config,
            regions: RwLock::new(BTreeMap::new()),
            next_region_id: AtomicU64::new(1),
            fill_queue: Arc::new(WorkQueue::new()),
            evict_queue: Arc::new(WorkQueue::new()),
            flush_queue: Arc::new(WorkQueue::new()),
        }))
    }

    #[inline]
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Queue consumed by the fill workers
    #[inline]
    pub fn fill_queue(&self) -> &Arc<WorkQueue<FillWork>> {
        &self.fill_queue
    }

    /// Queue consumed by the evict manager
    #[inline]
    pub fn evict_queue(&self) -> &Arc<WorkQueue<EvictRequest>> {
        &self.evict_queue
    }

    /// Queue consumed by the flushers
    #[inline]
    pub fn flush_queue(&self) -> &Arc<WorkQueue<FlushWork>> {
        &self.flush_queue
    }

    /// Adds a region covering `[base, base + len)`
    pub fn register_region(
        &self,
        base: PageAddr,
        len: usize,
        store: Option<Arc<dyn Store>>,
        store_offset: u64,
    ) -> PagebufResult<Arc<Region>> {
        let page_size = self.page_size();
        if base % page_size != 0 || len == 0 || len % page_size != 0 {
            return Err(PagebufError::Config(ConfigError::InvalidValue(format!(
                "region [{:#x}, +{}) is not a non-empty multiple of the page size {}",
                base, len, page_size
            ))));
        }

        let mut regions = self.regions.write();
        if regions.values().any(|r| r.overlaps(base, len)) {
            return Err(PagebufError::RegionOverlap(base, len));
        }
        let id = self.next_region_id.fetch_add(1, Ordering::Relaxed);
        let region = Arc::new(Region::new(id, base, len, page_size, store, store_offset));
        regions.insert(base, region.clone());
        tracing::debug!(region = id, base, len, "region registered");
        Ok(region)
    }

    /// Removes a region from the table
    pub fn deregister_region(&self, id: RegionId) -> Option<Arc<Region>> {
        let mut regions = self.regions.write();
        let base = regions.values().find(|r| r.id() == id)?.base();
        regions.remove(&base)
    }

    /// Region containing `addr`
    pub fn region_for(&self, addr: PageAddr) -> Option<Arc<Region>> {
        let regions = self.regions.read();
        regions
            .range(..=addr)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.contains(addr))
            .cloned()
    }

    pub fn num_active_regions(&self) -> usize {
        self.regions.read().len()
    }

    pub fn regions(&self) -> Vec<Arc<Region>> {
        self.regions.read().values().cloned().collect()
    }
}
