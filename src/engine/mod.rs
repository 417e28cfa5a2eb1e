//! Page engine
//!
//! Owns the context, the buffer and both worker pools. Regions are mapped
//! and unmapped through it and the fault interception facility reports
//! accesses to non-resident pages through [`PageEngine::handle_fault`].

use crate::buffer::{Buffer, MemoryProbe, ProcMeminfo};
use crate::config::BufferConfig;
use crate::context::Context;
use crate::evict::EvictManager;
use crate::fault::FaultHandler;
use crate::fill::FillWorkers;
use crate::region::Region;
use crate::store::Store;
use crate::types::{PageAddr, PagebufError, PagebufResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

pub struct PageEngine {
    ctx: Arc<Context>,
    buffer: Arc<Buffer>,
    fillers: FillWorkers,
    evictor: EvictManager,
    /// Serializes map, unmap and shutdown
    control: Mutex<bool>,
}

impl PageEngine {
    /// Builds an engine whose resizer reads `/proc/meminfo`
    pub fn new(config: BufferConfig, fault: Arc<dyn FaultHandler>) -> PagebufResult<Self> {
        Self::with_memory_probe(config, fault, Arc::new(ProcMeminfo::new()))
    }

    pub fn with_memory_probe(
        config: BufferConfig,
        fault: Arc<dyn FaultHandler>,
        probe: Arc<dyn MemoryProbe>,
    ) -> PagebufResult<Self> {
        let ctx = Context::new(config)?;
        let buffer = Arc::new(Buffer::new(ctx.clone())?);

        let fillers = FillWorkers::new(&ctx, buffer.clone(), fault.clone());
        let evictor = EvictManager::new(&ctx, buffer.clone(), fault);
        buffer.start_background(probe);

        info!(
            buffer_size = ctx.config().buffer_size,
            page_size = ctx.page_size(),
            fillers = ctx.config().num_fillers,
            evictors = ctx.config().num_evictors,
            "page engine started"
        );

        Ok(PageEngine {
            ctx,
            buffer,
            fillers,
            evictor,
            control: Mutex::new(false),
        })
    }

    #[inline]
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    #[inline]
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Maps `[base, base + len)`, served from `store` starting at `store_offset`
    pub fn map_region(
        &self,
        base: PageAddr,
        len: usize,
        store: Option<Arc<dyn Store>>,
        store_offset: u64,
    ) -> PagebufResult<Arc<Region>> {
        let _control = self.control.lock();
        self.ctx.register_region(base, len, store, store_offset)
    }

    /// Writes the region's dirty pages back, then drops all of its pages
    pub fn unmap_region(&self, region: &Region) -> PagebufResult<()> {
        let _control = self.control.lock();
        self.unmap_locked(region)
    }

    fn unmap_locked(&self, region: &Region) -> PagebufResult<()> {
        match self.ctx.region_for(region.base()) {
            Some(mapped) if mapped.id() == region.id() => {}
            _ => return Err(PagebufError::UnknownRegion(region.id())),
        }

        self.buffer.flush_region_dirty_pages(region);
        self.buffer.evict_region(region);
        self.ctx.deregister_region(region.id());
        debug!(region = region.id(), "region unmapped");
        Ok(())
    }

    /// Entry point for fault notifications
    ///
    /// # Returns
    /// * `Ok(())` - the fault was queued or needed no action
    /// * `Err(PagebufError::UnknownAddress)` - no region covers `addr`
    pub fn handle_fault(&self, addr: PageAddr, is_write: bool) -> PagebufResult<()> {
        let region = self
            .ctx
            .region_for(addr)
            .ok_or(PagebufError::UnknownAddress(addr))?;
        let page = region.page_align(addr);
        self.buffer.process_page_event(page, is_write, &region);
        Ok(())
    }

    /// Writes every dirty page back; pages stay resident
    pub fn flush(&self) {
        self.buffer.flush_dirty_pages();
    }

    /// Unmaps every region and stops all threads. Safe to call twice.
    pub fn shutdown(&self) {
        let mut stopped = self.control.lock();
        if *stopped {
            return;
        }

        for region in self.ctx.regions() {
            if let Err(err) = self.unmap_locked(&region) {
                tracing::warn!("unmap during shutdown failed: {}", err);
            }
        }
        self.fillers.stop();
        self.evictor.stop();
        self.buffer.shutdown();

        *stopped = true;
        info!("page engine stopped\n{}", self.buffer.stats());
    }
}

impl Drop for PageEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
