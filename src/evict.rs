//! Eviction manager and flushers
//!
//! The evict manager thread reacts to threshold requests by taking the oldest
//! resident pages out of the buffer until the low water mark is reached. The
//! flushers write dirty content back, drop the physical page and hand the
//! descriptor back to the buffer.

use crate::buffer::Buffer;
use crate::context::Context;
use crate::fault::FaultHandler;
use crate::region::Region;
use crate::store::Store;
use crate::types::{PageAddr, SlotId, fatal};
use crate::worker::{WorkQueue, WorkerPool};
use std::sync::Arc;

/// Requests handled by the evict manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictRequest {
    /// Busy pages reached the high water mark
    Threshold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushKind {
    /// Write back if needed, then release the page
    Evict,
    /// Write back only; the page stays resident
    Flush,
}

/// Flusher work item
pub struct FlushWork {
    pub slot: SlotId,
    /// Descriptor generation at scheduling time
    pub generation: u64,
    pub address: PageAddr,
    pub region: Arc<Region>,
    /// Store to write to, None when nothing needs writing
    pub store: Option<Arc<dyn Store>>,
    pub kind: FlushKind,
}

pub struct EvictManager {
    manager: WorkerPool<EvictRequest>,
    flushers: Flushers,
}

impl EvictManager {
    pub fn new(ctx: &Arc<Context>, buffer: Arc<Buffer>, fault: Arc<dyn FaultHandler>) -> Self {
        let flushers = Flushers::new(ctx, buffer.clone(), fault);

        let manager = WorkerPool::with_queue("pagebuf evict manager", 1, ctx.evict_queue().clone());
        let flush_queue = ctx.flush_queue().clone();
        manager.start(move |_, queue| evict_loop(queue, &buffer, &flush_queue));

        EvictManager { manager, flushers }
    }

    /// Stop the manager first so no eviction is scheduled on stopped flushers
    pub fn stop(&self) {
        self.manager.stop();
        self.flushers.stop();
    }
}

fn evict_loop(
    queue: &WorkQueue<EvictRequest>,
    buffer: &Buffer,
    flush_queue: &WorkQueue<FlushWork>,
) {
    while let Some(request) = queue.get_work() {
        match request {
            EvictRequest::Threshold => {
                let mut evicted = 0usize;
                while !buffer.low_threshold_reached() {
                    match buffer.evict_oldest_page() {
                        Some(work) => {
                            flush_queue.send_work(work);
                            evicted += 1;
                        }
                        None => break,
                    }
                }
                tracing::debug!(evicted, "threshold eviction done");
            }
        }
    }
}

pub struct Flushers {
    pool: WorkerPool<FlushWork>,
}

impl Flushers {
    pub fn new(ctx: &Arc<Context>, buffer: Arc<Buffer>, fault: Arc<dyn FaultHandler>) -> Self {
        let pool = WorkerPool::with_queue(
            "pagebuf flusher",
            ctx.config().num_evictors,
            ctx.flush_queue().clone(),
        );
        let page_size = ctx.page_size();
        pool.start(move |_, queue| flush_loop(queue, &buffer, fault.as_ref(), page_size));
        Flushers { pool }
    }

    pub fn stop(&self) {
        self.pool.stop();
    }
}

fn flush_loop(
    queue: &WorkQueue<FlushWork>,
    buffer: &Buffer,
    fault: &dyn FaultHandler,
    page_size: usize,
) {
    let mut page = vec![0u8; page_size];

    while let Some(work) = queue.get_work() {
        if let Some(store) = &work.store {
            let offset = work.region.store_offset(work.address);
            if let Err(err) = fault.write_protect(work.address, page_size) {
                fatal("failed to write protect page", &err);
            }
            if let Err(err) = fault.read_page(work.address, &mut page) {
                fatal("failed to read resident page", &err);
            }
            tracing::debug!(page = work.address, offset, "flushing page");
            if let Err(err) = store.write_to_store(&page, offset) {
                fatal("write_to_store failed", &err);
            }
        }

        match work.kind {
            FlushKind::Evict => {
                if let Err(err) = fault.release(work.address, page_size) {
                    fatal("failed to release page", &err);
                }
                buffer.mark_page_as_free(work.slot);
            }
            FlushKind::Flush => buffer.mark_page_as_flushed(work.slot, work.generation),
        }
    }
}
