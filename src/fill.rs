//! Fill workers
//!
//! Read page content from the backing store, install it at the faulting
//! address and report the page present. Update items only lift write
//! protection after a write fault on a clean resident page.

use crate::buffer::Buffer;
use crate::context::Context;
use crate::fault::FaultHandler;
use crate::region::Region;
use crate::types::{PageAddr, SlotId, fatal};
use crate::worker::{WorkQueue, WorkerPool};
use std::sync::Arc;

/// What a fill worker has to do for a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillKind {
    /// Bring content in; `write` leaves the page writable
    Fill { write: bool },
    /// Make a resident page writable
    Update,
}

/// Fill work item
pub struct FillWork {
    pub slot: SlotId,
    pub address: PageAddr,
    pub region: Arc<Region>,
    pub kind: FillKind,
}

impl FillWork {
    pub fn fill(slot: SlotId, address: PageAddr, region: Arc<Region>, write: bool) -> Self {
        FillWork {
            slot,
            address,
            region,
            kind: FillKind::Fill { write },
        }
    }

    pub fn update(slot: SlotId, address: PageAddr, region: Arc<Region>) -> Self {
        FillWork {
            slot,
            address,
            region,
            kind: FillKind::Update,
        }
    }
}

pub struct FillWorkers {
    pool: WorkerPool<FillWork>,
}

impl FillWorkers {
    /// Start `num_fillers` workers on the context's fill queue
    pub fn new(ctx: &Arc<Context>, buffer: Arc<Buffer>, fault: Arc<dyn FaultHandler>) -> Self {
        let pool = WorkerPool::with_queue(
            "pagebuf filler",
            ctx.config().num_fillers,
            ctx.fill_queue().clone(),
        );
        let page_size = ctx.page_size();
        pool.start(move |_, queue| fill_loop(queue, &buffer, fault.as_ref(), page_size));
        FillWorkers { pool }
    }

    /// Finish queued fills and join the workers
    pub fn stop(&self) {
        self.pool.stop();
    }
}

fn fill_loop(
    queue: &WorkQueue<FillWork>,
    buffer: &Buffer,
    fault: &dyn FaultHandler,
    page_size: usize,
) {
    let mut page = vec![0u8; page_size];

    while let Some(work) = queue.get_work() {
        match work.kind {
            FillKind::Fill { write } => {
                read_page(&work, &mut page);
                if let Err(err) = fault.install(work.address, &page, !write) {
                    fatal("failed to install page", &err);
                }
            }
            FillKind::Update => {
                if let Err(err) = fault.write_unprotect(work.address, page_size) {
                    fatal("failed to lift write protection", &err);
                }
            }
        }
        buffer.mark_page_as_present(work.slot);
    }
}

/// Loads the page content, zero-filling anything the store does not cover
fn read_page(work: &FillWork, page: &mut [u8]) {
    let filled = match work.region.store() {
        Some(store) => {
            let offset = work.region.store_offset(work.address);
            match store.read_from_store(page, offset) {
                Ok(n) => n,
                Err(err) => fatal("read_from_store failed", &err),
            }
        }
        None => 0,
    };
    page[filled..].fill(0);
}
