//! Page buffer implementation
//!
//! Provides the fixed pool of page descriptors, the FREE -> FILLING -> PRESENT
//! -> LEAVING -> FREE state machine, watermark driven eviction requests and
//! the background monitor and adaptive resize loops.
//!
//! All state lives behind one mutex. Two condition variables carry wakeups:
//! `avail_pd_cond` when a descriptor returns to the free list and
//! `state_change_cond` when any descriptor changes state. Each has a waiter
//! count so signalers skip the notify when nobody waits. Every wait re-checks
//! its predicate in a loop.

pub mod adapt;
pub mod stats;

use crate::context::Context;
use crate::evict::{EvictRequest, FlushKind, FlushWork};
use crate::fill::FillWork;
use crate::page::{PageDescriptor, PageState};
use crate::region::Region;
use crate::types::{PageAddr, RegionId, SlotId};
use adapt::Background;
use linked_hash_map::LinkedHashMap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub use adapt::{AdaptState, MemoryProbe, ProcMeminfo, ResizeAction, parse_meminfo};
pub use stats::{BufferSnapshot, BufferStats};

/// Buffer errors
#[derive(Debug)]
pub enum BufferError {
    /// Percentage outside [0, 100]
    InvalidPercentage(i64),
    /// Descriptor storage could not be allocated
    AllocationFailed(usize),
    /// Shrinking found no spare memory and no busy pages to reclaim later
    NoMemoryForCaching,
    /// Available system memory could not be determined
    MeminfoUnavailable(String),
    /// I/O error while probing the system
    IoError(std::io::Error),
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::InvalidPercentage(pct) => write!(f, "Invalid percentage ({}) given", pct),
            BufferError::AllocationFailed(n) => {
                write!(f, "Failed to allocate {} page descriptors", n)
            }
            BufferError::NoMemoryForCaching => write!(f, "No free memory for page caching"),
            BufferError::MeminfoUnavailable(msg) => {
                write!(f, "Unable to determine MemAvailable: {}", msg)
            }
            BufferError::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl Error for BufferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BufferError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BufferError {
    fn from(err: std::io::Error) -> Self {
        BufferError::IoError(err)
    }
}

/// Applies `percentage` to `item`
///
/// # Returns
/// * `Ok(usize)` - `item * percentage / 100`, rounded down
/// * `Err(BufferError::InvalidPercentage)` - percentage outside [0, 100]
pub fn apply_int_percentage(percentage: i64, item: usize) -> Result<usize, BufferError> {
    if !(0..=100).contains(&percentage) {
        return Err(BufferError::InvalidPercentage(percentage));
    }
    Ok((item as u128 * percentage as u128 / 100) as usize)
}

/// Read-only view of one resident page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub slot: SlotId,
    pub state: PageState,
    pub dirty: bool,
    pub deferred: bool,
    pub spurious_count: u32,
    pub generation: u64,
}

/// Everything guarded by the buffer lock
struct BufferInner {
    /// Descriptor arena, indexed by SlotId
    slots: Vec<PageDescriptor>,
    /// Unused descriptors, popped from the back
    free: Vec<SlotId>,
    /// Bound descriptors in insertion order, oldest at the front
    busy: LinkedHashMap<SlotId, ()>,
    /// Address -> descriptor for every non-FREE descriptor
    present: HashMap<PageAddr, SlotId>,
    /// Slots removed by a shrink, reused by the next grow
    retired: Vec<SlotId>,
    /// Descriptors bound to each region
    region_pages: HashMap<RegionId, HashSet<SlotId>>,
    capacity: usize,
    low_water: usize,
    high_water: usize,
    /// Descriptors between PRESENT -> LEAVING and FREE
    leaving: usize,
    /// Flush-only work items not yet completed
    pending_flushes: usize,
    waits_for_avail_pd: usize,
    waits_for_state_change: usize,
    stats: BufferStats,
}

impl BufferInner {
    #[inline]
    fn oldest(&self) -> Option<SlotId> {
        self.busy.front().map(|(slot, _)| *slot)
    }
}

pub struct Buffer {
    ctx: Arc<Context>,
    inner: Mutex<BufferInner>,
    avail_pd_cond: Condvar,
    state_change_cond: Condvar,
    background: Arc<Background>,
}

impl Buffer {
    /// Creates a buffer of `buffer_size` descriptors, all free
    pub fn new(ctx: Arc<Context>) -> Result<Self, BufferError> {
        let config = ctx.config();
        let capacity = config.buffer_size;
        let low_water = apply_int_percentage(config.evict_low_water_pct, capacity)?;
        let high_water = apply_int_percentage(config.evict_high_water_pct, capacity)?;

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| BufferError::AllocationFailed(capacity))?;
        slots.resize_with(capacity, PageDescriptor::new);

        let inner = BufferInner {
            slots,
            // Reversed so slot 0 is handed out first
            free: (0..capacity).rev().collect(),
            busy: LinkedHashMap::new(),
            present: HashMap::new(),
            retired: Vec::new(),
            region_pages: HashMap::new(),
            capacity,
            low_water,
            high_water,
            leaving: 0,
            pending_flushes: 0,
            waits_for_avail_pd: 0,
            waits_for_state_change: 0,
            stats: BufferStats::default(),
        };

        Ok(Buffer {
            ctx,
            inner: Mutex::new(inner),
            avail_pd_cond: Condvar::new(),
            state_change_cond: Condvar::new(),
            background: Arc::new(Background::new()),
        })
    }

    #[inline]
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Starts the monitor and adaptive resize loops enabled in the config
    pub fn start_background(self: &Arc<Self>, probe: Arc<dyn MemoryProbe>) {
        adapt::start_loops(self, probe);
    }

    /// Stops and joins the background loops
    pub fn shutdown(&self) {
        self.background.stop();
    }

    /// Handles one fault notification for `addr` in `region`
    pub fn process_page_event(&self, addr: PageAddr, is_write: bool, region: &Arc<Region>) {
        let mut inner = self.lock();

        let work = loop {
            if let Some(slot) = self.page_already_present(&mut inner, addr) {
                let state = &mut *inner;
                let pd = &mut state.slots[slot];
                if is_write && !pd.dirty {
                    pd.dirty = true;
                    pd.set_state_updating();
                    debug!(page = %pd, "PRE");
                    break FillWork::update(slot, addr, region.clone());
                }

                pd.spurious_count += 1;
                let count = pd.spurious_count;
                debug!(page = %pd, "SPU");
                state.stats.spurious += 1;
                if count > state.stats.spurious_high_water {
                    state.stats.spurious_high_water = count;
                    debug!("New spurious count high water mark: {}", count);
                }
                return;
            }

            // Binding may have to wait; another thread can bring the page in meanwhile
            if inner.free.is_empty() {
                self.wait_for_free_descriptor(&mut inner);
                continue;
            }

            let slot = self.get_page_descriptor(&mut inner, addr, region);
            let pd = &mut inner.slots[slot];
            pd.dirty = is_write;
            debug!(page = %pd, "NEW");
            break FillWork::fill(slot, addr, region.clone(), is_write);
        };

        self.ctx.fill_queue().send_work(work);

        // Kick the evict manager when the high water mark is hit
        if inner.busy.len() == inner.high_water {
            self.ctx.evict_queue().send_work(EvictRequest::Threshold);
        }

        inner.stats.events_processed += 1;
    }

    /// Called once page content is in place: FILLING or UPDATING -> PRESENT
    pub fn mark_page_as_present(&self, slot: SlotId) {
        let mut inner = self.lock();
        inner.slots[slot].set_state_present();
        self.notify_state_change(&inner);
    }

    /// Called once a page has been written back and released: LEAVING -> FREE
    pub fn mark_page_as_free(&self, slot: SlotId) {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let pd = &mut inner.slots[slot];
        debug!(page = %pd, "Removing page");
        if let Some(addr) = pd.address() {
            inner.present.remove(&addr);
        }
        if let Some(region_id) = pd.region().map(|region| region.id()) {
            if let Some(pages) = inner.region_pages.get_mut(&region_id) {
                pages.remove(&slot);
                if pages.is_empty() {
                    inner.region_pages.remove(&region_id);
                }
            }
        }
        pd.unbind();
        let deferred = pd.deferred;
        inner.leaving -= 1;

        // Deferred descriptors stay on the busy list until whoever drains
        // them takes them off and releases them
        if !deferred {
            self.release_page_descriptor(inner, slot);
        }
        self.notify_state_change(inner);
    }

    /// Called once a flush-only item has been written back: UPDATING -> PRESENT
    pub fn mark_page_as_flushed(&self, slot: SlotId, generation: u64) {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let pd = &mut inner.slots[slot];
        debug_assert_eq!(pd.generation(), generation);
        pd.dirty = false;
        pd.set_state_present();
        inner.pending_flushes -= 1;
        self.notify_state_change(inner);
    }

    /// Takes the oldest resident page out of the buffer.
    ///
    /// Deferred entries met on the way are drained and released. Returns the
    /// eviction work for the first non-deferred page, now LEAVING, or None
    /// once the busy list is empty.
    pub fn evict_oldest_page(&self) -> Option<FlushWork> {
        let mut inner = self.lock();

        loop {
            let slot = inner.oldest()?;
            let generation = inner.slots[slot].generation();

            if inner.slots[slot].deferred {
                debug!(page = %inner.slots[slot], "Deferred Page");
                // Make sure the unmap path has truly flushed it
                self.wait_until(&mut inner, |i| {
                    let pd = &i.slots[slot];
                    pd.generation() != generation || pd.state() == PageState::Free
                });
                if inner.slots[slot].generation() == generation
                    && inner.busy.remove(&slot).is_some()
                {
                    inner.stats.pages_deleted += 1;
                    self.release_page_descriptor(&mut inner, slot);
                }
                continue;
            }

            debug!(page = %inner.slots[slot], "Normal Page");
            self.wait_until(&mut inner, |i| {
                let pd = &i.slots[slot];
                pd.generation() != generation
                    || pd.deferred
                    || pd.state() == PageState::Present
                    || i.oldest() != Some(slot)
            });
            let pd = &inner.slots[slot];
            if pd.generation() != generation
                || pd.deferred
                || pd.state() != PageState::Present
                || inner.oldest() != Some(slot)
            {
                continue;
            }

            inner.busy.pop_front();
            inner.stats.pages_deleted += 1;
            inner.leaving += 1;
            inner.slots[slot].set_state_leaving();
            return Some(self.eviction_work(&inner, slot));
        }
    }

    /// Removes every page of `region` from the buffer.
    ///
    /// With other regions still active the region's pages are marked deferred
    /// and evicted without write-back, one by one; the call returns once all of
    /// them are FREE. As the last active region the whole buffer is drained.
    pub fn evict_region(&self, region: &Region) {
        if self.ctx.num_active_regions() <= 1 {
            self.evict_all();
            return;
        }

        let mut inner = self.lock();
        loop {
            let next = inner
                .region_pages
                .get(&region.id())
                .and_then(|pages| pages.iter().next().copied());
            let Some(slot) = next else { break };
            let generation = inner.slots[slot].generation();

            if inner.slots[slot].state() != PageState::Leaving {
                inner.slots[slot].deferred = true;
                self.wait_until(&mut inner, |i| {
                    let pd = &i.slots[slot];
                    pd.generation() != generation || pd.state() == PageState::Present
                });
                if inner.slots[slot].generation() != generation {
                    continue;
                }
                inner.slots[slot].set_state_leaving();
                inner.leaving += 1;
                let work = self.eviction_work(&inner, slot);
                self.ctx.flush_queue().send_work(work);
            }

            self.wait_until(&mut inner, |i| {
                let pd = &i.slots[slot];
                pd.generation() != generation || pd.state() == PageState::Free
            });

            let pd = &inner.slots[slot];
            if pd.generation() == generation && pd.deferred && inner.busy.remove(&slot).is_some() {
                inner.stats.pages_deleted += 1;
                self.release_page_descriptor(&mut inner, slot);
            }
        }
    }

    /// Evicts every busy page and waits until no eviction is in flight
    pub fn evict_all(&self) {
        while let Some(work) = self.evict_oldest_page() {
            self.ctx.flush_queue().send_work(work);
        }

        let mut inner = self.lock();
        self.wait_until(&mut inner, |i| i.leaving == 0);
    }

    /// Writes every dirty page back and waits for the writes; pages stay resident
    pub fn flush_dirty_pages(&self) {
        self.flush_pages(None);
    }

    /// Like [`Buffer::flush_dirty_pages`], limited to one region
    pub fn flush_region_dirty_pages(&self, region: &Region) {
        self.flush_pages(Some(region.id()));
    }

    fn flush_pages(&self, only: Option<RegionId>) {
        let mut inner = self.lock();

        let candidates: Vec<(SlotId, u64)> = inner
            .busy
            .keys()
            .map(|slot| (*slot, &inner.slots[*slot]))
            .filter(|(_, pd)| pd.dirty && !pd.deferred)
            .filter(|(_, pd)| match only {
                Some(id) => pd.region().is_some_and(|region| region.id() == id),
                None => true,
            })
            .map(|(slot, pd)| (slot, pd.generation()))
            .collect();

        for (slot, generation) in candidates {
            self.wait_until(&mut inner, |i| {
                let pd = &i.slots[slot];
                pd.generation() != generation
                    || pd.state() == PageState::Present
                    || !i.busy.contains_key(&slot)
            });

            let pd = &inner.slots[slot];
            if pd.generation() != generation
                || pd.state() != PageState::Present
                || !inner.busy.contains_key(&slot)
                || !pd.dirty
                || pd.deferred
            {
                continue;
            }
            // Scratch pages have nowhere to go
            let Some(work) = self.flush_work(&inner, slot) else { continue };

            // UPDATING keeps faults and evictors off the page while it is written
            inner.slots[slot].set_state_updating();
            debug!(page = %inner.slots[slot], "schedule Dirty Page");
            inner.pending_flushes += 1;
            self.ctx.flush_queue().send_work(work);
        }

        self.wait_until(&mut inner, |i| i.pending_flushes == 0);
    }

    /// True once busy pages are at or below the low water mark
    pub fn low_threshold_reached(&self) -> bool {
        let inner = self.lock();
        inner.busy.len() <= inner.low_water
    }

    /// Blocks until the descriptor in `slot` reaches `state`
    pub fn wait_for_page_state(&self, slot: SlotId, state: PageState) {
        let mut inner = self.lock();
        debug!("Waiting for state: {}, {}", state, inner.slots[slot]);
        self.wait_until(&mut inner, |i| i.slots[slot].state() == state);
    }

    /// Adds `count` free descriptors and recomputes the watermarks
    pub fn grow(&self, count: usize) -> Result<usize, BufferError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let reused = count.min(inner.retired.len());
        let fresh = count - reused;
        inner
            .slots
            .try_reserve(fresh)
            .map_err(|_| BufferError::AllocationFailed(fresh))?;
        inner
            .free
            .try_reserve(count)
            .map_err(|_| BufferError::AllocationFailed(count))?;

        let keep = inner.retired.len() - reused;
        inner.free.extend(inner.retired.drain(keep..));
        for _ in 0..fresh {
            inner.free.push(inner.slots.len());
            inner.slots.push(PageDescriptor::new());
        }

        inner.capacity += count;
        self.update_watermarks(inner);
        if inner.waits_for_avail_pd > 0 {
            self.avail_pd_cond.notify_all();
        }
        Ok(count)
    }

    /// Removes up to `count` descriptors from the free list.
    ///
    /// Clamps to the free list when it is too short, unless no page is busy
    /// at all, which leaves nothing to reclaim later and is an error.
    pub fn shrink(&self, count: usize) -> Result<usize, BufferError> {
        let mut guard = self.lock();
        self.shrink_locked(&mut guard, count)
    }

    /// Shrinks so that non-busy capacity matches `target`
    pub(crate) fn shrink_to_target(&self, target: usize) -> Result<usize, BufferError> {
        let mut guard = self.lock();
        let pending = guard.capacity - guard.busy.len();
        let count = pending.saturating_sub(target);
        self.shrink_locked(&mut guard, count)
    }

    fn shrink_locked(&self, inner: &mut BufferInner, count: usize) -> Result<usize, BufferError> {
        let mut count = count;
        if count >= inner.free.len() {
            if inner.busy.is_empty() {
                return Err(BufferError::NoMemoryForCaching);
            }
            count = inner.free.len();
        }

        let keep = inner.free.len() - count;
        inner.retired.extend(inner.free.drain(keep..));
        inner.capacity -= count;
        self.update_watermarks(inner);

        // React now instead of waiting for the next fault
        if inner.busy.len() >= inner.high_water {
            tracing::info!(
                high_water = inner.high_water,
                low_water = inner.low_water,
                "Kickoff Eviction"
            );
            self.ctx.evict_queue().send_work(EvictRequest::Threshold);
        }
        Ok(count)
    }

    /// Current list sizes and consistency flags
    pub fn snapshot(&self) -> BufferSnapshot {
        let inner = self.lock();
        let leaving_unlisted = inner
            .slots
            .iter()
            .filter(|pd| pd.state() == PageState::Leaving && !pd.deferred)
            .count();
        let index_consistent = inner.present.iter().all(|(addr, slot)| {
            let pd = &inner.slots[*slot];
            pd.state() != PageState::Free && pd.address() == Some(*addr)
        });

        BufferSnapshot {
            capacity: inner.capacity,
            free: inner.free.len(),
            busy: inner.busy.len(),
            present: inner.present.len(),
            leaving_unlisted,
            retired: inner.retired.len(),
            low_water: inner.low_water,
            high_water: inner.high_water,
            pending_flushes: inner.pending_flushes,
            index_consistent,
        }
    }

    pub fn stats(&self) -> BufferStats {
        self.lock().stats
    }

    /// Descriptor details for a page that is not FREE
    pub fn page_info(&self, addr: PageAddr) -> Option<PageInfo> {
        let inner = self.lock();
        let slot = *inner.present.get(&addr)?;
        let pd = &inner.slots[slot];
        Some(PageInfo {
            slot,
            state: pd.state(),
            dirty: pd.dirty,
            deferred: pd.deferred,
            spurious_count: pd.spurious_count,
            generation: pd.generation(),
        })
    }

    /// Addresses on the busy list, oldest first
    pub fn busy_addresses(&self) -> Vec<PageAddr> {
        let inner = self.lock();
        inner
            .busy
            .keys()
            .filter_map(|slot| inner.slots[*slot].address())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        let mut inner = match self.inner.try_lock() {
            Some(inner) => inner,
            None => {
                let mut inner = self.inner.lock();
                inner.stats.lock_collision += 1;
                inner
            }
        };
        inner.stats.lock += 1;
        inner
    }

    /// Returns the descriptor for `addr` once it is PRESENT, or None if the
    /// address is not bound. Waits out any in-flight transition.
    fn page_already_present(
        &self,
        inner: &mut MutexGuard<'_, BufferInner>,
        addr: PageAddr,
    ) -> Option<SlotId> {
        loop {
            let slot = *inner.present.get(&addr)?;
            if inner.slots[slot].state() == PageState::Present {
                return Some(slot);
            }
            debug!("Waiting for state: (ANY), {}", inner.slots[slot]);
            self.wait_state_change(inner);
        }
    }

    /// Pops a free descriptor and binds it to `addr`: FREE -> FILLING
    fn get_page_descriptor(
        &self,
        inner: &mut MutexGuard<'_, BufferInner>,
        addr: PageAddr,
        region: &Arc<Region>,
    ) -> SlotId {
        let slot = loop {
            if let Some(slot) = inner.free.pop() {
                break slot;
            }
            self.wait_for_free_descriptor(inner);
        };

        let inner = &mut **inner;
        inner.slots[slot].bind(addr, region.clone());
        inner.stats.pages_inserted += 1;
        inner.busy.insert(slot, ());
        inner.present.insert(addr, slot);
        inner.region_pages.entry(region.id()).or_default().insert(slot);
        slot
    }

    fn wait_for_free_descriptor(&self, inner: &mut MutexGuard<'_, BufferInner>) {
        // The high water trigger fires on exact equality; make sure an
        // eviction is underway before sleeping on an empty free list
        self.ctx.evict_queue().send_work(EvictRequest::Threshold);

        while inner.free.is_empty() {
            inner.waits_for_avail_pd += 1;
            inner.stats.not_avail += 1;
            inner.stats.waits += 1;
            self.avail_pd_cond.wait(inner);
            inner.waits_for_avail_pd -= 1;
        }
    }

    fn release_page_descriptor(&self, inner: &mut BufferInner, slot: SlotId) {
        inner.free.push(slot);
        if inner.waits_for_avail_pd > 0 {
            self.avail_pd_cond.notify_all();
        }
    }

    fn notify_state_change(&self, inner: &BufferInner) {
        if inner.waits_for_state_change > 0 {
            self.state_change_cond.notify_all();
        }
    }

    fn wait_state_change(&self, inner: &mut MutexGuard<'_, BufferInner>) {
        inner.stats.waits += 1;
        inner.waits_for_state_change += 1;
        self.state_change_cond.wait(inner);
        inner.waits_for_state_change -= 1;
    }

    fn wait_until<F>(&self, inner: &mut MutexGuard<'_, BufferInner>, mut done: F)
    where
        F: FnMut(&BufferInner) -> bool,
    {
        while !done(&**inner) {
            self.wait_state_change(inner);
        }
    }

    fn eviction_work(&self, inner: &BufferInner, slot: SlotId) -> FlushWork {
        let pd = &inner.slots[slot];
        let (address, region) = match (pd.address(), pd.region()) {
            (Some(address), Some(region)) => (address, region.clone()),
            _ => panic!("Evicting an unbound page: {}", pd),
        };
        let store = if pd.dirty && !pd.deferred {
            region.store().cloned()
        } else {
            None
        };
        FlushWork {
            slot,
            generation: pd.generation(),
            address,
            region,
            store,
            kind: FlushKind::Evict,
        }
    }

    fn flush_work(&self, inner: &BufferInner, slot: SlotId) -> Option<FlushWork> {
        let pd = &inner.slots[slot];
        let region = pd.region()?.clone();
        let store = region.store()?.clone();
        Some(FlushWork {
            slot,
            generation: pd.generation(),
            address: pd.address()?,
            region,
            store: Some(store),
            kind: FlushKind::Flush,
        })
    }

    fn update_watermarks(&self, inner: &mut BufferInner) {
        let config = self.ctx.config();
        // Percentages were validated when the buffer was built
        inner.low_water = apply_int_percentage(config.evict_low_water_pct, inner.capacity)
            .unwrap_or(inner.low_water);
        inner.high_water = apply_int_percentage(config.evict_high_water_pct, inner.capacity)
            .unwrap_or(inner.high_water);
    }
}

impl fmt::Display for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        write!(
            f,
            "{{ m_size: {}, m_waits_for_avail_pd: {}, present: {:>2}, free: {:>2}, busy: {:>2} }}",
            inner.capacity,
            inner.waits_for_avail_pd,
            inner.present.len(),
            inner.free.len(),
            inner.busy.len()
        )
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.background.stop();
        let inner = self.inner.get_mut();
        debug!("{}", inner.stats);
        if !std::thread::panicking() {
            assert!(inner.present.is_empty(), "Pages are still present");
        }
    }
}

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
