// Buffer counters and point-in-time views

use std::fmt;

/// Cumulative buffer counters, all updated under the buffer lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Descriptors bound to a new page
    pub pages_inserted: u64,
    /// Descriptors taken off the busy list
    pub pages_deleted: u64,
    /// Times a fault found the free list empty
    pub not_avail: u64,
    /// Lock acquisitions
    pub lock: u64,
    /// Lock acquisitions that found the lock held
    pub lock_collision: u64,
    /// Condition variable waits
    pub waits: u64,
    /// Fault events that produced work
    pub events_processed: u64,
    /// Fault events that required no action
    pub spurious: u64,
    /// Highest per-page spurious count seen
    pub spurious_high_water: u32,
}

impl fmt::Display for BufferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Buffer Statistics:")?;
        writeln!(f, "   Pages Inserted: {:>12}", self.pages_inserted)?;
        writeln!(f, "    Pages Deleted: {:>12}", self.pages_deleted)?;
        writeln!(f, " Unavailable wait: {:>12}", self.not_avail)?;
        writeln!(f, "            Locks: {:>12}", self.lock)?;
        writeln!(f, "  Lock collisions: {:>12}", self.lock_collision)?;
        writeln!(f, "            Waits: {:>12}", self.waits)?;
        writeln!(f, " Events processed: {:>12}", self.events_processed)?;
        write!(f, "   Spurious fault: {:>12}", self.spurious)
    }
}

/// Sizes of the buffer's lists at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub capacity: usize,
    pub free: usize,
    pub busy: usize,
    pub present: usize,
    /// LEAVING descriptors already taken off the busy list
    pub leaving_unlisted: usize,
    pub retired: usize,
    pub low_water: usize,
    pub high_water: usize,
    pub pending_flushes: usize,
    /// Every present index entry points at a bound, non-FREE descriptor
    pub index_consistent: bool,
}

impl BufferSnapshot {
    /// Every slot counted exactly once across free, busy and in-flight eviction
    pub fn capacity_consistent(&self) -> bool {
        self.free + self.busy + self.leaving_unlisted == self.capacity
    }

    /// No eviction in flight and no deferred leftovers on the busy list
    pub fn is_quiescent(&self) -> bool {
        self.leaving_unlisted == 0 && self.present == self.busy
    }
}

impl fmt::Display for BufferSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ capacity: {}, present: {:>2}, free: {:>2}, busy: {:>2}, ",
            self.capacity,
            self.present,
            self.free,
            self.busy
        )?;
        write!(
            f,
            "leaving: {}, watermarks: {}/{} }}",
            self.leaving_unlisted,
            self.low_water,
            self.high_water
        )
    }
}
