//! Page descriptor definition
//!
//! One descriptor exists per slot of the page buffer. Descriptors are created in
//! bulk when the buffer is built or grown and are recycled between the free and
//! busy lists; they are never allocated per fault.
//!
//! State machine:
//! ```text
//!   FREE --fault--> FILLING --fill done--> PRESENT --write fault--> UPDATING
//!    ^                                       |  ^                       |
//!    |                                       |  +----unprotect done-----+
//!    +------------flush done----- LEAVING <--+ evict
//! ```

use crate::region::Region;
use crate::types::PageAddr;
use std::fmt;
use std::sync::Arc;

/// Page state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageState {
    /// Slot is unused
    Free,
    /// Content is being read from the store
    Filling,
    /// Content is resident
    Present,
    /// Write protection is being lifted after a write fault
    Updating,
    /// Content is being written back and released
    Leaving,
}

impl PageState {
    /// Returns true if `self -> next` is an edge of the state machine
    #[inline]
    pub fn can_transition_to(self, next: PageState) -> bool {
        matches!(
            (self, next),
            (PageState::Free, PageState::Filling)
                | (PageState::Filling, PageState::Present)
                | (PageState::Present, PageState::Updating)
                | (PageState::Updating, PageState::Present)
                | (PageState::Present, PageState::Leaving)
                | (PageState::Leaving, PageState::Free)
        )
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PageState::Free => "FREE",
            PageState::Filling => "FILLING",
            PageState::Present => "PRESENT",
            PageState::Updating => "UPDATING",
            PageState::Leaving => "LEAVING",
        };
        f.write_str(name)
    }
}

/// Per-slot page record
pub struct PageDescriptor {
    /// Bound page address, None while FREE
    address: Option<PageAddr>,
    /// Region the bound page belongs to
    region: Option<Arc<Region>>,
    /// Current state
    state: PageState,
    /// Bumped on every bind so waiters can tell a recycled slot apart
    generation: u64,
    /// Written since the last write-back
    pub dirty: bool,
    /// Owning region was unmapped while the page was resident
    pub deferred: bool,
    /// Fault notifications that required no action
    pub spurious_count: u32,
}

impl PageDescriptor {
    /// Creates a FREE descriptor
    #[inline]
    pub fn new() -> Self {
        Self {
            address: None,
            region: None,
            state: PageState::Free,
            generation: 0,
            dirty: false,
            deferred: false,
            spurious_count: 0,
        }
    }

    #[inline]
    pub fn address(&self) -> Option<PageAddr> {
        self.address
    }

    #[inline]
    pub fn region(&self) -> Option<&Arc<Region>> {
        self.region.as_ref()
    }

    #[inline]
    pub fn state(&self) -> PageState {
        self.state
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Binds a FREE descriptor to `address` and moves it to FILLING
    pub fn bind(&mut self, address: PageAddr, region: Arc<Region>) {
        self.transition(PageState::Filling);
        self.address = Some(address);
        self.region = Some(region);
        self.generation = self.generation.wrapping_add(1);
        self.dirty = false;
        self.deferred = false;
        self.spurious_count = 0;
    }

    /// Moves a LEAVING descriptor to FREE and drops its binding.
    ///
    /// `deferred` is left untouched; the buffer uses it afterwards to decide
    /// who returns the slot to the free list.
    pub fn unbind(&mut self) {
        self.transition(PageState::Free);
        self.address = None;
        self.region = None;
        self.spurious_count = 0;
    }

    #[inline]
    pub fn set_state_present(&mut self) {
        self.transition(PageState::Present);
    }

    #[inline]
    pub fn set_state_updating(&mut self) {
        self.transition(PageState::Updating);
    }

    #[inline]
    pub fn set_state_leaving(&mut self) {
        self.transition(PageState::Leaving);
    }

    fn transition(&mut self, next: PageState) {
        if !self.state.can_transition_to(next) {
            panic!("Illegal page state transition {} -> {} ({})", self.state, next, self);
        }
        self.state = next;
    }
}

impl Default for PageDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(addr) => write!(f, "{{ page: {:#x}, ", addr)?,
            None => write!(f, "{{ page: none, ")?,
        }
        write!(
            f,
            "state: {}, dirty: {}, deferred: {}, spurious: {} }}",
            self.state, self.dirty, self.deferred, self.spurious_count
        )
    }
}

impl fmt::Debug for PageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
