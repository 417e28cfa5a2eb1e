//! Fault interception interface
//!
//! The host facility that detects accesses to non-resident pages (for example
//! userfaultfd) delivers `(address, is_write)` notifications to
//! [`crate::engine::PageEngine::handle_fault`]. The buffer in turn drives the
//! facility through [`FaultHandler`] to install content, toggle write
//! protection and drop physical backing.

pub mod mapped;
pub use mapped::MappedMemory;

use crate::types::PageAddr;
use std::error::Error;
use std::fmt;

/// Fault handler error types
#[derive(Debug)]
pub enum FaultError {
    /// Address range is outside the memory managed by the handler
    OutOfRange(PageAddr, usize),
    /// System call error with error code
    SystemError(i32, String),
}

impl fmt::Display for FaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultError::OutOfRange(addr, len) => {
                write!(f, "Range [{:#x}, +{}) is not managed by this handler", addr, len)
            }
            FaultError::SystemError(errno, msg) => {
                write!(f, "System error (errno {}): {}", errno, msg)
            }
        }
    }
}

impl Error for FaultError {}

/// Result type for fault handler operations
pub type FaultResult<T> = Result<T, FaultError>;

/// Operations the buffer needs from the fault interception facility
pub trait FaultHandler: Send + Sync {
    /// Place `data` at `page`, leaving it write protected if requested so the
    /// next write faults again
    fn install(&self, page: PageAddr, data: &[u8], write_protect: bool) -> FaultResult<()>;

    /// Make the range read-only so later writes fault
    fn write_protect(&self, page: PageAddr, len: usize) -> FaultResult<()>;

    /// Make the range writable again
    fn write_unprotect(&self, page: PageAddr, len: usize) -> FaultResult<()>;

    /// Copy resident content of `page` into `buf`
    fn read_page(&self, page: PageAddr, buf: &mut [u8]) -> FaultResult<()>;

    /// Drop physical backing for the range, keeping the virtual mapping
    fn release(&self, page: PageAddr, len: usize) -> FaultResult<()>;
}
