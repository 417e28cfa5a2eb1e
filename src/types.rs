use std::fmt;

use crate::buffer::BufferError;
use crate::config::ConfigError;
use crate::fault::FaultError;
use crate::store::StoreError;

/// Global type definitions
///
/// Stores type aliases, constants and the crate-level error used by the page buffer
/// Virtual address of a page (always page aligned once it reaches the buffer)
pub type PageAddr = usize;

/// Index of a descriptor slot in the buffer arena
pub type SlotId = usize;

/// Identifier of a mapped region
pub type RegionId = u64;

/// Default page size (4KB)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Memory kept away from the page buffer when sizing it adaptively (4GB, in KB)
pub const DEFAULT_MEM_MARGIN_KB: u64 = 4 * 1024 * 1024;

/// Slack added to the resize lookahead (64MB)
pub const DEFAULT_RESIZE_SLACK_BYTES: u64 = 64 * 1024 * 1024;

/// Number of epochs the adaptive resizer looks ahead
pub const RESIZE_LOOKAHEAD_EPOCHS: usize = 3;

/// Storage engine error type
#[derive(Debug)]
pub enum PagebufError {
    /// Invalid configuration
    Config(ConfigError),
    /// Backing store failure
    Store(StoreError),
    /// Fault interception failure
    Fault(FaultError),
    /// Page buffer failure
    Buffer(BufferError),
    /// Address does not belong to any mapped region
    UnknownAddress(PageAddr),
    /// Requested range overlaps an existing region
    RegionOverlap(PageAddr, usize),
    /// Region is not mapped
    UnknownRegion(RegionId),
}

impl fmt::Display for PagebufError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PagebufError::Config(err) => write!(f, "Configuration error: {}", err),
            PagebufError::Store(err) => write!(f, "Store error: {}", err),
            PagebufError::Fault(err) => write!(f, "Fault handler error: {}", err),
            PagebufError::Buffer(err) => write!(f, "Buffer error: {}", err),
            PagebufError::UnknownAddress(addr) => {
                write!(f, "Address {:#x} is not part of a mapped region", addr)
            }
            PagebufError::RegionOverlap(base, len) => {
                write!(f, "Region [{:#x}, +{}) overlaps a mapped region", base, len)
            }
            PagebufError::UnknownRegion(id) => write!(f, "Region {} is not mapped", id),
        }
    }
}

impl std::error::Error for PagebufError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PagebufError::Config(err) => Some(err),
            PagebufError::Store(err) => Some(err),
            PagebufError::Fault(err) => Some(err),
            PagebufError::Buffer(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for PagebufError {
    fn from(err: ConfigError) -> Self {
        PagebufError::Config(err)
    }
}

impl From<StoreError> for PagebufError {
    fn from(err: StoreError) -> Self {
        PagebufError::Store(err)
    }
}

impl From<FaultError> for PagebufError {
    fn from(err: FaultError) -> Self {
        PagebufError::Fault(err)
    }
}

impl From<BufferError> for PagebufError {
    fn from(err: BufferError) -> Self {
        PagebufError::Buffer(err)
    }
}

/// Result type for engine operations
pub type PagebufResult<T> = Result<T, PagebufError>;

/// Logs an unrecoverable condition and aborts the process.
///
/// Used on worker and background threads where a failed write-back or
/// release would otherwise leave the buffer silently inconsistent.
pub fn fatal(what: &str, err: &dyn fmt::Display) -> ! {
    tracing::error!(error = %err, "{}", what);
    std::process::abort()
}
