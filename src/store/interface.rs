//! Store interface definitions

use crate::store::error::StoreResult;

/// Backing store trait
/// A store provides byte-range access to the durable content of a region.
/// Implementations must tolerate concurrent calls from fill and flusher threads.
pub trait Store: Send + Sync {
    /// Read into `buf` starting at `offset`
    ///
    /// # Returns
    /// * `Ok(usize)` - The number of bytes read, less than `buf.len()` past the end of the store
    /// * `Err(StoreError)` if an error occurred
    fn read_from_store(&self, buf: &mut [u8], offset: u64) -> StoreResult<usize>;

    /// Write `buf` starting at `offset`
    ///
    /// # Returns
    /// * `Ok(usize)` - The number of bytes written
    /// * `Err(StoreError)` if an error occurred
    fn write_to_store(&self, buf: &[u8], offset: u64) -> StoreResult<usize>;
}
