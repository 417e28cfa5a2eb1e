//! Anonymous mapping driven with glibc system calls
//!
//! Reserves an inaccessible address range; pages become readable (and
//! optionally writable) when installed and inaccessible again when released.

use crate::fault::{FaultError, FaultHandler, FaultResult};
use crate::types::PageAddr;
use libc::{self, c_int, c_void, size_t};
use std::ptr;

pub struct MappedMemory {
    base: *mut u8,
    len: usize,
}

// The mapping is only touched through system calls and bounded copies
unsafe impl Send for MappedMemory {}
unsafe impl Sync for MappedMemory {}

impl MappedMemory {
    /// Reserve `len` bytes of inaccessible address space
    pub fn reserve(len: usize) -> FaultResult<Self> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len as size_t,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            let errno = unsafe { *libc::__errno_location() };
            Err(FaultError::SystemError(errno, "mmap failed".to_string()))
        } else {
            Ok(MappedMemory {
                base: ptr as *mut u8,
                len,
            })
        }
    }

    /// First address of the reservation
    #[inline]
    pub fn base(&self) -> PageAddr {
        self.base as PageAddr
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check_range(&self, addr: PageAddr, len: usize) -> FaultResult<*mut u8> {
        let base = self.base();
        if addr < base || addr + len > base + self.len {
            return Err(FaultError::OutOfRange(addr, len));
        }
        Ok(unsafe { self.base.add(addr - base) })
    }

    fn protect(&self, addr: PageAddr, len: usize, prot: c_int) -> FaultResult<()> {
        let ptr = self.check_range(addr, len)?;
        let result = unsafe { libc::mprotect(ptr as *mut c_void, len as size_t, prot) };

        if result < 0 {
            let errno = unsafe { *libc::__errno_location() };
            Err(FaultError::SystemError(errno, "mprotect failed".to_string()))
        } else {
            Ok(())
        }
    }
}

impl FaultHandler for MappedMemory {
    fn install(&self, page: PageAddr, data: &[u8], write_protect: bool) -> FaultResult<()> {
        let ptr = self.check_range(page, data.len())?;
        self.protect(page, data.len(), libc::PROT_READ | libc::PROT_WRITE)?;
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };
        if write_protect {
            self.protect(page, data.len(), libc::PROT_READ)?;
        }
        Ok(())
    }

    fn write_protect(&self, page: PageAddr, len: usize) -> FaultResult<()> {
        self.protect(page, len, libc::PROT_READ)
    }

    fn write_unprotect(&self, page: PageAddr, len: usize) -> FaultResult<()> {
        self.protect(page, len, libc::PROT_READ | libc::PROT_WRITE)
    }

    fn read_page(&self, page: PageAddr, buf: &mut [u8]) -> FaultResult<()> {
        let ptr = self.check_range(page, buf.len())?;
        unsafe { ptr::copy_nonoverlapping(ptr as *const u8, buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    fn release(&self, page: PageAddr, len: usize) -> FaultResult<()> {
        let ptr = self.check_range(page, len)?;
        let result =
            unsafe { libc::madvise(ptr as *mut c_void, len as size_t, libc::MADV_DONTNEED) };

        if result < 0 {
            let errno = unsafe { *libc::__errno_location() };
            return Err(FaultError::SystemError(errno, "madvise failed".to_string()));
        }
        self.protect(page, len, libc::PROT_NONE)
    }
}

impl Drop for MappedMemory {
    fn drop(&mut self) {
        let _ = unsafe { libc::munmap(self.base as *mut c_void, self.len as size_t) };
    }
}
