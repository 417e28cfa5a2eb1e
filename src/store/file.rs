//! File-backed store using glibc system calls

use crate::store::error::{StoreError, StoreResult};
use crate::store::interface::Store;
use libc::{self, c_int, c_void, mode_t, off_t, size_t};
use std::path::{Path, PathBuf};

/// Store backed by a local file, accessed with pread/pwrite
pub struct FileStore {
    fd: c_int,
    path: PathBuf,
}

impl FileStore {
    /// Open an existing file for reading and writing
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_internal(path.as_ref(), libc::O_RDWR, 0)
    }

    /// Create (or truncate) a file of `length` bytes
    pub fn create(path: impl AsRef<Path>, length: u64) -> StoreResult<Self> {
        let store = Self::open_internal(
            path.as_ref(),
            libc::O_CREAT | libc::O_RDWR | libc::O_TRUNC,
            0o644,
        )?;
        store.truncate(length)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resize the backing file
    pub fn truncate(&self, length: u64) -> StoreResult<()> {
        let result = unsafe { libc::ftruncate(self.fd, length as off_t) };

        if result < 0 {
            let errno = unsafe { *libc::__errno_location() };
            Err(StoreError::SystemError(errno, "ftruncate failed".to_string()))
        } else {
            Ok(())
        }
    }

    /// Flush file content to stable storage
    pub fn sync(&self) -> StoreResult<()> {
        let result = unsafe { libc::fsync(self.fd) };

        if result < 0 {
            let errno = unsafe { *libc::__errno_location() };
            Err(StoreError::SystemError(errno, "fsync failed".to_string()))
        } else {
            Ok(())
        }
    }

    fn open_internal(path: &Path, flags: c_int, mode: mode_t) -> StoreResult<Self> {
        let path_str = path
            .to_str()
            .ok_or_else(|| StoreError::InvalidArgument(format!("{:?} is not UTF-8", path)))?;
        // Create CString in scope so it lives during the system call
        let c_path = std::ffi::CString::new(path_str)?;

        let fd = unsafe { libc::open(c_path.as_ptr(), flags | libc::O_CLOEXEC, mode as c_int) };

        if fd < 0 {
            let errno = unsafe { *libc::__errno_location() };
            match errno {
                libc::ENOENT => Err(StoreError::NotFound(path_str.to_string())),
                libc::EACCES | libc::EPERM => {
                    Err(StoreError::PermissionDenied(path_str.to_string()))
                }
                _ => Err(StoreError::SystemError(
                    errno,
                    format!("open failed for path '{}'", path_str),
                )),
            }
        } else {
            Ok(FileStore {
                fd,
                path: path.to_path_buf(),
            })
        }
    }
}

impl Store for FileStore {
    fn read_from_store(&self, buf: &mut [u8], offset: u64) -> StoreResult<usize> {
        let mut done = 0;
        // pread may return short counts before EOF, loop until EOF or full
        while done < buf.len() {
            let result = unsafe {
                libc::pread(
                    self.fd,
                    buf[done..].as_mut_ptr() as *mut c_void,
                    (buf.len() - done) as size_t,
                    (offset + done as u64) as off_t,
                )
            };

            if result < 0 {
                let errno = unsafe { *libc::__errno_location() };
                if errno == libc::EINTR {
                    continue;
                }
                return Err(StoreError::SystemError(errno, "pread failed".to_string()));
            }
            if result == 0 {
                break;
            }
            done += result as usize;
        }
        Ok(done)
    }

    fn write_to_store(&self, buf: &[u8], offset: u64) -> StoreResult<usize> {
        write_all_at(buf, offset, |chunk, at| unsafe {
            libc::pwrite(
                self.fd,
                chunk.as_ptr() as *const c_void,
                chunk.len() as size_t,
                at as off_t,
            )
        })
    }
}

/// Drives a pwrite-like call until `buf` is fully written
pub(crate) fn write_all_at<F>(buf: &[u8], offset: u64, mut pwrite: F) -> StoreResult<usize>
where
    F: FnMut(&[u8], u64) -> isize,
{
    let mut done = 0;
    while done < buf.len() {
        let result = pwrite(&buf[done..], offset + done as u64);

        if result < 0 {
            let errno = unsafe { *libc::__errno_location() };
            if errno == libc::EINTR {
                continue;
            }
            return Err(StoreError::SystemError(errno, "pwrite failed".to_string()));
        }
        // A zero count on a non-empty buffer would never advance
        if result == 0 {
            return Err(StoreError::SystemError(libc::EIO, "pwrite made no progress".to_string()));
        }
        done += result as usize;
    }
    Ok(done)
}

impl Drop for FileStore {
    fn drop(&mut self) {
        let _ = unsafe { libc::close(self.fd) };
    }
}
