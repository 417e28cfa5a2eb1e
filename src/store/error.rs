//! Store error definitions

use std::error::Error;
use std::fmt;

/// Store error types
#[derive(Debug)]
pub enum StoreError {
    /// Permission denied error
    PermissionDenied(String),
    /// Backing file not found error
    NotFound(String),
    /// Invalid argument error
    InvalidArgument(String),
    /// I/O error
    IoError(std::io::Error),
    /// System call error with error code
    SystemError(i32, String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::PermissionDenied(path) => write!(f, "Permission denied: {}", path),
            StoreError::NotFound(path) => write!(f, "Backing file not found: {}", path),
            StoreError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            StoreError::IoError(err) => write!(f, "I/O error: {}", err),
            StoreError::SystemError(errno, msg) => {
                write!(f, "System error (errno {}): {}", errno, msg)
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::IoError(err)
    }
}

impl From<std::ffi::NulError> for StoreError {
    fn from(err: std::ffi::NulError) -> Self {
        StoreError::InvalidArgument(err.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
