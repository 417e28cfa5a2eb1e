//! Store module
//!
//! This module provides the backing-store interface used to fill and write back
//! pages, with a local file implementation that wraps glibc system calls and an
//! in-memory implementation.

// Re-export error types and result type
pub mod error;
pub use error::{StoreError, StoreResult};

// Re-export interface traits
pub mod interface;
pub use interface::Store;

// Re-export store implementations
pub mod file;
pub use file::FileStore;

pub mod memory;
pub use memory::MemoryStore;
