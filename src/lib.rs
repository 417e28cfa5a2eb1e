//! Pagebuf: user-space demand paging buffer

// Global type definitions
pub mod types;

// Import various modules
pub mod buffer;
pub mod config;
pub mod context;
pub mod engine;
pub mod evict;
pub mod fault;
pub mod fill;
pub mod page;
pub mod region;
pub mod store;
pub mod worker;

#[cfg(test)]
mod testing;

// Re-export the main entry points for easier access
pub use buffer::Buffer;
pub use config::BufferConfig;
pub use engine::PageEngine;
pub use fault::{FaultHandler, MappedMemory};
pub use region::Region;
pub use store::{FileStore, MemoryStore, Store};
pub use types::{PagebufError, PagebufResult};
