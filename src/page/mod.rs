//! Page module
//!
//! Contains the per-slot page descriptor and its state machine.

pub mod descriptor;

// Re-export descriptor items for easier access
pub use descriptor::PageDescriptor;
pub use descriptor::PageState;

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
