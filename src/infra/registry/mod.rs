//! Registry storage backends.

pub mod memory;

pub use memory::InMemoryRegistry;
