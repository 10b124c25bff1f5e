//! Remote status store: the trait, the HTTP backend, and a test double.

#[cfg(test)]
pub mod memory;
pub mod rest;
pub mod traits;

#[cfg(test)]
pub use memory::MemoryStore;
pub use rest::RestStore;
pub use traits::{RemoteStore, Table};
