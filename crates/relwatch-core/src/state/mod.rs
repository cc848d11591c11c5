// # Store Implementations
//
// This module provides implementations of the RelationStore,
// RegistrationStore and ProfileStore traits for different persistence
// strategies. Each store implements all three.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
