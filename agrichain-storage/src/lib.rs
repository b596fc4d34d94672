//! Append-only entry stores beneath the AgriChain hash-chain log.
//!
//! The `EntryStore` trait itself lives in `agrichain-ledger`; this crate
//! provides the in-memory and file-backed implementations.

pub mod file;
pub mod memory;

// Re-export the main types for convenience
pub use file::FileEntryStore;
pub use memory::MemoryEntryStore;
