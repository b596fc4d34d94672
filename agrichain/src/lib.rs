//! AgriChain batch provenance ledger
//!
//! This crate re-exports all the components of the ledger: the core data
//! model, the hash-chain log, the append-only stores, and the runtime
//! services.

pub use agrichain_core::*;
pub use agrichain_ledger::*;
pub use agrichain_runtime::*;
pub use agrichain_storage::*;
