pub mod chain;
pub mod entry;

// Re-export the main types for convenience
pub use chain::{verify_entries, ChainVerification, EntryStore, HashChainLog};
pub use entry::{
    ActorSignature, EntryHash, EntryPayload, LedgerEntry, SequenceNumber, SplitAllocation,
    GENESIS_PREV_HASH,
};
