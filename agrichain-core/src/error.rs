use crate::quantity::Quantity;
use std::io;
use thiserror::Error;

/// Represents all possible errors surfaced by the provenance ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Unknown batch or actor; surfaced to the caller, never retried
    #[error("not found: {0}")]
    NotFound(String),

    /// Hash-chain tail mismatch, raised when a concurrent append won the
    /// race or a link fails verification
    #[error("integrity error: expected hash {expected}, found {found}")]
    Integrity { expected: String, found: String },

    /// Illegal state or role transition; the caller must correct the
    /// request
    #[error("illegal transition: {0}")]
    Transition(String),

    /// Write attempted on a frozen batch (split parent, merge source, or
    /// terminal state)
    #[error("batch is frozen: {0}")]
    BatchFrozen(String),

    /// Split/merge conservation violated; rejected before any log write
    #[error("quantity mismatch: expected {expected}, found {found}")]
    QuantityMismatch { expected: Quantity, found: Quantity },

    /// Append retry budget exhausted under load; retryable by the caller
    #[error("contention: {0}")]
    Contention(String),

    /// IO errors from the underlying store
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Errors from the append-only store that fit no other category
    #[error("store error: {0}")]
    Store(String),

    /// Anyhow error wrapper for error context
    #[error(transparent)]
    Context(#[from] anyhow::Error),
}

impl From<bincode::Error> for LedgerError {
    fn from(err: bincode::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl LedgerError {
    /// Whether the caller may usefully retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Integrity { .. } | LedgerError::Contention(_)
        )
    }
}
