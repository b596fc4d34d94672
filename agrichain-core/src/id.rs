use serde::{Deserialize, Serialize};
use std::fmt;

// BatchId uniquely identifies one traceable unit of goods ("BCH001").
// Assigned at creation and immutable; ids of split children and merged
// batches are derived deterministically from the parent id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchId(String);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BatchId {
    fn from(id: &str) -> Self {
        BatchId(id.to_string())
    }
}

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        BatchId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the id of the `index`-th child produced by splitting this
    /// batch (0-based allocation order).
    ///
    /// The first 26 children carry letter suffixes ("BCH001-A"); beyond
    /// that the suffix falls back to the 1-based ordinal ("BCH001-27").
    pub fn child(&self, index: usize) -> BatchId {
        if index < 26 {
            BatchId(format!("{}-{}", self.0, (b'A' + index as u8) as char))
        } else {
            BatchId(format!("{}-{}", self.0, index + 1))
        }
    }

    /// Derive the id of a batch reconstituted by merging this batch's
    /// children back together.
    pub fn merged(&self) -> BatchId {
        BatchId(format!("{}-M", self.0))
    }
}

/// Identifier of a supply-chain participant ("F1", "D1", "R1").
///
/// Issued by the external identity service; the ledger treats it as an
/// opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(String);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActorId {
    fn from(id: &str) -> Self {
        ActorId(id.to_string())
    }
}

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        ActorId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
