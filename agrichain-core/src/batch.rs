use crate::id::{ActorId, BatchId};
use crate::quantity::{PricePerKg, Quantity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Lifecycle state of a batch.
///
/// States form a forward progression from `Created` to `Sold`; `Rejected`
/// sits outside the progression and is reachable from any non-terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchState {
    Created,
    QualityChecked,
    InStorage,
    InTransit,
    Received,
    Sold,
    Rejected,
}

impl BatchState {
    /// Position along the forward progression, `None` for `Rejected`.
    pub fn progression(&self) -> Option<u8> {
        match self {
            BatchState::Created => Some(0),
            BatchState::QualityChecked => Some(1),
            BatchState::InStorage => Some(2),
            BatchState::InTransit => Some(3),
            BatchState::Received => Some(4),
            BatchState::Sold => Some(5),
            BatchState::Rejected => None,
        }
    }

    /// Terminal states accept no further transitions; the record persists
    /// permanently for audit.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Sold | BatchState::Rejected)
    }

    /// Whether a batch may move from `self` to `to`, ignoring role gating
    /// and custody.
    ///
    /// Forward moves along the progression are legal, skips included;
    /// regression never is. `Rejected` is reachable from any non-terminal
    /// state.
    pub fn can_advance_to(&self, to: BatchState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            BatchState::Rejected => true,
            _ => match (self.progression(), to.progression()) {
                (Some(from), Some(target)) => target > from,
                _ => false,
            },
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Created => "created",
            BatchState::QualityChecked => "quality_checked",
            BatchState::InStorage => "in_storage",
            BatchState::InTransit => "in_transit",
            BatchState::Received => "received",
            BatchState::Sold => "sold",
            BatchState::Rejected => "rejected",
        };
        write!(f, "{}", name)
    }
}

/// Quality grade taxonomy used on attestation certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityGrade {
    /// Premium
    A,
    /// Standard
    B,
    /// Below standard
    C,
}

impl fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let grade = match self {
            QualityGrade::A => "A",
            QualityGrade::B => "B",
            QualityGrade::C => "C",
        };
        write!(f, "Grade {}", grade)
    }
}

/// One quality attestation record.
///
/// Batches accumulate attestations over their life; records are appended,
/// never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityAttestation {
    pub grade: QualityGrade,

    /// The certifying actor (a third party, not necessarily the holder).
    pub certified_by: ActorId,

    /// Opaque content id of the certificate document, stored externally.
    pub certificate: String,

    /// Free-text assessment notes, if any.
    pub notes: Option<String>,

    pub timestamp: Timestamp,
}

/// One custody price observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEvent {
    pub actor: ActorId,
    pub price_per_kg: PricePerKg,
    pub timestamp: Timestamp,
}

/// Reason attached to a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonCode {
    QualityFailure,
    Damaged,
    Expired,
    Other(String),
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonCode::QualityFailure => write!(f, "quality_failure"),
            ReasonCode::Damaged => write!(f, "damaged"),
            ReasonCode::Expired => write!(f, "expired"),
            ReasonCode::Other(detail) => write!(f, "other: {}", detail),
        }
    }
}

/// Materialized state of one traceable batch.
///
/// Batches are derived by folding ledger entries; nothing here is mutated
/// except through the registry's fold. `quantity` changes only via split
/// and merge, never by direct edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: BatchId,

    /// Set at creation, immutable.
    pub crop_type: String,

    pub quantity: Quantity,

    /// One-way historical pointer to the batch this was split (or merged)
    /// from.
    pub parent_id: Option<BatchId>,

    /// The farmer who created the originating batch, immutable.
    pub origin_actor: ActorId,

    /// ISO-8601 date recorded by the farmer at creation.
    pub harvest_date: Option<String>,

    /// The actor currently in custody; mutated only by successful
    /// transfers and split allocations.
    pub current_holder: ActorId,

    pub state: BatchState,

    /// Append-only attestation history.
    pub quality_grade: Vec<QualityAttestation>,

    /// Append-only custody price history.
    pub price_events: Vec<PriceEvent>,

    /// Child ids once this batch has been split; a non-empty list freezes
    /// the batch.
    pub children: Vec<BatchId>,

    /// Set on source siblings consumed by a merge; freezes the batch.
    pub merged_into: Option<BatchId>,

    /// Source siblings a merged batch was reconstituted from.
    pub merged_from: Vec<BatchId>,
}

impl Batch {
    /// A freshly created batch in `Created` state, held by its origin
    /// farmer.
    pub fn new(
        batch_id: BatchId,
        crop_type: String,
        quantity: Quantity,
        origin_actor: ActorId,
        harvest_date: Option<String>,
    ) -> Self {
        Self {
            batch_id,
            crop_type,
            quantity,
            parent_id: None,
            current_holder: origin_actor.clone(),
            origin_actor,
            harvest_date,
            state: BatchState::Created,
            quality_grade: Vec::new(),
            price_events: Vec::new(),
            children: Vec::new(),
            merged_into: None,
            merged_from: Vec::new(),
        }
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Frozen batches accept no further transitions: split parents,
    /// merge sources, and batches in a terminal state.
    pub fn is_frozen(&self) -> bool {
        self.has_children() || self.merged_into.is_some() || self.state.is_terminal()
    }

    /// The most recent quality attestation, if any.
    pub fn latest_grade(&self) -> Option<&QualityAttestation> {
        self.quality_grade.last()
    }
}
