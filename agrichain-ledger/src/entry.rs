use agrichain_core::actor::Role;
use agrichain_core::batch::{BatchState, QualityAttestation, ReasonCode, Timestamp};
use agrichain_core::error::LedgerError;
use agrichain_core::id::{ActorId, BatchId};
use agrichain_core::quantity::{PricePerKg, Quantity};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Position of an entry in the log.
pub type SequenceNumber = u64;

/// SHA-256 hash of a ledger entry.
pub type EntryHash = [u8; 32];

/// Sentinel `prev_hash` carried by the genesis entry.
pub const GENESIS_PREV_HASH: EntryHash = [0u8; 32];

/// Opaque authorization token supplied by the external identity service.
///
/// The ledger records the token and the role claim verbatim and commits to
/// both in the entry hash; it never issues or validates credentials, only
/// checks the role claim against the permission table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorSignature {
    pub actor_id: ActorId,
    pub role: Role,
    pub token: Vec<u8>,
}

impl ActorSignature {
    pub fn new(actor_id: ActorId, role: Role, token: Vec<u8>) -> Self {
        Self {
            actor_id,
            role,
            token,
        }
    }
}

impl fmt::Display for ActorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix_len = self.token.len().min(6);
        write!(
            f,
            "sig:{}:{}",
            self.actor_id,
            hex::encode(&self.token[..prefix_len])
        )
    }
}

/// One child allocation inside a split entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitAllocation {
    pub child_id: BatchId,
    pub holder: ActorId,
    pub quantity: Quantity,
}

/// Payload of a ledger entry: one custody or state event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// A farmer registered a new batch.
    BatchCreated {
        batch_id: BatchId,
        crop_type: String,
        quantity: Quantity,
        origin_actor: ActorId,
        harvest_date: Option<String>,
        timestamp: Timestamp,
    },

    /// Custody handed from the current holder to another actor, optionally
    /// changing state in the same atomic entry.
    CustodyTransferred {
        batch_id: BatchId,
        from_actor: ActorId,
        to_actor: ActorId,
        /// Role claim of the incoming custodian; gates any carried state.
        to_role: Role,
        new_state: Option<BatchState>,
        price_per_kg: Option<PricePerKg>,
        timestamp: Timestamp,
    },

    /// The holder moved the batch along the state progression.
    StateChanged {
        batch_id: BatchId,
        actor: ActorId,
        from_state: BatchState,
        to_state: BatchState,
        /// Required when `to_state` is `Rejected`.
        reason: Option<ReasonCode>,
        price_per_kg: Option<PricePerKg>,
        timestamp: Timestamp,
    },

    /// A certifying actor attested the batch's quality.
    QualityAttested {
        batch_id: BatchId,
        attestation: QualityAttestation,
    },

    /// The holder decomposed the batch into child batches; all children
    /// are carried by this single entry so no reader observes a partial
    /// split.
    BatchSplit {
        parent_id: BatchId,
        actor: ActorId,
        allocations: Vec<SplitAllocation>,
        timestamp: Timestamp,
    },

    /// The holder reconstituted a batch from the complete sibling set of
    /// one split.
    BatchMerged {
        merged_id: BatchId,
        parent_id: BatchId,
        source_ids: Vec<BatchId>,
        actor: ActorId,
        quantity: Quantity,
        state: BatchState,
        timestamp: Timestamp,
    },
}

impl EntryPayload {
    /// The primary batch this payload applies to.
    pub fn batch_id(&self) -> &BatchId {
        match self {
            EntryPayload::BatchCreated { batch_id, .. } => batch_id,
            EntryPayload::CustodyTransferred { batch_id, .. } => batch_id,
            EntryPayload::StateChanged { batch_id, .. } => batch_id,
            EntryPayload::QualityAttested { batch_id, .. } => batch_id,
            EntryPayload::BatchSplit { parent_id, .. } => parent_id,
            EntryPayload::BatchMerged { merged_id, .. } => merged_id,
        }
    }

    /// Every batch id this payload touches; used to scope traces.
    ///
    /// A split names the parent and all children; a merge names the merged
    /// batch and its sources (not the grandparent, so sibling traces stay
    /// disjoint).
    pub fn batch_ids(&self) -> Vec<BatchId> {
        match self {
            EntryPayload::BatchCreated { batch_id, .. }
            | EntryPayload::CustodyTransferred { batch_id, .. }
            | EntryPayload::StateChanged { batch_id, .. }
            | EntryPayload::QualityAttested { batch_id, .. } => vec![batch_id.clone()],
            EntryPayload::BatchSplit {
                parent_id,
                allocations,
                ..
            } => {
                let mut ids = vec![parent_id.clone()];
                ids.extend(allocations.iter().map(|a| a.child_id.clone()));
                ids
            }
            EntryPayload::BatchMerged {
                merged_id,
                source_ids,
                ..
            } => {
                let mut ids = vec![merged_id.clone()];
                ids.extend(source_ids.iter().cloned());
                ids
            }
        }
    }

    /// The acting actor recorded in this payload.
    pub fn actor(&self) -> &ActorId {
        match self {
            EntryPayload::BatchCreated { origin_actor, .. } => origin_actor,
            EntryPayload::CustodyTransferred { from_actor, .. } => from_actor,
            EntryPayload::StateChanged { actor, .. } => actor,
            EntryPayload::QualityAttested { attestation, .. } => &attestation.certified_by,
            EntryPayload::BatchSplit { actor, .. } => actor,
            EntryPayload::BatchMerged { actor, .. } => actor,
        }
    }

    /// Short payload kind for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            EntryPayload::BatchCreated { .. } => "batch_created",
            EntryPayload::CustodyTransferred { .. } => "custody_transferred",
            EntryPayload::StateChanged { .. } => "state_changed",
            EntryPayload::QualityAttested { .. } => "quality_attested",
            EntryPayload::BatchSplit { .. } => "batch_split",
            EntryPayload::BatchMerged { .. } => "batch_merged",
        }
    }
}

/// One immutable record in the hash chain.
///
/// The entry hash commits to the sequence number, the previous entry's
/// hash, the payload bytes, and the actor signature. Verifiers always
/// recompute it; the stored value is a convenience, never trusted input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence_number: SequenceNumber,
    pub prev_hash: EntryHash,
    pub payload: EntryPayload,
    pub actor_signature: ActorSignature,
    pub entry_hash: EntryHash,
}

impl LedgerEntry {
    /// Build an entry, computing its hash over the other four fields.
    pub fn new(
        sequence_number: SequenceNumber,
        prev_hash: EntryHash,
        payload: EntryPayload,
        actor_signature: ActorSignature,
    ) -> Result<Self, LedgerError> {
        let entry_hash =
            Self::compute_hash(sequence_number, &prev_hash, &payload, &actor_signature)?;
        Ok(Self {
            sequence_number,
            prev_hash,
            payload,
            actor_signature,
            entry_hash,
        })
    }

    /// Hash over (sequence_number, prev_hash, payload, actor_signature).
    pub fn compute_hash(
        sequence_number: SequenceNumber,
        prev_hash: &EntryHash,
        payload: &EntryPayload,
        actor_signature: &ActorSignature,
    ) -> Result<EntryHash, LedgerError> {
        let mut hasher = Sha256::new();
        hasher.update(sequence_number.to_le_bytes());
        hasher.update(prev_hash);
        hasher.update(bincode::serialize(payload)?);
        hasher.update(bincode::serialize(actor_signature)?);

        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        Ok(hash)
    }

    /// Recompute this entry's hash from its fields.
    pub fn recompute_hash(&self) -> Result<EntryHash, LedgerError> {
        Self::compute_hash(
            self.sequence_number,
            &self.prev_hash,
            &self.payload,
            &self.actor_signature,
        )
    }
}
