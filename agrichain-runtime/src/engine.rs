use crate::registry::BatchRegistry;
use agrichain_core::actor::Role;
use agrichain_core::batch::{
    Batch, BatchState, QualityAttestation, QualityGrade, ReasonCode, Timestamp,
};
use agrichain_core::error::LedgerError;
use agrichain_core::id::{ActorId, BatchId};
use agrichain_core::quantity::{PricePerKg, Quantity};
use agrichain_ledger::chain::HashChainLog;
use agrichain_ledger::entry::{ActorSignature, EntryPayload, LedgerEntry};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Bounded retries for the optimistic append loop before surfacing
/// contention to the caller.
const MAX_APPEND_RETRIES: u32 = 5;

/// Get the current timestamp in seconds
pub(crate) fn current_timestamp() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A requested custody or state change, as accepted at the write boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeRequest {
    /// Move the batch forward along the state progression.
    AdvanceState {
        to: BatchState,
        price_per_kg: Option<PricePerKg>,
    },

    /// Hand custody to another actor, optionally changing state in the
    /// same atomic entry.
    Transfer {
        to_actor: ActorId,
        /// Role claim of the incoming custodian.
        to_role: Role,
        new_state: Option<BatchState>,
        price_per_kg: Option<PricePerKg>,
    },

    /// Reject the batch, recording why.
    Reject { reason: ReasonCode },

    /// Record a third-party quality attestation.
    AttestQuality {
        grade: QualityGrade,
        certificate: String,
        notes: Option<String>,
    },
}

/// Validates and applies custody/state changes against the registry and
/// the static role permission table, emitting one ledger entry per
/// committed change.
pub struct TransitionEngine {
    log: Arc<HashChainLog>,
    registry: Arc<BatchRegistry>,
}

impl TransitionEngine {
    pub fn new(log: Arc<HashChainLog>, registry: Arc<BatchRegistry>) -> Self {
        Self { log, registry }
    }

    pub fn log(&self) -> &Arc<HashChainLog> {
        &self.log
    }

    pub fn registry(&self) -> &Arc<BatchRegistry> {
        &self.registry
    }

    /// Register a new batch. Farmers only; batch ids are caller-assigned
    /// and must be unused.
    pub fn create_batch(
        &self,
        signature: &ActorSignature,
        batch_id: BatchId,
        crop_type: String,
        quantity: Quantity,
        harvest_date: Option<String>,
    ) -> Result<LedgerEntry, LedgerError> {
        if !signature.role.may_drive(BatchState::Created) {
            return Err(LedgerError::Transition(format!(
                "role {} may not create batches",
                signature.role
            )));
        }
        if quantity.is_zero() {
            return Err(LedgerError::Transition(
                "batch quantity must be positive".to_string(),
            ));
        }

        let entry = self.commit(signature, |registry| {
            if registry.contains(&batch_id) {
                return Err(LedgerError::Transition(format!(
                    "batch {} already exists",
                    batch_id
                )));
            }
            Ok(EntryPayload::BatchCreated {
                batch_id: batch_id.clone(),
                crop_type: crop_type.clone(),
                quantity,
                origin_actor: signature.actor_id.clone(),
                harvest_date: harvest_date.clone(),
                timestamp: current_timestamp(),
            })
        })?;
        info!("batch {} created by {}", batch_id, signature.actor_id);
        Ok(entry)
    }

    /// Validate and commit one custody/state change for `batch_id`.
    pub fn request_transition(
        &self,
        batch_id: &BatchId,
        signature: &ActorSignature,
        change: ChangeRequest,
    ) -> Result<LedgerEntry, LedgerError> {
        self.commit(signature, |registry| {
            let batch = registry.get(batch_id)?;
            Self::validate(&batch, signature, &change)?;
            Ok(Self::build_payload(&batch, signature, &change))
        })
    }

    /// Optimistic compare-and-append shared by all writers.
    ///
    /// Each attempt snapshots the tail, catches the registry up to at
    /// least that point, validates by rebuilding the payload, and appends
    /// against the snapshotted tail. A tail race fails the append with an
    /// integrity error and the attempt repeats against the new tail, so at
    /// most one transition commits per logical tail. The retry budget
    /// bounds the loop; exhausting it surfaces contention.
    pub(crate) fn commit<F>(
        &self,
        signature: &ActorSignature,
        build: F,
    ) -> Result<LedgerEntry, LedgerError>
    where
        F: Fn(&BatchRegistry) -> Result<EntryPayload, LedgerError>,
    {
        for attempt in 0..MAX_APPEND_RETRIES {
            let (_, tail_hash) = self.log.tail();
            self.registry.catch_up(&self.log)?;
            let payload = build(&self.registry)?;

            match self.log.append(tail_hash, payload, signature.clone()) {
                Ok(entry) => {
                    self.registry.catch_up(&self.log)?;
                    return Ok(entry);
                }
                Err(LedgerError::Integrity { .. }) => {
                    debug!(
                        "append lost tail race (attempt {} of {}), retrying",
                        attempt + 1,
                        MAX_APPEND_RETRIES
                    );
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        Err(LedgerError::Contention(format!(
            "append retry budget ({}) exhausted",
            MAX_APPEND_RETRIES
        )))
    }

    fn validate(
        batch: &Batch,
        signature: &ActorSignature,
        change: &ChangeRequest,
    ) -> Result<(), LedgerError> {
        if batch.is_frozen() {
            return Err(LedgerError::BatchFrozen(frozen_detail(batch)));
        }

        match change {
            ChangeRequest::AdvanceState { to, .. } => {
                if *to == BatchState::Rejected {
                    return Err(LedgerError::Transition(
                        "rejection requires a reason code".to_string(),
                    ));
                }
                Self::require_custody(batch, signature)?;
                if !signature.role.may_drive(*to) {
                    return Err(LedgerError::Transition(format!(
                        "role {} may not drive batch {} into {}",
                        signature.role, batch.batch_id, to
                    )));
                }
                Self::require_forward(batch, *to)?;
            }

            ChangeRequest::Transfer {
                to_actor,
                to_role,
                new_state,
                ..
            } => {
                Self::require_custody(batch, signature)?;
                if to_actor == &batch.current_holder {
                    return Err(LedgerError::Transition(format!(
                        "batch {} is already held by {}",
                        batch.batch_id, to_actor
                    )));
                }
                if let Some(state) = new_state {
                    if *state == BatchState::Rejected {
                        return Err(LedgerError::Transition(
                            "transfers cannot reject; use a rejection with a reason code"
                                .to_string(),
                        ));
                    }
                    // The carried state is gated against the incoming
                    // custodian's role: they will hold the batch in it.
                    if !to_role.may_drive(*state) {
                        return Err(LedgerError::Transition(format!(
                            "recipient role {} may not hold batch {} in {}",
                            to_role, batch.batch_id, state
                        )));
                    }
                    Self::require_forward(batch, *state)?;
                }
            }

            ChangeRequest::Reject { .. } => {
                Self::require_custody(batch, signature)?;
            }

            ChangeRequest::AttestQuality { .. } => {
                // Certifiers are third parties; custody is not required.
                if !signature.role.may_drive(BatchState::QualityChecked) {
                    return Err(LedgerError::Transition(format!(
                        "role {} may not attest quality",
                        signature.role
                    )));
                }
            }
        }
        Ok(())
    }

    fn require_custody(batch: &Batch, signature: &ActorSignature) -> Result<(), LedgerError> {
        if batch.current_holder != signature.actor_id {
            return Err(LedgerError::Transition(format!(
                "{} does not hold batch {} (held by {})",
                signature.actor_id, batch.batch_id, batch.current_holder
            )));
        }
        Ok(())
    }

    fn require_forward(batch: &Batch, to: BatchState) -> Result<(), LedgerError> {
        if !batch.state.can_advance_to(to) {
            return Err(LedgerError::Transition(format!(
                "batch {} cannot move from {} to {}",
                batch.batch_id, batch.state, to
            )));
        }
        Ok(())
    }

    fn build_payload(
        batch: &Batch,
        signature: &ActorSignature,
        change: &ChangeRequest,
    ) -> EntryPayload {
        match change {
            ChangeRequest::AdvanceState { to, price_per_kg } => EntryPayload::StateChanged {
                batch_id: batch.batch_id.clone(),
                actor: signature.actor_id.clone(),
                from_state: batch.state,
                to_state: *to,
                reason: None,
                price_per_kg: *price_per_kg,
                timestamp: current_timestamp(),
            },
            ChangeRequest::Transfer {
                to_actor,
                to_role,
                new_state,
                price_per_kg,
            } => EntryPayload::CustodyTransferred {
                batch_id: batch.batch_id.clone(),
                from_actor: batch.current_holder.clone(),
                to_actor: to_actor.clone(),
                to_role: *to_role,
                new_state: *new_state,
                price_per_kg: *price_per_kg,
                timestamp: current_timestamp(),
            },
            ChangeRequest::Reject { reason } => EntryPayload::StateChanged {
                batch_id: batch.batch_id.clone(),
                actor: signature.actor_id.clone(),
                from_state: batch.state,
                to_state: BatchState::Rejected,
                reason: Some(reason.clone()),
                price_per_kg: None,
                timestamp: current_timestamp(),
            },
            ChangeRequest::AttestQuality {
                grade,
                certificate,
                notes,
            } => EntryPayload::QualityAttested {
                batch_id: batch.batch_id.clone(),
                attestation: QualityAttestation {
                    grade: *grade,
                    certified_by: signature.actor_id.clone(),
                    certificate: certificate.clone(),
                    notes: notes.clone(),
                    timestamp: current_timestamp(),
                },
            },
        }
    }
}

fn frozen_detail(batch: &Batch) -> String {
    if batch.has_children() {
        format!("batch {} has been split", batch.batch_id)
    } else if let Some(merged_into) = &batch.merged_into {
        format!("batch {} was merged into {}", batch.batch_id, merged_into)
    } else {
        format!("batch {} is in terminal state {}", batch.batch_id, batch.state)
    }
}
