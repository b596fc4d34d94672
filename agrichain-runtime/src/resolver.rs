use crate::engine::{current_timestamp, TransitionEngine};
use agrichain_core::batch::Batch;
use agrichain_core::error::LedgerError;
use agrichain_core::id::{ActorId, BatchId};
use agrichain_core::quantity::Quantity;
use agrichain_ledger::entry::{ActorSignature, EntryPayload, SplitAllocation};
use log::info;
use std::sync::Arc;

/// Quantity-conserving decomposition and recomposition of batches.
///
/// A split or merge is one multi-batch ledger entry, committed through the
/// engine's optimistic append loop, so readers never observe a partial
/// result.
pub struct SplitMergeResolver {
    engine: Arc<TransitionEngine>,
}

impl SplitMergeResolver {
    pub fn new(engine: Arc<TransitionEngine>) -> Self {
        Self { engine }
    }

    /// Split `parent_id` into one child batch per allocation, in
    /// allocation order.
    ///
    /// The allocation quantities must sum to the parent quantity exactly;
    /// a mismatch is rejected before anything reaches the log and leaves
    /// the parent unchanged. On success the parent is frozen and every
    /// child exists, holding its allocated quantity.
    pub fn split(
        &self,
        parent_id: &BatchId,
        signature: &ActorSignature,
        allocations: &[(ActorId, Quantity)],
    ) -> Result<Vec<Batch>, LedgerError> {
        if allocations.len() < 2 {
            return Err(LedgerError::Transition(
                "a split requires at least two allocations".to_string(),
            ));
        }

        let entry = self.engine.commit(signature, |registry| {
            let parent = registry.get(parent_id)?;
            if parent.is_frozen() {
                return Err(LedgerError::BatchFrozen(format!(
                    "batch {} cannot be split",
                    parent_id
                )));
            }
            if parent.current_holder != signature.actor_id {
                return Err(LedgerError::Transition(format!(
                    "{} does not hold batch {} (held by {})",
                    signature.actor_id, parent_id, parent.current_holder
                )));
            }

            let mut total = Quantity::ZERO;
            for (_, quantity) in allocations {
                if quantity.is_zero() {
                    return Err(LedgerError::Transition(
                        "split allocations must be positive".to_string(),
                    ));
                }
                total = total.checked_add(*quantity).ok_or_else(|| {
                    LedgerError::Transition("split allocation total overflows".to_string())
                })?;
            }
            if total != parent.quantity {
                return Err(LedgerError::QuantityMismatch {
                    expected: parent.quantity,
                    found: total,
                });
            }

            let mut split_allocations = Vec::with_capacity(allocations.len());
            for (index, (holder, quantity)) in allocations.iter().enumerate() {
                let child_id = parent_id.child(index);
                if registry.contains(&child_id) {
                    return Err(LedgerError::Transition(format!(
                        "child id {} already exists",
                        child_id
                    )));
                }
                split_allocations.push(SplitAllocation {
                    child_id,
                    holder: holder.clone(),
                    quantity: *quantity,
                });
            }

            Ok(EntryPayload::BatchSplit {
                parent_id: parent_id.clone(),
                actor: signature.actor_id.clone(),
                allocations: split_allocations,
                timestamp: current_timestamp(),
            })
        })?;

        let allocations = match &entry.payload {
            EntryPayload::BatchSplit { allocations, .. } => allocations,
            _ => {
                return Err(LedgerError::Store(
                    "split committed an unexpected payload".to_string(),
                ))
            }
        };
        info!(
            "batch {} split into {} children by {}",
            parent_id,
            allocations.len(),
            signature.actor_id
        );
        allocations
            .iter()
            .map(|allocation| self.engine.registry().get(&allocation.child_id))
            .collect()
    }

    /// Reconstitute a single batch from the complete sibling set of one
    /// split.
    ///
    /// All sources must share one parent, be unfrozen, be held by the
    /// merging actor in the same state, carry identical quality
    /// attestations, and sum exactly to the parent's genesis quantity.
    pub fn merge(
        &self,
        source_ids: &[BatchId],
        signature: &ActorSignature,
    ) -> Result<Batch, LedgerError> {
        if source_ids.len() < 2 {
            return Err(LedgerError::Transition(
                "a merge requires at least two sources".to_string(),
            ));
        }

        let entry = self.engine.commit(signature, |registry| {
            let sources = source_ids
                .iter()
                .map(|id| registry.get(id))
                .collect::<Result<Vec<_>, _>>()?;

            let parent_id = sources[0].parent_id.clone().ok_or_else(|| {
                LedgerError::Transition(format!(
                    "batch {} is not the product of a split",
                    sources[0].batch_id
                ))
            })?;

            for source in &sources {
                if source.parent_id.as_ref() != Some(&parent_id) {
                    return Err(LedgerError::Transition(
                        "merge sources must share one parent".to_string(),
                    ));
                }
                if source.is_frozen() {
                    return Err(LedgerError::BatchFrozen(format!(
                        "batch {} cannot be merged",
                        source.batch_id
                    )));
                }
                if source.current_holder != signature.actor_id {
                    return Err(LedgerError::Transition(format!(
                        "{} does not hold batch {}",
                        signature.actor_id, source.batch_id
                    )));
                }
            }

            let state = sources[0].state;
            if sources.iter().any(|s| s.state != state) {
                return Err(LedgerError::Transition(
                    "merge sources must share one state".to_string(),
                ));
            }
            if sources
                .iter()
                .any(|s| s.quality_grade != sources[0].quality_grade)
            {
                return Err(LedgerError::Transition(
                    "merge sources carry divergent quality attestations".to_string(),
                ));
            }

            let parent = registry.get(&parent_id)?;
            let mut claimed: Vec<BatchId> = source_ids.to_vec();
            claimed.sort();
            claimed.dedup();
            let mut siblings = parent.children.clone();
            siblings.sort();
            if claimed != siblings {
                return Err(LedgerError::Transition(format!(
                    "merge requires the complete sibling set of batch {}",
                    parent_id
                )));
            }

            let mut total = Quantity::ZERO;
            for source in &sources {
                total = total.checked_add(source.quantity).ok_or_else(|| {
                    LedgerError::Transition("merge source total overflows".to_string())
                })?;
            }
            if total != parent.quantity {
                return Err(LedgerError::QuantityMismatch {
                    expected: parent.quantity,
                    found: total,
                });
            }

            let merged_id = parent_id.merged();
            if registry.contains(&merged_id) {
                return Err(LedgerError::Transition(format!(
                    "merged id {} already exists",
                    merged_id
                )));
            }

            Ok(EntryPayload::BatchMerged {
                merged_id,
                parent_id,
                source_ids: claimed,
                actor: signature.actor_id.clone(),
                quantity: total,
                state,
                timestamp: current_timestamp(),
            })
        })?;

        let merged_id = match &entry.payload {
            EntryPayload::BatchMerged { merged_id, .. } => merged_id.clone(),
            _ => {
                return Err(LedgerError::Store(
                    "merge committed an unexpected payload".to_string(),
                ))
            }
        };
        info!(
            "batches merged into {} by {}",
            merged_id, signature.actor_id
        );
        self.engine.registry().get(&merged_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ChangeRequest;
    use crate::registry::BatchRegistry;
    use agrichain_core::actor::Role;
    use agrichain_core::batch::{BatchState, QualityGrade};
    use agrichain_core::error::LedgerError;
    use agrichain_ledger::chain::HashChainLog;
    use agrichain_storage::memory::MemoryEntryStore;

    fn signature(actor: &str, role: Role) -> ActorSignature {
        ActorSignature::new(ActorId::from(actor), role, vec![0xEE])
    }

    fn setup(kg: u64) -> (Arc<TransitionEngine>, SplitMergeResolver) {
        let store = Arc::new(MemoryEntryStore::new());
        let log = Arc::new(HashChainLog::open(store).unwrap());
        let registry = Arc::new(BatchRegistry::new());
        let engine = Arc::new(TransitionEngine::new(log, registry));
        engine
            .create_batch(
                &signature("F1", Role::Farmer),
                BatchId::from("BCH001"),
                "Rice".to_string(),
                Quantity::from_kg(kg),
                Some("2024-03-15".to_string()),
            )
            .unwrap();
        let resolver = SplitMergeResolver::new(engine.clone());
        (engine, resolver)
    }

    #[test]
    fn test_split_conserves_quantity() {
        let (engine, resolver) = setup(500);
        let children = resolver
            .split(
                &BatchId::from("BCH001"),
                &signature("F1", Role::Farmer),
                &[
                    (ActorId::from("R1"), Quantity::from_kg(300)),
                    (ActorId::from("R2"), Quantity::from_kg(200)),
                ],
            )
            .unwrap();

        assert_eq!(children.len(), 2);
        assert_eq!(children[0].batch_id, BatchId::from("BCH001-A"));
        assert_eq!(children[0].quantity, Quantity::from_kg(300));
        assert_eq!(children[0].current_holder, ActorId::from("R1"));
        assert_eq!(children[1].batch_id, BatchId::from("BCH001-B"));
        assert_eq!(children[1].quantity, Quantity::from_kg(200));

        let parent = engine.registry().get(&BatchId::from("BCH001")).unwrap();
        assert!(parent.is_frozen());
        assert_eq!(parent.quantity, Quantity::from_kg(500));
    }

    #[test]
    fn test_mismatched_split_rejected_without_effect() {
        let (engine, resolver) = setup(500);
        let entries_before = engine.log().len().unwrap();

        let result = resolver.split(
            &BatchId::from("BCH001"),
            &signature("F1", Role::Farmer),
            &[
                (ActorId::from("R1"), Quantity::from_kg(300)),
                (ActorId::from("R2"), Quantity::from_kg(100)),
            ],
        );
        assert!(matches!(
            result,
            Err(LedgerError::QuantityMismatch { .. })
        ));

        // Nothing reached the log; the parent is untouched.
        assert_eq!(engine.log().len().unwrap(), entries_before);
        let parent = engine.registry().get(&BatchId::from("BCH001")).unwrap();
        assert!(!parent.is_frozen());
        assert!(!engine.registry().contains(&BatchId::from("BCH001-A")));
    }

    #[test]
    fn test_zero_allocation_rejected() {
        let (_, resolver) = setup(500);
        let result = resolver.split(
            &BatchId::from("BCH001"),
            &signature("F1", Role::Farmer),
            &[
                (ActorId::from("R1"), Quantity::from_kg(500)),
                (ActorId::from("R2"), Quantity::ZERO),
            ],
        );
        assert!(matches!(result, Err(LedgerError::Transition(_))));
    }

    #[test]
    fn test_split_requires_custody() {
        let (_, resolver) = setup(500);
        let result = resolver.split(
            &BatchId::from("BCH001"),
            &signature("D1", Role::Distributor),
            &[
                (ActorId::from("R1"), Quantity::from_kg(300)),
                (ActorId::from("R2"), Quantity::from_kg(200)),
            ],
        );
        assert!(matches!(result, Err(LedgerError::Transition(_))));
    }

    #[test]
    fn test_split_parent_frozen_for_transitions() {
        let (engine, resolver) = setup(500);
        resolver
            .split(
                &BatchId::from("BCH001"),
                &signature("F1", Role::Farmer),
                &[
                    (ActorId::from("F1"), Quantity::from_kg(250)),
                    (ActorId::from("F1"), Quantity::from_kg(250)),
                ],
            )
            .unwrap();

        let result = engine.request_transition(
            &BatchId::from("BCH001"),
            &signature("F1", Role::Farmer),
            ChangeRequest::Transfer {
                to_actor: ActorId::from("D1"),
                to_role: Role::Distributor,
                new_state: None,
                price_per_kg: None,
            },
        );
        assert!(matches!(result, Err(LedgerError::BatchFrozen(_))));

        // A second split is equally frozen out.
        let resplit = resolver.split(
            &BatchId::from("BCH001"),
            &signature("F1", Role::Farmer),
            &[
                (ActorId::from("F1"), Quantity::from_kg(100)),
                (ActorId::from("F1"), Quantity::from_kg(400)),
            ],
        );
        assert!(matches!(resplit, Err(LedgerError::BatchFrozen(_))));
    }

    #[test]
    fn test_merge_reconstitutes_parent_quantity() {
        let (engine, resolver) = setup(500);
        resolver
            .split(
                &BatchId::from("BCH001"),
                &signature("F1", Role::Farmer),
                &[
                    (ActorId::from("F1"), Quantity::from_kg(300)),
                    (ActorId::from("F1"), Quantity::from_kg(200)),
                ],
            )
            .unwrap();

        let merged = resolver
            .merge(
                &[BatchId::from("BCH001-A"), BatchId::from("BCH001-B")],
                &signature("F1", Role::Farmer),
            )
            .unwrap();

        assert_eq!(merged.batch_id, BatchId::from("BCH001-M"));
        assert_eq!(merged.quantity, Quantity::from_kg(500));
        assert_eq!(merged.parent_id, Some(BatchId::from("BCH001")));
        assert_eq!(merged.merged_from.len(), 2);

        // Sources are frozen once merged away.
        let source = engine.registry().get(&BatchId::from("BCH001-A")).unwrap();
        assert_eq!(source.merged_into, Some(BatchId::from("BCH001-M")));
        assert!(source.is_frozen());
    }

    #[test]
    fn test_merge_requires_same_holder() {
        let (_, resolver) = setup(500);
        resolver
            .split(
                &BatchId::from("BCH001"),
                &signature("F1", Role::Farmer),
                &[
                    (ActorId::from("F1"), Quantity::from_kg(300)),
                    (ActorId::from("R2"), Quantity::from_kg(200)),
                ],
            )
            .unwrap();

        let result = resolver.merge(
            &[BatchId::from("BCH001-A"), BatchId::from("BCH001-B")],
            &signature("F1", Role::Farmer),
        );
        assert!(matches!(result, Err(LedgerError::Transition(_))));
    }

    #[test]
    fn test_merge_requires_complete_sibling_set() {
        let (_, resolver) = setup(600);
        resolver
            .split(
                &BatchId::from("BCH001"),
                &signature("F1", Role::Farmer),
                &[
                    (ActorId::from("F1"), Quantity::from_kg(200)),
                    (ActorId::from("F1"), Quantity::from_kg(200)),
                    (ActorId::from("F1"), Quantity::from_kg(200)),
                ],
            )
            .unwrap();

        let result = resolver.merge(
            &[BatchId::from("BCH001-A"), BatchId::from("BCH001-B")],
            &signature("F1", Role::Farmer),
        );
        assert!(matches!(result, Err(LedgerError::Transition(_))));
    }

    #[test]
    fn test_merge_refuses_divergent_attestations() {
        let (engine, resolver) = setup(500);
        resolver
            .split(
                &BatchId::from("BCH001"),
                &signature("F1", Role::Farmer),
                &[
                    (ActorId::from("F1"), Quantity::from_kg(300)),
                    (ActorId::from("F1"), Quantity::from_kg(200)),
                ],
            )
            .unwrap();

        // One sibling picks up an extra attestation after the split.
        engine
            .request_transition(
                &BatchId::from("BCH001-A"),
                &signature("D1", Role::Distributor),
                ChangeRequest::AttestQuality {
                    grade: QualityGrade::B,
                    certificate: "cert-x".to_string(),
                    notes: None,
                },
            )
            .unwrap();

        let result = resolver.merge(
            &[BatchId::from("BCH001-A"), BatchId::from("BCH001-B")],
            &signature("F1", Role::Farmer),
        );
        assert!(matches!(result, Err(LedgerError::Transition(_))));
    }

    #[test]
    fn test_merged_batch_transitions_normally() {
        let (engine, resolver) = setup(500);
        resolver
            .split(
                &BatchId::from("BCH001"),
                &signature("F1", Role::Farmer),
                &[
                    (ActorId::from("F1"), Quantity::from_kg(300)),
                    (ActorId::from("F1"), Quantity::from_kg(200)),
                ],
            )
            .unwrap();
        let merged = resolver
            .merge(
                &[BatchId::from("BCH001-A"), BatchId::from("BCH001-B")],
                &signature("F1", Role::Farmer),
            )
            .unwrap();
        assert_eq!(merged.state, BatchState::Created);

        engine
            .request_transition(
                &merged.batch_id,
                &signature("F1", Role::Farmer),
                ChangeRequest::Transfer {
                    to_actor: ActorId::from("D1"),
                    to_role: Role::Distributor,
                    new_state: None,
                    price_per_kg: None,
                },
            )
            .unwrap();
        let merged = engine.registry().get(&merged.batch_id).unwrap();
        assert_eq!(merged.current_holder, ActorId::from("D1"));
    }
}
