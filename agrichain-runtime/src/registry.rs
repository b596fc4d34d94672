use agrichain_core::batch::{Batch, BatchState, PriceEvent};
use agrichain_core::error::LedgerError;
use agrichain_core::id::{ActorId, BatchId};
use agrichain_ledger::chain::{EntryStore, HashChainLog};
use agrichain_ledger::entry::{EntryPayload, LedgerEntry, SequenceNumber};
use log::debug;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Materialized batch state, derived by folding ledger entries.
///
/// The registry is a pure function of the log: replaying every entry from
/// genesis reproduces the incrementally maintained state exactly. Live
/// application is strictly in sequence order; readers may observe a
/// slightly stale tail but never an out-of-order one.
pub struct BatchRegistry {
    inner: RwLock<RegistryInner>,
}

struct RegistryInner {
    /// Canonically ordered so the state digest is deterministic.
    batches: BTreeMap<BatchId, Batch>,

    /// Sequence number the next applied entry must carry.
    next_sequence: SequenceNumber,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                batches: BTreeMap::new(),
                next_sequence: 0,
            }),
        }
    }

    /// Rebuild a registry from scratch by replaying `store` from genesis.
    ///
    /// Rebuild tolerates a store that yields entries out of order; they
    /// are sorted by sequence number before folding. Live application
    /// stays strictly ordered.
    pub fn rebuild(store: &dyn EntryStore) -> Result<Self, LedgerError> {
        let mut entries = store
            .iter_entries()
            .collect::<Result<Vec<_>, LedgerError>>()?;
        entries.sort_by_key(|entry| entry.sequence_number);

        let registry = Self::new();
        for entry in &entries {
            registry.apply(entry)?;
        }
        debug!(
            "registry rebuilt from log, {} entries applied",
            registry.next_sequence()
        );
        Ok(registry)
    }

    /// Fold one ledger entry into the materialized state.
    ///
    /// Entries must arrive in strict sequence order; gaps or replays are
    /// store-level corruption, not caller errors.
    pub fn apply(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| LedgerError::Store(format!("failed to acquire registry lock: {}", e)))?;
        if entry.sequence_number != inner.next_sequence {
            return Err(LedgerError::Store(format!(
                "out-of-order apply: entry {} while expecting {}",
                entry.sequence_number, inner.next_sequence
            )));
        }
        Self::fold(&mut inner.batches, entry)?;
        inner.next_sequence += 1;
        Ok(())
    }

    /// Apply every log entry not yet folded in, in sequence order.
    ///
    /// Writers call this after a successful append; readers between
    /// catch-ups see a stale but never out-of-order registry.
    pub fn catch_up(&self, log: &HashChainLog) -> Result<(), LedgerError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| LedgerError::Store(format!("failed to acquire registry lock: {}", e)))?;
        let (log_next, _) = log.tail();
        if inner.next_sequence >= log_next {
            return Ok(());
        }
        let entries = log.read_range(inner.next_sequence, log_next)?;
        for entry in &entries {
            if entry.sequence_number != inner.next_sequence {
                return Err(LedgerError::Store(format!(
                    "out-of-order apply: entry {} while expecting {}",
                    entry.sequence_number, inner.next_sequence
                )));
            }
            Self::fold(&mut inner.batches, entry)?;
            inner.next_sequence += 1;
        }
        Ok(())
    }

    /// Current materialized state of one batch.
    pub fn get(&self, batch_id: &BatchId) -> Result<Batch, LedgerError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| LedgerError::Store(format!("failed to acquire registry lock: {}", e)))?;
        inner
            .batches
            .get(batch_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("batch {}", batch_id)))
    }

    pub fn contains(&self, batch_id: &BatchId) -> bool {
        self.inner
            .read()
            .map(|inner| inner.batches.contains_key(batch_id))
            .unwrap_or(false)
    }

    /// Sequence number the next applied entry must carry.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.inner
            .read()
            .map(|inner| inner.next_sequence)
            .unwrap_or(0)
    }

    /// Per-actor inventory: every batch whose current holder is `actor`.
    ///
    /// A pure projection over the registry, recomputed per call.
    pub fn inventory_for(&self, actor: &ActorId) -> Result<Vec<Batch>, LedgerError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| LedgerError::Store(format!("failed to acquire registry lock: {}", e)))?;
        Ok(inner
            .batches
            .values()
            .filter(|batch| &batch.current_holder == actor)
            .cloned()
            .collect())
    }

    /// Digest committing to the full materialized batch set.
    ///
    /// Two registries holding byte-identical state produce the same
    /// digest; used to check the replay property.
    pub fn state_digest(&self) -> Result<[u8; 32], LedgerError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| LedgerError::Store(format!("failed to acquire registry lock: {}", e)))?;
        let mut hasher = blake3::Hasher::new();
        for (batch_id, batch) in &inner.batches {
            hasher.update(batch_id.as_str().as_bytes());
            hasher.update(&bincode::serialize(batch)?);
        }
        Ok(*hasher.finalize().as_bytes())
    }

    fn fold(batches: &mut BTreeMap<BatchId, Batch>, entry: &LedgerEntry) -> Result<(), LedgerError> {
        match &entry.payload {
            EntryPayload::BatchCreated {
                batch_id,
                crop_type,
                quantity,
                origin_actor,
                harvest_date,
                ..
            } => {
                if batches.contains_key(batch_id) {
                    return Err(LedgerError::Store(format!(
                        "entry {} recreates batch {}",
                        entry.sequence_number, batch_id
                    )));
                }
                batches.insert(
                    batch_id.clone(),
                    Batch::new(
                        batch_id.clone(),
                        crop_type.clone(),
                        *quantity,
                        origin_actor.clone(),
                        harvest_date.clone(),
                    ),
                );
            }

            EntryPayload::CustodyTransferred {
                batch_id,
                to_actor,
                new_state,
                price_per_kg,
                timestamp,
                ..
            } => {
                let batch = batches
                    .get_mut(batch_id)
                    .ok_or_else(|| LedgerError::NotFound(format!("batch {}", batch_id)))?;
                batch.current_holder = to_actor.clone();
                if let Some(state) = new_state {
                    batch.state = *state;
                }
                if let Some(price) = price_per_kg {
                    batch.price_events.push(PriceEvent {
                        actor: to_actor.clone(),
                        price_per_kg: *price,
                        timestamp: *timestamp,
                    });
                }
            }

            EntryPayload::StateChanged {
                batch_id,
                actor,
                to_state,
                price_per_kg,
                timestamp,
                ..
            } => {
                let batch = batches
                    .get_mut(batch_id)
                    .ok_or_else(|| LedgerError::NotFound(format!("batch {}", batch_id)))?;
                batch.state = *to_state;
                if let Some(price) = price_per_kg {
                    batch.price_events.push(PriceEvent {
                        actor: actor.clone(),
                        price_per_kg: *price,
                        timestamp: *timestamp,
                    });
                }
            }

            EntryPayload::QualityAttested {
                batch_id,
                attestation,
            } => {
                let batch = batches
                    .get_mut(batch_id)
                    .ok_or_else(|| LedgerError::NotFound(format!("batch {}", batch_id)))?;
                batch.quality_grade.push(attestation.clone());
                // The first attestation moves a fresh batch into
                // QualityChecked; later ones only accumulate.
                if batch.state == BatchState::Created {
                    batch.state = BatchState::QualityChecked;
                }
            }

            EntryPayload::BatchSplit {
                parent_id,
                allocations,
                ..
            } => {
                let parent = batches
                    .get_mut(parent_id)
                    .ok_or_else(|| LedgerError::NotFound(format!("batch {}", parent_id)))?;
                parent.children = allocations.iter().map(|a| a.child_id.clone()).collect();
                let template = parent.clone();

                for allocation in allocations {
                    let child = Batch {
                        batch_id: allocation.child_id.clone(),
                        crop_type: template.crop_type.clone(),
                        quantity: allocation.quantity,
                        parent_id: Some(parent_id.clone()),
                        origin_actor: template.origin_actor.clone(),
                        harvest_date: template.harvest_date.clone(),
                        current_holder: allocation.holder.clone(),
                        state: template.state,
                        quality_grade: template.quality_grade.clone(),
                        price_events: Vec::new(),
                        children: Vec::new(),
                        merged_into: None,
                        merged_from: Vec::new(),
                    };
                    batches.insert(allocation.child_id.clone(), child);
                }
            }

            EntryPayload::BatchMerged {
                merged_id,
                parent_id,
                source_ids,
                actor,
                quantity,
                state,
                ..
            } => {
                let first_source = source_ids.first().ok_or_else(|| {
                    LedgerError::Store(format!("entry {} merges zero sources", entry.sequence_number))
                })?;
                let template = batches
                    .get(first_source)
                    .ok_or_else(|| LedgerError::NotFound(format!("batch {}", first_source)))?
                    .clone();

                for source_id in source_ids {
                    let source = batches
                        .get_mut(source_id)
                        .ok_or_else(|| LedgerError::NotFound(format!("batch {}", source_id)))?;
                    source.merged_into = Some(merged_id.clone());
                }

                let merged = Batch {
                    batch_id: merged_id.clone(),
                    crop_type: template.crop_type.clone(),
                    quantity: *quantity,
                    parent_id: Some(parent_id.clone()),
                    origin_actor: template.origin_actor.clone(),
                    harvest_date: template.harvest_date.clone(),
                    current_holder: actor.clone(),
                    state: *state,
                    quality_grade: template.quality_grade.clone(),
                    price_events: Vec::new(),
                    children: Vec::new(),
                    merged_into: None,
                    merged_from: source_ids.clone(),
                };
                batches.insert(merged_id.clone(), merged);
            }
        }
        Ok(())
    }
}

impl Default for BatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}
