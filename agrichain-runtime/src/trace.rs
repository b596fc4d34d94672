use crate::registry::BatchRegistry;
use agrichain_core::error::LedgerError;
use agrichain_core::id::BatchId;
use agrichain_ledger::chain::HashChainLog;
use agrichain_ledger::entry::{LedgerEntry, SequenceNumber};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of provenance verification for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub valid: bool,
    pub broken_at: Option<SequenceNumber>,
}

/// Read-only queries over the log: full batch history and integrity
/// verification.
///
/// This is what the consumer-facing "journey" view and the retailer
/// traceability view render.
pub struct TraceService {
    log: Arc<HashChainLog>,
    registry: Arc<BatchRegistry>,
}

impl TraceService {
    pub fn new(log: Arc<HashChainLog>, registry: Arc<BatchRegistry>) -> Self {
        Self { log, registry }
    }

    /// Every ledger entry affecting `batch_id` or any of its ancestors,
    /// oldest first.
    ///
    /// Ancestry follows the one-way `parent_id` pointers, plus the source
    /// siblings of merged batches, so the goods' full custody history is
    /// covered. With no intervening writes, repeated calls return
    /// identical sequences.
    pub fn trace(&self, batch_id: &BatchId) -> Result<Vec<LedgerEntry>, LedgerError> {
        let lineage = self.lineage(batch_id)?;
        let entries = self.log.read_all()?;
        Ok(entries
            .into_iter()
            .filter(|entry| {
                entry
                    .payload
                    .batch_ids()
                    .iter()
                    .any(|id| lineage.contains(id))
            })
            .collect())
    }

    /// Verify integrity across the batch's relevant entries, reporting
    /// the first broken sequence number on failure.
    pub fn verify_provenance(&self, batch_id: &BatchId) -> Result<VerificationReport, LedgerError> {
        let relevant = self.trace(batch_id)?;
        let (start, end) = match (relevant.first(), relevant.last()) {
            (Some(first), Some(last)) => (first.sequence_number, last.sequence_number + 1),
            _ => {
                return Err(LedgerError::NotFound(format!(
                    "no ledger entries for batch {}",
                    batch_id
                )))
            }
        };
        let verification = self.log.verify_range(start, end)?;
        Ok(VerificationReport {
            valid: verification.valid,
            broken_at: verification.broken_at,
        })
    }

    /// The batch plus every ancestor reachable through `parent_id` and
    /// merge-source pointers.
    fn lineage(&self, batch_id: &BatchId) -> Result<HashSet<BatchId>, LedgerError> {
        let mut lineage = HashSet::new();
        let mut pending = vec![batch_id.clone()];
        while let Some(id) = pending.pop() {
            if !lineage.insert(id.clone()) {
                continue;
            }
            let batch = self.registry.get(&id)?;
            if let Some(parent_id) = batch.parent_id {
                pending.push(parent_id);
            }
            pending.extend(batch.merged_from);
        }
        Ok(lineage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ChangeRequest, TransitionEngine};
    use crate::resolver::SplitMergeResolver;
    use agrichain_core::actor::Role;
    use agrichain_core::batch::{BatchState, QualityGrade};
    use agrichain_core::id::ActorId;
    use agrichain_core::quantity::Quantity;
    use agrichain_ledger::chain::EntryStore;
    use agrichain_ledger::entry::{ActorSignature, EntryPayload};
    use std::sync::Mutex;

    /// Store wrapper that lets tests rewrite historical entries.
    struct TamperStore {
        entries: Mutex<Vec<LedgerEntry>>,
    }

    impl TamperStore {
        fn new() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
            }
        }

        fn tamper<F: FnOnce(&mut LedgerEntry)>(&self, sequence: usize, f: F) {
            let mut entries = self.entries.lock().unwrap();
            f(&mut entries[sequence]);
        }
    }

    impl EntryStore for TamperStore {
        fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }

        fn read_range(
            &self,
            start: SequenceNumber,
            end: SequenceNumber,
        ) -> Result<Vec<LedgerEntry>, LedgerError> {
            let entries = self.entries.lock().unwrap();
            let end = (end as usize).min(entries.len());
            if start as usize >= end {
                return Ok(Vec::new());
            }
            Ok(entries[start as usize..end].to_vec())
        }

        fn iter_entries(&self) -> Box<dyn Iterator<Item = Result<LedgerEntry, LedgerError>> + '_> {
            let entries = self.entries.lock().unwrap().clone();
            Box::new(entries.into_iter().map(Ok))
        }

        fn len(&self) -> Result<u64, LedgerError> {
            Ok(self.entries.lock().unwrap().len() as u64)
        }

        fn last_entry(&self) -> Result<Option<LedgerEntry>, LedgerError> {
            Ok(self.entries.lock().unwrap().last().cloned())
        }
    }

    fn signature(actor: &str, role: Role) -> ActorSignature {
        ActorSignature::new(ActorId::from(actor), role, vec![0x42])
    }

    struct Fixture {
        store: Arc<TamperStore>,
        engine: Arc<TransitionEngine>,
        trace: TraceService,
    }

    /// Farm-to-retail fixture: BCH001 created, quality checked, then split
    /// to two retailers.
    fn split_fixture() -> Fixture {
        let store = Arc::new(TamperStore::new());
        let log = Arc::new(HashChainLog::open(store.clone()).unwrap());
        let registry = Arc::new(BatchRegistry::new());
        let engine = Arc::new(TransitionEngine::new(log.clone(), registry.clone()));
        let resolver = SplitMergeResolver::new(engine.clone());
        let trace = TraceService::new(log, registry);

        engine
            .create_batch(
                &signature("F1", Role::Farmer),
                BatchId::from("BCH001"),
                "Rice".to_string(),
                Quantity::from_kg(500),
                Some("2024-03-15".to_string()),
            )
            .unwrap();
        engine
            .request_transition(
                &BatchId::from("BCH001"),
                &signature("D1", Role::Distributor),
                ChangeRequest::AttestQuality {
                    grade: QualityGrade::A,
                    certificate: "cert-001".to_string(),
                    notes: Some("Lab tested".to_string()),
                },
            )
            .unwrap();
        resolver
            .split(
                &BatchId::from("BCH001"),
                &signature("F1", Role::Farmer),
                &[
                    (ActorId::from("R1"), Quantity::from_kg(300)),
                    (ActorId::from("R2"), Quantity::from_kg(200)),
                ],
            )
            .unwrap();

        Fixture {
            store,
            engine,
            trace,
        }
    }

    #[test]
    fn test_child_trace_includes_ancestors() {
        let fixture = split_fixture();

        // Child A sells independently.
        fixture
            .engine
            .request_transition(
                &BatchId::from("BCH001-A"),
                &signature("R1", Role::Retailer),
                ChangeRequest::AdvanceState {
                    to: BatchState::Sold,
                    price_per_kg: Some(agrichain_core::quantity::PricePerKg::from_rupees(23)),
                },
            )
            .unwrap();

        let entries = fixture.trace.trace(&BatchId::from("BCH001-A")).unwrap();
        let kinds: Vec<_> = entries.iter().map(|e| e.payload.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "batch_created",
                "quality_attested",
                "batch_split",
                "state_changed"
            ]
        );

        // Sibling B's sale stays out of A's trace.
        fixture
            .engine
            .request_transition(
                &BatchId::from("BCH001-B"),
                &signature("R2", Role::Retailer),
                ChangeRequest::AdvanceState {
                    to: BatchState::Sold,
                    price_per_kg: None,
                },
            )
            .unwrap();
        let entries = fixture.trace.trace(&BatchId::from("BCH001-A")).unwrap();
        assert_eq!(entries.len(), 4);
    }

    #[test]
    fn test_trace_idempotent() {
        let fixture = split_fixture();
        let first = fixture.trace.trace(&BatchId::from("BCH001-A")).unwrap();
        let second = fixture.trace.trace(&BatchId::from("BCH001-A")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_trace_unknown_batch() {
        let fixture = split_fixture();
        let result = fixture.trace.trace(&BatchId::from("NOPE"));
        assert!(matches!(result, Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn test_verify_provenance_clean() {
        let fixture = split_fixture();
        let report = fixture
            .trace
            .verify_provenance(&BatchId::from("BCH001-A"))
            .unwrap();
        assert!(report.valid);
        assert_eq!(report.broken_at, None);
    }

    #[test]
    fn test_verify_provenance_reports_first_break() {
        let fixture = split_fixture();

        // Rewrite the creation quantity after the fact.
        fixture.store.tamper(0, |entry| {
            if let EntryPayload::BatchCreated { quantity, .. } = &mut entry.payload {
                *quantity = Quantity::from_kg(50);
            }
        });

        let report = fixture
            .trace
            .verify_provenance(&BatchId::from("BCH001-A"))
            .unwrap();
        assert!(!report.valid);
        assert_eq!(report.broken_at, Some(0));
    }

    #[test]
    fn test_merged_trace_covers_source_custody() {
        let store = Arc::new(TamperStore::new());
        let log = Arc::new(HashChainLog::open(store.clone()).unwrap());
        let registry = Arc::new(BatchRegistry::new());
        let engine = Arc::new(TransitionEngine::new(log.clone(), registry.clone()));
        let resolver = SplitMergeResolver::new(engine.clone());
        let trace = TraceService::new(log, registry);

        engine
            .create_batch(
                &signature("F1", Role::Farmer),
                BatchId::from("BCH001"),
                "Wheat".to_string(),
                Quantity::from_kg(400),
                None,
            )
            .unwrap();
        resolver
            .split(
                &BatchId::from("BCH001"),
                &signature("F1", Role::Farmer),
                &[
                    (ActorId::from("F1"), Quantity::from_kg(250)),
                    (ActorId::from("F1"), Quantity::from_kg(150)),
                ],
            )
            .unwrap();
        let merged = resolver
            .merge(
                &[BatchId::from("BCH001-A"), BatchId::from("BCH001-B")],
                &signature("F1", Role::Farmer),
            )
            .unwrap();

        let entries = trace.trace(&merged.batch_id).unwrap();
        let kinds: Vec<_> = entries.iter().map(|e| e.payload.kind()).collect();
        assert_eq!(kinds, vec!["batch_created", "batch_split", "batch_merged"]);
    }
}
