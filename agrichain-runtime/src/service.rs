use crate::engine::{ChangeRequest, TransitionEngine};
use crate::registry::BatchRegistry;
use crate::resolver::SplitMergeResolver;
use crate::trace::{TraceService, VerificationReport};
use agrichain_core::batch::Batch;
use agrichain_core::error::LedgerError;
use agrichain_core::id::{ActorId, BatchId};
use agrichain_core::quantity::Quantity;
use agrichain_ledger::chain::{EntryStore, HashChainLog};
use agrichain_ledger::entry::{ActorSignature, LedgerEntry};
use agrichain_storage::memory::MemoryEntryStore;
use log::info;
use std::sync::Arc;

/// Facade wiring the hash-chain log, batch registry, transition engine,
/// split/merge resolver and trace service over one entry store.
///
/// Write endpoints accept a signed request and return the committed ledger
/// entry or a structured error; read endpoints return serializable
/// records.
pub struct ProvenanceService {
    log: Arc<HashChainLog>,
    registry: Arc<BatchRegistry>,
    engine: Arc<TransitionEngine>,
    resolver: SplitMergeResolver,
    trace: TraceService,
}

impl ProvenanceService {
    /// Open a service over `store`, rebuilding the registry by replaying
    /// the log from genesis.
    pub fn open(store: Arc<dyn EntryStore>) -> Result<Self, LedgerError> {
        let registry = Arc::new(BatchRegistry::rebuild(store.as_ref())?);
        let log = Arc::new(HashChainLog::open(store)?);
        let engine = Arc::new(TransitionEngine::new(log.clone(), registry.clone()));
        let resolver = SplitMergeResolver::new(engine.clone());
        let trace = TraceService::new(log.clone(), registry.clone());
        info!("provenance service opened, {} entries in log", log.len()?);
        Ok(Self {
            log,
            registry,
            engine,
            resolver,
            trace,
        })
    }

    /// A service over a fresh in-memory store.
    pub fn in_memory() -> Result<Self, LedgerError> {
        Self::open(Arc::new(MemoryEntryStore::new()))
    }

    pub fn log(&self) -> &Arc<HashChainLog> {
        &self.log
    }

    pub fn registry(&self) -> &Arc<BatchRegistry> {
        &self.registry
    }

    // ---- Write endpoints ----

    pub fn create_batch(
        &self,
        signature: &ActorSignature,
        batch_id: BatchId,
        crop_type: String,
        quantity: Quantity,
        harvest_date: Option<String>,
    ) -> Result<LedgerEntry, LedgerError> {
        self.engine
            .create_batch(signature, batch_id, crop_type, quantity, harvest_date)
    }

    pub fn request_transition(
        &self,
        batch_id: &BatchId,
        signature: &ActorSignature,
        change: ChangeRequest,
    ) -> Result<LedgerEntry, LedgerError> {
        self.engine.request_transition(batch_id, signature, change)
    }

    pub fn split(
        &self,
        parent_id: &BatchId,
        signature: &ActorSignature,
        allocations: &[(ActorId, Quantity)],
    ) -> Result<Vec<Batch>, LedgerError> {
        self.resolver.split(parent_id, signature, allocations)
    }

    pub fn merge(
        &self,
        source_ids: &[BatchId],
        signature: &ActorSignature,
    ) -> Result<Batch, LedgerError> {
        self.resolver.merge(source_ids, signature)
    }

    // ---- Read endpoints ----

    pub fn batch(&self, batch_id: &BatchId) -> Result<Batch, LedgerError> {
        self.registry.get(batch_id)
    }

    pub fn trace(&self, batch_id: &BatchId) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.trace.trace(batch_id)
    }

    pub fn verify_provenance(
        &self,
        batch_id: &BatchId,
    ) -> Result<VerificationReport, LedgerError> {
        self.trace.verify_provenance(batch_id)
    }

    pub fn inventory_for(&self, actor: &ActorId) -> Result<Vec<Batch>, LedgerError> {
        self.registry.inventory_for(actor)
    }

    /// The batch as the JSON record served at the query boundary.
    pub fn batch_json(&self, batch_id: &BatchId) -> Result<String, LedgerError> {
        let batch = self.batch(batch_id)?;
        serde_json::to_string(&batch).map_err(|e| LedgerError::Serialization(e.to_string()))
    }

    /// The batch's journey as the JSON record served at the query
    /// boundary.
    pub fn trace_json(&self, batch_id: &BatchId) -> Result<String, LedgerError> {
        let entries = self.trace(batch_id)?;
        serde_json::to_string(&entries).map_err(|e| LedgerError::Serialization(e.to_string()))
    }
}
