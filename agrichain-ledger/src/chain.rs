use crate::entry::{
    ActorSignature, EntryHash, EntryPayload, LedgerEntry, SequenceNumber, GENESIS_PREV_HASH,
};
use agrichain_core::error::LedgerError;
use log::{debug, warn};
use std::sync::{Arc, Mutex};

/// Abstract append-only sequential store beneath the hash-chain log.
///
/// Implementations persist entries densely from sequence number zero and
/// return them in the same order. All chaining checks belong to the log;
/// stores only append and read.
pub trait EntryStore: Send + Sync {
    /// Append one entry at the end of the store.
    fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;

    /// Read entries with sequence numbers in `[start, end)`.
    fn read_range(
        &self,
        start: SequenceNumber,
        end: SequenceNumber,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Iterate over every entry from genesis.
    fn iter_entries(&self) -> Box<dyn Iterator<Item = Result<LedgerEntry, LedgerError>> + '_>;

    /// Number of entries in the store.
    fn len(&self) -> Result<u64, LedgerError>;

    /// The last entry, if the store is non-empty.
    fn last_entry(&self) -> Result<Option<LedgerEntry>, LedgerError>;

    fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }
}

/// Result of verifying a range of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    pub valid: bool,

    /// Sequence number of the first broken entry, if any.
    pub broken_at: Option<SequenceNumber>,
}

impl ChainVerification {
    pub fn valid() -> Self {
        Self {
            valid: true,
            broken_at: None,
        }
    }

    pub fn broken_at(sequence: SequenceNumber) -> Self {
        Self {
            valid: false,
            broken_at: Some(sequence),
        }
    }
}

/// Verify a contiguous run of entries against `prev_hash`, the recomputed
/// hash of the entry preceding the run (`GENESIS_PREV_HASH` when the run
/// starts at genesis).
///
/// Every entry hash is recomputed from the entry's fields; the stored
/// `entry_hash` is checked against the recomputation, never trusted. The
/// first broken entry is reported and later entries are not blamed for an
/// earlier break.
pub fn verify_entries(entries: &[LedgerEntry], mut prev_hash: EntryHash) -> ChainVerification {
    for entry in entries {
        let recomputed = match entry.recompute_hash() {
            Ok(hash) => hash,
            Err(_) => return ChainVerification::broken_at(entry.sequence_number),
        };
        if entry.prev_hash != prev_hash || recomputed != entry.entry_hash {
            warn!(
                "chain broken at entry {}: prev link or payload hash mismatch",
                entry.sequence_number
            );
            return ChainVerification::broken_at(entry.sequence_number);
        }
        prev_hash = recomputed;
    }
    ChainVerification::valid()
}

/// Tail state guarded by the append lock.
struct Tail {
    next_sequence: SequenceNumber,
    tail_hash: EntryHash,
}

/// Append-only hash-linked log over an abstract entry store; the single
/// source of truth for all batch state.
///
/// The tail is the single serialization point. Appends compare the
/// caller's expected previous hash against the current tail and fail with
/// an integrity error on mismatch, so concurrent writers race on the tail
/// instead of serializing their validation behind a global lock.
pub struct HashChainLog {
    store: Arc<dyn EntryStore>,
    tail: Mutex<Tail>,
}

impl HashChainLog {
    /// Open a log over `store`, recovering the tail from the last entry.
    ///
    /// The recovered tail hash is recomputed from the entry's fields, not
    /// read back from the stored hash.
    pub fn open(store: Arc<dyn EntryStore>) -> Result<Self, LedgerError> {
        let tail = match store.last_entry()? {
            Some(entry) => Tail {
                next_sequence: entry.sequence_number + 1,
                tail_hash: entry.recompute_hash()?,
            },
            None => Tail {
                next_sequence: 0,
                tail_hash: GENESIS_PREV_HASH,
            },
        };
        Ok(Self {
            store,
            tail: Mutex::new(tail),
        })
    }

    /// Current tail: the next sequence number and the hash the next entry
    /// must link to.
    pub fn tail(&self) -> (SequenceNumber, EntryHash) {
        // Tail state is only mutated after a successful store append, so a
        // poisoned lock still holds a consistent tail.
        let tail = self
            .tail
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (tail.next_sequence, tail.tail_hash)
    }

    /// Compare-and-append.
    ///
    /// Fails with `LedgerError::Integrity` when `expected_prev_hash` no
    /// longer matches the tail (another writer appended first); the caller
    /// re-reads the tail and retries against the new one. On success the
    /// entry is durably handed to the store before the tail advances.
    pub fn append(
        &self,
        expected_prev_hash: EntryHash,
        payload: EntryPayload,
        signature: ActorSignature,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut tail = self
            .tail
            .lock()
            .map_err(|e| LedgerError::Store(format!("failed to acquire tail lock: {}", e)))?;

        if tail.tail_hash != expected_prev_hash {
            return Err(LedgerError::Integrity {
                expected: hex::encode(tail.tail_hash),
                found: hex::encode(expected_prev_hash),
            });
        }

        let entry = LedgerEntry::new(tail.next_sequence, tail.tail_hash, payload, signature)?;
        self.store.append(&entry)?;

        tail.next_sequence += 1;
        tail.tail_hash = entry.entry_hash;
        debug!(
            "appended entry {} ({}) for batch {}",
            entry.sequence_number,
            entry.payload.kind(),
            entry.payload.batch_id()
        );
        Ok(entry)
    }

    pub fn len(&self) -> Result<u64, LedgerError> {
        self.store.len()
    }

    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        self.store.is_empty()
    }

    /// Read entries with sequence numbers in `[start, end)`.
    pub fn read_range(
        &self,
        start: SequenceNumber,
        end: SequenceNumber,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store.read_range(start, end)
    }

    /// Read the full log, oldest first.
    pub fn read_all(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let len = self.store.len()?;
        self.store.read_range(0, len)
    }

    /// Recompute every entry hash in `[start, end)` and confirm chaining,
    /// reporting the first broken sequence number on failure.
    pub fn verify_range(
        &self,
        start: SequenceNumber,
        end: SequenceNumber,
    ) -> Result<ChainVerification, LedgerError> {
        let prev_hash = if start == 0 {
            GENESIS_PREV_HASH
        } else {
            let prev = self.store.read_range(start - 1, start)?;
            match prev.first() {
                Some(entry) => entry.recompute_hash()?,
                None => {
                    return Err(LedgerError::NotFound(format!(
                        "ledger entry {} not in store",
                        start - 1
                    )))
                }
            }
        };
        let entries = self.store.read_range(start, end)?;
        Ok(verify_entries(&entries, prev_hash))
    }

    /// Verify the whole chain from genesis.
    pub fn verify(&self) -> Result<ChainVerification, LedgerError> {
        let len = self.store.len()?;
        self.verify_range(0, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrichain_core::actor::Role;
    use agrichain_core::batch::BatchState;
    use agrichain_core::id::{ActorId, BatchId};
    use agrichain_core::quantity::Quantity;

    /// Minimal in-memory store for exercising the log, with a tampering
    /// hook the production stores do not expose.
    struct TestStore {
        entries: Mutex<Vec<LedgerEntry>>,
    }

    impl TestStore {
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

    impl EntryStore for TestStore {
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

    fn farmer_signature() -> ActorSignature {
        ActorSignature::new(ActorId::from("F1"), Role::Farmer, vec![0xAA, 0xBB])
    }

    fn created_payload(id: &str) -> EntryPayload {
        EntryPayload::BatchCreated {
            batch_id: BatchId::from(id),
            crop_type: "Rice".to_string(),
            quantity: Quantity::from_kg(500),
            origin_actor: ActorId::from("F1"),
            harvest_date: None,
            timestamp: 1_700_000_000,
        }
    }

    fn state_payload(id: &str, to_state: BatchState) -> EntryPayload {
        EntryPayload::StateChanged {
            batch_id: BatchId::from(id),
            actor: ActorId::from("D1"),
            from_state: BatchState::Created,
            to_state,
            reason: None,
            price_per_kg: None,
            timestamp: 1_700_000_100,
        }
    }

    fn chained_log(entries: usize) -> (Arc<TestStore>, HashChainLog) {
        let store = Arc::new(TestStore::new());
        let log = HashChainLog::open(store.clone()).unwrap();
        for i in 0..entries {
            let (_, tail_hash) = log.tail();
            log.append(
                tail_hash,
                created_payload(&format!("BCH{:03}", i + 1)),
                farmer_signature(),
            )
            .unwrap();
        }
        (store, log)
    }

    #[test]
    fn test_append_links_entries() {
        let (_, log) = chained_log(3);
        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].prev_hash, GENESIS_PREV_HASH);
        assert_eq!(entries[1].prev_hash, entries[0].entry_hash);
        assert_eq!(entries[2].prev_hash, entries[1].entry_hash);
        assert_eq!(log.tail().0, 3);
    }

    #[test]
    fn test_stale_tail_rejected() {
        let (_, log) = chained_log(1);
        let (_, tail_hash) = log.tail();
        log.append(tail_hash, created_payload("BCH002"), farmer_signature())
            .unwrap();

        // A writer holding the old tail loses the race.
        let result = log.append(tail_hash, created_payload("BCH003"), farmer_signature());
        assert!(matches!(result, Err(LedgerError::Integrity { .. })));
        // The loser's entry never landed.
        assert_eq!(log.len().unwrap(), 2);
    }

    #[test]
    fn test_verify_clean_chain() {
        let (_, log) = chained_log(5);
        let verification = log.verify().unwrap();
        assert!(verification.valid);
        assert_eq!(verification.broken_at, None);
    }

    #[test]
    fn test_tampered_payload_reports_first_break() {
        let (store, log) = chained_log(5);

        // Rewrite history at entry 2 without touching later entries.
        store.tamper(2, |entry| {
            if let EntryPayload::BatchCreated { quantity, .. } = &mut entry.payload {
                *quantity = Quantity::from_kg(9999);
            }
        });

        let verification = log.verify().unwrap();
        assert!(!verification.valid);
        assert_eq!(verification.broken_at, Some(2));
    }

    #[test]
    fn test_tampered_hash_breaks_link_at_next_entry() {
        let (store, log) = chained_log(4);

        // An attacker who also recomputes the stored hash still breaks the
        // link to the following entry.
        store.tamper(1, |entry| {
            if let EntryPayload::BatchCreated { crop_type, .. } = &mut entry.payload {
                *crop_type = "Wheat".to_string();
            }
            entry.entry_hash = entry.recompute_hash().unwrap();
        });

        let verification = log.verify().unwrap();
        assert!(!verification.valid);
        // Entry 1 is now internally consistent but entry 2 no longer
        // links to it.
        assert_eq!(verification.broken_at, Some(2));
    }

    #[test]
    fn test_verify_range_uses_recomputed_prev() {
        let (_, log) = chained_log(6);
        let verification = log.verify_range(3, 6).unwrap();
        assert!(verification.valid);
    }

    #[test]
    fn test_reopen_recovers_tail() {
        let (store, log) = chained_log(3);
        let tail_before = log.tail();
        drop(log);

        let reopened = HashChainLog::open(store).unwrap();
        assert_eq!(reopened.tail(), tail_before);

        let (_, tail_hash) = reopened.tail();
        let entry = reopened
            .append(
                tail_hash,
                state_payload("BCH001", BatchState::QualityChecked),
                ActorSignature::new(ActorId::from("D1"), Role::Distributor, vec![0xCC]),
            )
            .unwrap();
        assert_eq!(entry.sequence_number, 3);
        assert!(reopened.verify().unwrap().valid);
    }
}
