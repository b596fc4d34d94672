use agrichain_core::error::LedgerError;
use agrichain_ledger::chain::EntryStore;
use agrichain_ledger::entry::{LedgerEntry, SequenceNumber};
use std::sync::Mutex;

/// In-memory append-only store, for tests and embedded use.
pub struct MemoryEntryStore {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl Default for MemoryEntryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryStore for MemoryEntryStore {
    fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| LedgerError::Store(format!("failed to acquire store lock: {}", e)))?;
        if entry.sequence_number != entries.len() as u64 {
            return Err(LedgerError::Store(format!(
                "append out of order: entry {} at position {}",
                entry.sequence_number,
                entries.len()
            )));
        }
        entries.push(entry.clone());
        Ok(())
    }

    fn read_range(
        &self,
        start: SequenceNumber,
        end: SequenceNumber,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| LedgerError::Store(format!("failed to acquire store lock: {}", e)))?;
        let end = (end as usize).min(entries.len());
        if start as usize >= end {
            return Ok(Vec::new());
        }
        Ok(entries[start as usize..end].to_vec())
    }

    fn iter_entries(&self) -> Box<dyn Iterator<Item = Result<LedgerEntry, LedgerError>> + '_> {
        let entries = match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(e) => {
                return Box::new(std::iter::once(Err(LedgerError::Store(format!(
                    "failed to acquire store lock: {}",
                    e
                )))))
            }
        };
        Box::new(entries.into_iter().map(Ok))
    }

    fn len(&self) -> Result<u64, LedgerError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| LedgerError::Store(format!("failed to acquire store lock: {}", e)))?;
        Ok(entries.len() as u64)
    }

    fn last_entry(&self) -> Result<Option<LedgerEntry>, LedgerError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| LedgerError::Store(format!("failed to acquire store lock: {}", e)))?;
        Ok(entries.last().cloned())
    }
}
