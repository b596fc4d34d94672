use agrichain_core::error::LedgerError;
use agrichain_ledger::chain::EntryStore;
use agrichain_ledger::entry::{LedgerEntry, SequenceNumber};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Cached end-of-file state so appends and tail reads avoid rescanning.
struct FileTail {
    len: u64,
    last: Option<LedgerEntry>,
}

/// File-backed append-only store.
///
/// Entries are framed as a u64 little-endian length followed by the
/// bincode record, flushed on every append. Opening scans the file
/// sequentially to recover the tail; a trailing torn record from a crash
/// ends the scan at the last complete entry.
pub struct FileEntryStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    tail: Mutex<FileTail>,
}

impl FileEntryStore {
    /// Open or create the store file at `path`.
    ///
    /// A torn record left at the end of the file by a crash is truncated
    /// away before appends resume.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let mut len = 0u64;
        let mut last = None;
        if path.exists() {
            let file_size = std::fs::metadata(path)
                .map_err(|e| LedgerError::Store(format!("failed to stat store file: {}", e)))?
                .len();
            let mut iterator = read_entries(path)?;
            for entry in &mut iterator {
                let entry = entry?;
                len += 1;
                last = Some(entry);
            }
            if iterator.complete_bytes < file_size {
                let file = OpenOptions::new()
                    .write(true)
                    .open(path)
                    .map_err(|e| LedgerError::Store(format!("failed to open store file: {}", e)))?;
                file.set_len(iterator.complete_bytes)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| LedgerError::Store(format!("failed to open store file: {}", e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
            tail: Mutex::new(FileTail { len, last }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EntryStore for FileEntryStore {
    fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut tail = self
            .tail
            .lock()
            .map_err(|e| LedgerError::Store(format!("failed to acquire tail lock: {}", e)))?;
        if entry.sequence_number != tail.len {
            return Err(LedgerError::Store(format!(
                "append out of order: entry {} at position {}",
                entry.sequence_number, tail.len
            )));
        }

        let mut writer = self
            .writer
            .lock()
            .map_err(|e| LedgerError::Store(format!("failed to acquire writer lock: {}", e)))?;

        let serialized = bincode::serialize(entry)?;
        let entry_len = serialized.len() as u64;
        writer.write_all(&entry_len.to_le_bytes())?;
        writer.write_all(&serialized)?;
        writer.flush()?;

        tail.len += 1;
        tail.last = Some(entry.clone());
        Ok(())
    }

    fn read_range(
        &self,
        start: SequenceNumber,
        end: SequenceNumber,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        if start >= end {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in read_entries(&self.path)? {
            let entry = entry?;
            if entry.sequence_number >= end {
                break;
            }
            if entry.sequence_number >= start {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn iter_entries(&self) -> Box<dyn Iterator<Item = Result<LedgerEntry, LedgerError>> + '_> {
        match read_entries(&self.path) {
            Ok(iterator) => Box::new(iterator),
            Err(err) => Box::new(std::iter::once(Err(err))),
        }
    }

    fn len(&self) -> Result<u64, LedgerError> {
        let tail = self
            .tail
            .lock()
            .map_err(|e| LedgerError::Store(format!("failed to acquire tail lock: {}", e)))?;
        Ok(tail.len)
    }

    fn last_entry(&self) -> Result<Option<LedgerEntry>, LedgerError> {
        let tail = self
            .tail
            .lock()
            .map_err(|e| LedgerError::Store(format!("failed to acquire tail lock: {}", e)))?;
        Ok(tail.last.clone())
    }
}

fn read_entries(path: &Path) -> Result<FileEntryIterator, LedgerError> {
    let file = File::open(path)
        .map_err(|e| LedgerError::Store(format!("failed to open store file: {}", e)))?;
    Ok(FileEntryIterator {
        reader: BufReader::new(file),
        complete_bytes: 0,
    })
}

/// Iterator over framed entries in a store file.
struct FileEntryIterator {
    reader: BufReader<File>,
    /// Offset just past the last complete record read so far.
    complete_bytes: u64,
}

impl Iterator for FileEntryIterator {
    type Item = Result<LedgerEntry, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        // Read the entry length
        let mut len_buf = [0u8; 8];
        match self.reader.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // End of file
                return None;
            }
            Err(e) => return Some(Err(LedgerError::from(e))),
        }

        let entry_len = u64::from_le_bytes(len_buf);

        // Read the entry data; a torn tail record ends the scan
        let mut entry_data = vec![0u8; entry_len as usize];
        match self.reader.read_exact(&mut entry_data) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return None;
            }
            Err(e) => return Some(Err(LedgerError::from(e))),
        }

        match bincode::deserialize(&entry_data) {
            Ok(entry) => {
                self.complete_bytes += 8 + entry_len;
                Some(Ok(entry))
            }
            Err(e) => Some(Err(LedgerError::from(e))),
        }
    }
}
