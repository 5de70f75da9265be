//! Revision log
//!
//! Every collection keeps its full history in two append-only files:
//!
//! ```text
//! col{id}.log   fixed 48-byte entries, O(1) access by index
//! col{id}.dat   raw payload bytes, referenced by (offset, len)
//! ```
//!
//! Entry layout (little endian):
//!
//! ```text
//!  0..8   doc_id        8..16  rev          16..24 prev_rev
//! 24..32  data offset  32..36  data len     36..40 crc32(payload)
//! 40      operation    41      flags        42..44 reserved
//! 44..48  crc32(bytes 0..44)
//! ```
//!
//! Payload bytes are written before the entry that points at them, so a crash
//! leaves at worst unreferenced payload bytes or a partial trailing entry.
//! Nothing before the end of the file is ever overwritten.

use crate::config::DurabilityLevel;
use crate::storage::checksum::Checksum;
use crate::types::{DocId, Revision};
use crate::{ConfDbError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Size of one index entry in `col{id}.log`
pub const ENTRY_SIZE: u64 = 48;

const FLAG_SNAPPY: u8 = 0x01;

/// Document operation recorded by a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    fn to_byte(self) -> u8 {
        match self {
            Operation::Create => 1,
            Operation::Update => 2,
            Operation::Delete => 3,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(Operation::Create),
            2 => Ok(Operation::Update),
            3 => Ok(Operation::Delete),
            other => Err(ConfDbError::Corruption(format!(
                "unknown revlog operation {}",
                other
            ))),
        }
    }
}

/// One revision of one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevLog {
    /// 0 asks the writer to assign a fresh id
    pub doc_id: DocId,
    pub rev: Revision,
    pub prev_rev: Revision,
    pub operation: Operation,
    /// Encoded document, `None` for deletes
    pub doc: Option<Vec<u8>>,
}

impl RevLog {
    /// Revision that supersedes `prev_rev`.
    pub fn new(doc_id: DocId, prev_rev: Revision, operation: Operation, doc: Option<Vec<u8>>) -> Self {
        Self {
            doc_id,
            rev: prev_rev + 1,
            prev_rev,
            operation,
            doc,
        }
    }
}

/// Decoded index entry, without the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevLogEntry {
    pub index: u64,
    pub doc_id: DocId,
    pub rev: Revision,
    pub prev_rev: Revision,
    pub operation: Operation,
    doc_offset: u64,
    doc_len: u32,
    doc_checksum: u32,
    flags: u8,
}

impl RevLogEntry {
    fn encode(&self) -> [u8; ENTRY_SIZE as usize] {
        let mut buf = [0u8; ENTRY_SIZE as usize];
        buf[0..8].copy_from_slice(&self.doc_id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.rev.to_le_bytes());
        buf[16..24].copy_from_slice(&self.prev_rev.to_le_bytes());
        buf[24..32].copy_from_slice(&self.doc_offset.to_le_bytes());
        buf[32..36].copy_from_slice(&self.doc_len.to_le_bytes());
        buf[36..40].copy_from_slice(&self.doc_checksum.to_le_bytes());
        buf[40] = self.operation.to_byte();
        buf[41] = self.flags;
        let crc = Checksum::compute(&buf[..44]);
        buf[44..48].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn decode(index: u64, buf: &[u8; ENTRY_SIZE as usize]) -> Result<Self> {
        let crc = u32::from_le_bytes([buf[44], buf[45], buf[46], buf[47]]);
        Checksum::verify(&buf[..44], crc)
            .map_err(|e| ConfDbError::Corruption(format!("revlog entry {}: {}", index, e)))?;

        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(b)
        };
        let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);

        Ok(Self {
            index,
            doc_id: u64_at(0),
            rev: u64_at(8),
            prev_rev: u64_at(16),
            doc_offset: u64_at(24),
            doc_len: u32_at(32),
            doc_checksum: u32_at(36),
            operation: Operation::from_byte(buf[40])?,
            flags: buf[41],
        })
    }

    pub fn has_payload(&self) -> bool {
        self.operation != Operation::Delete
    }
}

/// File names of a collection's revlog pair
pub fn revlog_paths(dir: &Path, collection_id: u64) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("col{}.log", collection_id)),
        dir.join(format!("col{}.dat", collection_id)),
    )
}

/// Appends revisions to one collection's file pair
pub struct RevLogWriter {
    log_path: PathBuf,
    log_file: File,
    dat_file: File,
    durability: DurabilityLevel,
    compress: bool,
    /// Serializes appends from different transactions to the same files
    append_lock: Arc<Mutex<()>>,
}

impl RevLogWriter {
    /// Opens (creating if needed) the pair. A partial entry left at the end of
    /// the index file by a crash is cut off here.
    pub fn open(
        log_path: &Path,
        dat_path: &Path,
        durability: DurabilityLevel,
        compress: bool,
        append_lock: Arc<Mutex<()>>,
    ) -> Result<Self> {
        let guard = append_lock.lock();
        let log_file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(log_path)?;
        let dat_file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(dat_path)?;

        let len = log_file.metadata()?.len();
        if trim_partial_entry(&log_file, log_path)? != len {
            log_file.sync_all()?;
        }

        drop(guard);
        Ok(Self {
            log_path: log_path.to_path_buf(),
            log_file,
            dat_file,
            durability,
            compress,
            append_lock,
        })
    }

    /// Appends `record` and returns its index.
    ///
    /// A `doc_id` of 0 is replaced with `index + 1`, so creations get ids from
    /// their log position; the assigned id is written back into `record`.
    pub fn write(&mut self, record: &mut RevLog) -> Result<u64> {
        let _guard = self.append_lock.lock();

        let index = trim_partial_entry(&self.log_file, &self.log_path)? / ENTRY_SIZE;
        if record.doc_id == 0 {
            record.doc_id = index + 1;
        }

        let (payload, flags) = match (&record.doc, self.compress) {
            (Some(doc), true) => (snap::raw::Encoder::new().compress_vec(doc)?, FLAG_SNAPPY),
            (Some(doc), false) => (doc.clone(), 0),
            (None, _) => (Vec::new(), 0),
        };
        if payload.len() > u32::MAX as usize {
            return Err(ConfDbError::InvalidArgument(format!(
                "document of {} bytes exceeds the revlog limit",
                payload.len()
            )));
        }

        let doc_offset = self.dat_file.metadata()?.len();
        if !payload.is_empty() {
            self.dat_file.write_all(&payload)?;
        }

        let entry = RevLogEntry {
            index,
            doc_id: record.doc_id,
            rev: record.rev,
            prev_rev: record.prev_rev,
            operation: record.operation,
            doc_offset,
            doc_len: payload.len() as u32,
            doc_checksum: Checksum::compute(&payload),
            flags,
        };
        if let Err(e) = self.log_file.write_all(&entry.encode()) {
            warn!(path = %self.log_path.display(), index, error = %e, "confdb.revlog.append_failed");
            self.log_file.set_len(index * ENTRY_SIZE)?;
            return Err(e.into());
        }

        if self.durability.syncs_every_append() {
            self.sync_files()?;
        }
        Ok(index)
    }

    /// Number of entries currently in the index file, including appends of
    /// transactions that have not committed.
    pub fn count(&self) -> Result<u64> {
        Ok(self.log_file.metadata()?.len() / ENTRY_SIZE)
    }

    fn sync_files(&self) -> Result<()> {
        self.dat_file.sync_data()?;
        self.log_file.sync_data()?;
        Ok(())
    }

    /// Makes every append durable according to the configured level.
    pub fn sync(&self) -> Result<()> {
        if self.durability.syncs_on_commit() {
            self.sync_files()?;
        }
        Ok(())
    }

    /// Releases the files. A partial trailing entry is cut off first; whole
    /// entries stay as unreferenced history.
    pub fn close(self) -> Result<()> {
        let _guard = self.append_lock.lock();
        trim_partial_entry(&self.log_file, &self.log_path)?;
        Ok(())
    }
}

/// Cuts a partial trailing entry and returns the aligned length. Callers
/// hold the append lock.
fn trim_partial_entry(log_file: &File, log_path: &Path) -> Result<u64> {
    let len = log_file.metadata()?.len();
    let valid = len - len % ENTRY_SIZE;
    if valid != len {
        warn!(
            path = %log_path.display(),
            file_len = len,
            valid_len = valid,
            "confdb.revlog.truncate_partial"
        );
        log_file.set_len(valid)?;
    }
    Ok(valid)
}

/// Random access over a collection's revisions
pub struct RevLogReader {
    log_file: File,
    dat_file: File,
}

impl RevLogReader {
    /// `Ok(None)` when the collection has never been written.
    pub fn open(log_path: &Path, dat_path: &Path) -> Result<Option<Self>> {
        let log_file = match File::open(log_path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let dat_file = File::open(dat_path)?;
        Ok(Some(Self { log_file, dat_file }))
    }

    pub fn count(&self) -> Result<u64> {
        Ok(self.log_file.metadata()?.len() / ENTRY_SIZE)
    }

    pub fn read_entry(&mut self, index: u64) -> Result<RevLogEntry> {
        let count = self.count()?;
        if index >= count {
            return Err(ConfDbError::NotFound(format!(
                "revlog index {} (count {})",
                index, count
            )));
        }
        let mut buf = [0u8; ENTRY_SIZE as usize];
        self.log_file.seek(SeekFrom::Start(index * ENTRY_SIZE))?;
        self.log_file.read_exact(&mut buf)?;
        RevLogEntry::decode(index, &buf)
    }

    pub fn read_payload(&mut self, entry: &RevLogEntry) -> Result<Option<Vec<u8>>> {
        if !entry.has_payload() {
            return Ok(None);
        }
        let mut stored = vec![0u8; entry.doc_len as usize];
        self.dat_file.seek(SeekFrom::Start(entry.doc_offset))?;
        self.dat_file.read_exact(&mut stored)?;
        Checksum::verify(&stored, entry.doc_checksum).map_err(|e| {
            ConfDbError::Corruption(format!("payload of revlog entry {}: {}", entry.index, e))
        })?;

        if entry.flags & FLAG_SNAPPY != 0 {
            Ok(Some(snap::raw::Decoder::new().decompress_vec(&stored)?))
        } else {
            Ok(Some(stored))
        }
    }

    pub fn read(&mut self, index: u64) -> Result<RevLog> {
        let entry = self.read_entry(index)?;
        let doc = self.read_payload(&entry)?;
        Ok(RevLog {
            doc_id: entry.doc_id,
            rev: entry.rev,
            prev_rev: entry.prev_rev,
            operation: entry.operation,
            doc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn writer(dir: &TempDir, compress: bool) -> RevLogWriter {
        let (log, dat) = revlog_paths(dir.path(), 1);
        RevLogWriter::open(
            &log,
            &dat,
            DurabilityLevel::NoSync,
            compress,
            Arc::new(Mutex::new(())),
        )
        .unwrap()
    }

    fn reader(dir: &TempDir) -> RevLogReader {
        let (log, dat) = revlog_paths(dir.path(), 1);
        RevLogReader::open(&log, &dat).unwrap().unwrap()
    }

    #[test]
    fn test_write_assigns_ids_by_position() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, false);

        let mut a = RevLog::new(0, 0, Operation::Create, Some(b"{\"x\":1}".to_vec()));
        let mut b = RevLog::new(0, 0, Operation::Create, Some(b"{\"x\":2}".to_vec()));
        assert_eq!(w.write(&mut a).unwrap(), 0);
        assert_eq!(w.write(&mut b).unwrap(), 1);
        assert_eq!((a.doc_id, a.rev, a.prev_rev), (1, 1, 0));
        assert_eq!(b.doc_id, 2);

        let mut upd = RevLog::new(1, 1, Operation::Update, Some(b"{\"x\":3}".to_vec()));
        assert_eq!(w.write(&mut upd).unwrap(), 2);
        assert_eq!(upd.doc_id, 1);
        assert_eq!(w.count().unwrap(), 3);

        let mut r = reader(&dir);
        assert_eq!(r.count().unwrap(), 3);
        assert_eq!(r.read(0).unwrap(), a);
        assert_eq!(r.read(2).unwrap(), upd);
    }

    #[test]
    fn test_delete_has_no_payload() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, false);
        let mut create = RevLog::new(0, 0, Operation::Create, Some(b"doc".to_vec()));
        w.write(&mut create).unwrap();
        let mut delete = RevLog::new(create.doc_id, 1, Operation::Delete, None);
        let index = w.write(&mut delete).unwrap();

        let mut r = reader(&dir);
        let entry = r.read_entry(index).unwrap();
        assert_eq!(entry.operation, Operation::Delete);
        assert_eq!((entry.rev, entry.prev_rev), (2, 1));
        assert_eq!(r.read_payload(&entry).unwrap(), None);
    }

    #[test]
    fn test_read_out_of_range_is_not_found() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, false);
        w.write(&mut RevLog::new(0, 0, Operation::Create, Some(vec![1])))
            .unwrap();
        let mut r = reader(&dir);
        assert!(r.read(1).unwrap_err().is_not_found());
    }

    #[test]
    fn test_missing_files_mean_empty_collection() {
        let dir = TempDir::new().unwrap();
        let (log, dat) = revlog_paths(dir.path(), 7);
        assert!(RevLogReader::open(&log, &dat).unwrap().is_none());
    }

    #[test]
    fn test_compressed_payloads() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, true);
        let doc = vec![b'a'; 4096];
        let index = w
            .write(&mut RevLog::new(0, 0, Operation::Create, Some(doc.clone())))
            .unwrap();

        let (_, dat) = revlog_paths(dir.path(), 1);
        assert!(std::fs::metadata(&dat).unwrap().len() < 4096);
        assert_eq!(reader(&dir).read(index).unwrap().doc, Some(doc));
    }

    #[test]
    fn test_partial_entry_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        {
            let mut w = writer(&dir, false);
            w.write(&mut RevLog::new(0, 0, Operation::Create, Some(vec![1, 2, 3])))
                .unwrap();
        }
        let (log, _) = revlog_paths(dir.path(), 1);
        let mut f = OpenOptions::new().append(true).open(&log).unwrap();
        f.write_all(&[0xAB; 20]).unwrap();
        drop(f);

        let mut w = writer(&dir, false);
        assert_eq!(w.count().unwrap(), 1);
        let index = w
            .write(&mut RevLog::new(0, 0, Operation::Create, Some(vec![4])))
            .unwrap();
        assert_eq!(index, 1);
        assert_eq!(reader(&dir).read(1).unwrap().doc, Some(vec![4]));
    }

    #[test]
    fn test_torn_entry_repaired_before_next_append() {
        let dir = TempDir::new().unwrap();
        let lock = Arc::new(Mutex::new(()));
        let (log, dat) = revlog_paths(dir.path(), 1);
        let open = || RevLogWriter::open(&log, &dat, DurabilityLevel::NoSync, false, lock.clone()).unwrap();

        let mut first = open();
        let mut second = open();
        first
            .write(&mut RevLog::new(0, 0, Operation::Create, Some(vec![1])))
            .unwrap();

        // A write that died halfway through the entry
        let mut f = OpenOptions::new().append(true).open(&log).unwrap();
        f.write_all(&[0xCD; 30]).unwrap();
        drop(f);

        // Another writer still lands on an entry boundary
        let index = second
            .write(&mut RevLog::new(0, 0, Operation::Create, Some(vec![2])))
            .unwrap();
        assert_eq!(index, 1);
        first.close().unwrap();
        second.close().unwrap();

        let mut r = reader(&dir);
        assert_eq!(r.count().unwrap(), 2);
        assert_eq!(std::fs::metadata(&log).unwrap().len(), 2 * ENTRY_SIZE);
        assert_eq!(r.read(1).unwrap().doc, Some(vec![2]));
    }

    #[test]
    fn test_corrupted_entry_detected() {
        let dir = TempDir::new().unwrap();
        let mut w = writer(&dir, false);
        w.write(&mut RevLog::new(0, 0, Operation::Create, Some(vec![9])))
            .unwrap();

        let (log, _) = revlog_paths(dir.path(), 1);
        let mut bytes = std::fs::read(&log).unwrap();
        bytes[9] ^= 0x01;
        std::fs::write(&log, &bytes).unwrap();

        let err = reader(&dir).read(0).unwrap_err();
        assert!(matches!(err, ConfDbError::Corruption(_)));
    }
}
