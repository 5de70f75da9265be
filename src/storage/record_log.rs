//! Append-only record file
//!
//! Shared by the manifest store and the commit log. Records are framed with a
//! length prefix and a CRC32 (see `checksum`), appended at the end of the file
//! and never rewritten.
//!
//! ## Crash handling
//! - A torn frame at the end of the file is a crashed append: it is reported,
//!   cut off on open, and the next append starts on a clean boundary
//! - A bad frame followed by more data is real corruption and fails the open

use crate::storage::checksum::{Checksum, ChecksumError, FRAME_OVERHEAD};
use crate::{ConfDbError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct RecordLog {
    path: PathBuf,
    file: File,
    /// End of the last complete frame
    len: u64,
    /// Set when a torn append could not be removed
    poisoned: bool,
}

impl RecordLog {
    /// Opens (or creates) the log and hands every valid record to `visit`
    /// together with its offset, in file order.
    pub fn open<P, F>(path: P, mut visit: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: FnMut(u64, &[u8]) -> Result<()>,
    {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut buffer = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut buffer)?;

        let mut offset = 0usize;
        let mut records = 0usize;
        while offset < buffer.len() {
            match Checksum::decode_frame(&buffer[offset..]) {
                Ok((data, frame_len)) => {
                    visit(offset as u64, data)?;
                    offset += frame_len;
                    records += 1;
                }
                Err(ChecksumError::Truncated { .. }) => break,
                Err(ChecksumError::Mismatch { .. }) if Self::is_last_frame(&buffer[offset..]) => break,
                Err(err) => {
                    return Err(ConfDbError::Corruption(format!(
                        "{} at offset {}: {}",
                        path.display(),
                        offset,
                        err
                    )))
                }
            }
        }

        if offset < buffer.len() {
            warn!(
                path = %path.display(),
                valid_len = offset,
                file_len = buffer.len(),
                "confdb.record_log.truncate_partial"
            );
            file.set_len(offset as u64)?;
            file.sync_all()?;
        }
        debug!(path = %path.display(), records, "confdb.record_log.open");

        Ok(Self {
            path,
            file,
            len: offset as u64,
            poisoned: false,
        })
    }

    /// A frame whose declared length reaches exactly to (or past) the end of
    /// the buffer is the final one.
    fn is_last_frame(buf: &[u8]) -> bool {
        if buf.len() < 4 {
            return true;
        }
        let data_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        FRAME_OVERHEAD + data_len >= buf.len()
    }

    /// Appends one record and returns its offset.
    ///
    /// If a failed append could not be cut back, the file no longer ends at a
    /// frame boundary and every later append is refused.
    pub fn append(&mut self, data: &[u8]) -> Result<u64> {
        if self.poisoned {
            return Err(ConfDbError::Corruption(format!(
                "{} has a partial record after a failed append",
                self.path.display()
            )));
        }
        let offset = self.len;
        let frame = Checksum::encode_frame(data);
        if let Err(e) = self.file.write_all(&frame) {
            // Leave no partial frame behind for the next append to follow
            if let Err(cut) = self.file.set_len(offset) {
                warn!(path = %self.path.display(), offset, error = %e, "confdb.record_log.append_failed");
                self.poisoned = true;
                return Err(cut.into());
            }
            return Err(e.into());
        }
        self.len += frame.len() as u64;
        Ok(offset)
    }

    pub fn read_at(&mut self, offset: u64) -> Result<Vec<u8>> {
        if offset >= self.len {
            return Err(ConfDbError::NotFound(format!(
                "record at offset {} in {}",
                offset,
                self.path.display()
            )));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut len_buf = [0u8; 4];
        self.file.read_exact(&mut len_buf)?;
        let data_len = u32::from_le_bytes(len_buf) as usize;

        let mut frame = vec![0u8; FRAME_OVERHEAD + data_len];
        frame[..4].copy_from_slice(&len_buf);
        self.file.read_exact(&mut frame[4..])?;
        let (data, _) = Checksum::decode_frame(&frame)?;
        Ok(data.to_vec())
    }

    /// Cuts the log back to `len`. Only used to discard a record whose
    /// enclosing commit failed before becoming visible.
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        if len > self.len {
            return Err(ConfDbError::InvalidArgument(format!(
                "cannot truncate {} to {} bytes, only {} are valid",
                self.path.display(),
                len,
                self.len
            )));
        }
        self.file.set_len(len)?;
        self.len = len;
        self.poisoned = false;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    pub fn len(&self) -> u64 {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn collect(path: &Path) -> (RecordLog, Vec<(u64, Vec<u8>)>) {
        let mut seen = Vec::new();
        let log = RecordLog::open(path, |offset, data| {
            seen.push((offset, data.to_vec()));
            Ok(())
        })
        .unwrap();
        (log, seen)
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("commit.log");

        let (mut log, seen) = collect(&path);
        assert!(seen.is_empty());
        let a = log.append(b"alpha").unwrap();
        let b = log.append(b"beta").unwrap();
        assert_eq!(a, 0);
        assert_eq!(log.read_at(b).unwrap(), b"beta");
        drop(log);

        let (mut log, seen) = collect(&path);
        assert_eq!(seen, vec![(a, b"alpha".to_vec()), (b, b"beta".to_vec())]);
        assert_eq!(log.read_at(a).unwrap(), b"alpha");
    }

    #[test]
    fn test_partial_tail_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("manifest.log");

        let (mut log, _) = collect(&path);
        log.append(b"complete").unwrap();
        let good_len = log.len();
        drop(log);

        // Simulate a crash in the middle of an append
        let torn = Checksum::encode_frame(b"never finished");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&torn[..torn.len() - 3]).unwrap();
        drop(file);

        let (mut log, seen) = collect(&path);
        assert_eq!(seen.len(), 1);
        assert_eq!(log.len(), good_len);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

        let next = log.append(b"after crash").unwrap();
        assert_eq!(next, good_len);
        drop(log);
        let (_, seen) = collect(&path);
        assert_eq!(seen[1].1, b"after crash");
    }

    #[test]
    fn test_corruption_in_the_middle_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("commit.log");

        let (mut log, _) = collect(&path);
        log.append(b"first record").unwrap();
        log.append(b"second record").unwrap();
        drop(log);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[6] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let result = RecordLog::open(&path, |_, _| Ok(()));
        assert!(matches!(result, Err(ConfDbError::Corruption(_))));
    }

    #[test]
    fn test_poisoned_log_refuses_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("commit.log");

        let (mut log, _) = collect(&path);
        let first = log.append(b"first").unwrap();
        let mark = log.len();
        log.poisoned = true;
        assert!(matches!(log.append(b"lost"), Err(ConfDbError::Corruption(_))));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), mark);

        // Cutting back to a known boundary makes the log usable again
        log.truncate(mark).unwrap();
        let next = log.append(b"second").unwrap();
        assert_eq!(next, mark);
        assert_eq!(log.read_at(first).unwrap(), b"first");
    }

    #[test]
    fn test_truncate_discards_last_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("commit.log");

        let (mut log, _) = collect(&path);
        log.append(b"kept").unwrap();
        let mark = log.len();
        let dropped = log.append(b"discarded").unwrap();
        log.truncate(mark).unwrap();
        assert!(log.read_at(dropped).unwrap_err().is_not_found());
        drop(log);

        let (_, seen) = collect(&path);
        assert_eq!(seen.len(), 1);
    }
}
