//! Lazy iteration over a collection snapshot
//!
//! The snapshot (live revlog entries at one changeset) is computed up front;
//! payloads are read and decoded one at a time as the caller advances.

use crate::codec::{Document, DocumentCodec};
use crate::storage::revlog::{Operation, RevLogEntry, RevLogReader};
use crate::types::{Config, Predicate};
use crate::Result;
use std::vec;

pub struct ConfigIterator<'p, T> {
    /// `None` once closed, or for a collection that was never written
    reader: Option<RevLogReader>,
    snapshot: vec::IntoIter<RevLogEntry>,
    codec: DocumentCodec,
    predicate: Option<Box<dyn Predicate<T> + 'p>>,
    peeked: Option<Result<Config<T>>>,
}

impl<'p, T: Document> ConfigIterator<'p, T> {
    pub(crate) fn new(
        reader: RevLogReader,
        snapshot: Vec<RevLogEntry>,
        codec: DocumentCodec,
        predicate: Option<Box<dyn Predicate<T> + 'p>>,
    ) -> Self {
        Self {
            reader: Some(reader),
            snapshot: snapshot.into_iter(),
            codec,
            predicate,
            peeked: None,
        }
    }

    /// An iterator that is exhausted from the start.
    pub(crate) fn empty(codec: DocumentCodec) -> Self {
        Self {
            reader: None,
            snapshot: Vec::new().into_iter(),
            codec,
            predicate: None,
            peeked: None,
        }
    }

    pub fn has_next(&mut self) -> bool {
        if self.peeked.is_none() {
            self.peeked = self.advance();
        }
        self.peeked.is_some()
    }

    /// Releases the underlying files. The iterator is exhausted afterwards.
    pub fn close(&mut self) {
        self.reader = None;
        self.snapshot = Vec::new().into_iter();
        self.peeked = None;
    }

    /// Drains the iterator into its documents, stopping at the first error.
    pub fn documents(self) -> Result<Vec<T>> {
        self.map(|item| item.map(Config::into_document)).collect()
    }

    fn advance(&mut self) -> Option<Result<Config<T>>> {
        loop {
            let entry = self.snapshot.next()?;
            if entry.operation == Operation::Delete {
                continue;
            }
            let reader = self.reader.as_mut()?;
            let bytes = match reader.read_payload(&entry) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            };
            let document: T = match self.codec.decode(&bytes) {
                Ok(doc) => doc,
                Err(e) => return Some(Err(e)),
            };
            if let Some(predicate) = &self.predicate {
                if !predicate.test(&document) {
                    continue;
                }
            }
            return Some(Ok(Config::new(
                entry.doc_id,
                entry.rev,
                entry.prev_rev,
                document,
            )));
        }
    }
}

impl<'p, T: Document> Iterator for ConfigIterator<'p, T> {
    type Item = Result<Config<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.peeked.take().or_else(|| self.advance());
        if item.is_none() {
            self.close();
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DurabilityLevel;
    use crate::storage::revlog::{revlog_paths, RevLog, RevLogWriter};
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Limit {
        key: String,
        value: u32,
    }

    /// Writes the documents and returns a reader plus every entry.
    fn fixture(dir: &TempDir, limits: &[Limit]) -> (RevLogReader, Vec<RevLogEntry>) {
        let (log, dat) = revlog_paths(dir.path(), 1);
        let mut writer = RevLogWriter::open(
            &log,
            &dat,
            DurabilityLevel::NoSync,
            false,
            Arc::new(Mutex::new(())),
        )
        .unwrap();
        for limit in limits {
            let bytes = DocumentCodec::Json.to_bytes(limit).unwrap();
            writer
                .write(&mut RevLog::new(0, 0, Operation::Create, Some(bytes)))
                .unwrap();
        }
        writer
            .write(&mut RevLog::new(1, 1, Operation::Delete, None))
            .unwrap();

        let mut reader = RevLogReader::open(&log, &dat).unwrap().unwrap();
        let entries = (0..reader.count().unwrap())
            .map(|i| reader.read_entry(i).unwrap())
            .collect();
        (reader, entries)
    }

    fn limits() -> Vec<Limit> {
        (1..=4)
            .map(|i| Limit {
                key: format!("k{}", i),
                value: i * 10,
            })
            .collect()
    }

    #[test]
    fn test_skips_deletions_and_filters() {
        let dir = TempDir::new().unwrap();
        let (reader, entries) = fixture(&dir, &limits());
        assert_eq!(entries.len(), 5);

        let predicate = |l: &Limit| l.value >= 20;
        let mut iter: ConfigIterator<'_, Limit> =
            ConfigIterator::new(reader, entries, DocumentCodec::Json, Some(Box::new(predicate)));
        assert!(iter.has_next());
        assert!(iter.has_next());

        let ids: Vec<u64> = iter.by_ref().map(|c| c.unwrap().id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert!(!iter.has_next());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_close_releases_and_exhausts() {
        let dir = TempDir::new().unwrap();
        let (reader, entries) = fixture(&dir, &limits());
        let mut iter: ConfigIterator<'_, Limit> =
            ConfigIterator::new(reader, entries, DocumentCodec::Json, None);
        let first = iter.next().unwrap().unwrap();
        assert_eq!(first.document.key, "k1");
        iter.close();
        assert!(!iter.has_next());
    }

    #[test]
    fn test_empty_iterator() {
        let mut iter: ConfigIterator<'_, Limit> = ConfigIterator::empty(DocumentCodec::Json);
        assert!(!iter.has_next());
        assert!(iter.next().is_none());
        assert!(iter.documents().unwrap().is_empty());
    }

    #[test]
    fn test_decode_error_is_reported() {
        let dir = TempDir::new().unwrap();
        let (reader, entries) = fixture(&dir, &limits());
        // JSON limits cannot be read back as a bare integer
        let iter: ConfigIterator<'_, u64> =
            ConfigIterator::new(reader, entries, DocumentCodec::Json, None);
        assert!(iter.documents().is_err());
    }
}
