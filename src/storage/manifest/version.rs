//! Logical manifest: which revisions are live at one changeset
//!
//! Two physical encodings exist and are chosen per database:
//! - `Scan` (version 1) keeps (doc id, revision) pairs plus the end of the
//!   committed part of each revlog; a snapshot replays the log up to that end
//!   and keeps the records the manifest still contains
//! - `Indexed` (version 2) also keeps the revlog position of every live entry,
//!   so a snapshot reads exactly those records
//!
//! Both answer the same questions through `Manifest`, callers never branch on
//! the variant.

use crate::config::ManifestFormat;
use crate::storage::revlog::{Operation, RevLogEntry, RevLogReader};
use crate::txn::commit_log::{CommitChange, CommitOp};
use crate::types::{Changeset, CollectionEntry, ConfigEntry, DocId, Revision};
use crate::{ConfDbError, Result};
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Live document reference, as stored by one manifest encoding
pub trait LiveRef: Clone {
    fn from_change(change: &CommitChange) -> Self;
    fn doc_id(&self) -> DocId;
    fn rev(&self) -> Revision;
    fn to_entry(&self) -> ConfigEntry;
}

/// Version 1 reference: identity only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocRef {
    pub doc_id: DocId,
    pub rev: Revision,
}

impl LiveRef for DocRef {
    fn from_change(change: &CommitChange) -> Self {
        Self {
            doc_id: change.doc_id,
            rev: change.rev,
        }
    }

    fn doc_id(&self) -> DocId {
        self.doc_id
    }

    fn rev(&self) -> Revision {
        self.rev
    }

    fn to_entry(&self) -> ConfigEntry {
        ConfigEntry {
            doc_id: self.doc_id,
            rev: self.rev,
            index: None,
        }
    }
}

/// Version 2 reference: identity plus revlog position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedRef {
    pub doc_id: DocId,
    pub rev: Revision,
    pub index: u64,
}

impl LiveRef for IndexedRef {
    fn from_change(change: &CommitChange) -> Self {
        Self {
            doc_id: change.doc_id,
            rev: change.rev,
            index: change.index,
        }
    }

    fn doc_id(&self) -> DocId {
        self.doc_id
    }

    fn rev(&self) -> Revision {
        self.rev
    }

    fn to_entry(&self) -> ConfigEntry {
        ConfigEntry {
            doc_id: self.doc_id,
            rev: self.rev,
            index: Some(self.index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionState<R> {
    pub entry: CollectionEntry,
    /// Live documents in commit order
    pub docs: Vec<R>,
    /// One past the highest revlog index committed so far. Entries at or
    /// beyond it were written after this changeset.
    pub log_end: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestBody<R> {
    changeset: Changeset,
    next_collection_id: u64,
    collections: BTreeMap<String, CollectionState<R>>,
}

impl<R: LiveRef> ManifestBody<R> {
    fn empty() -> Self {
        Self {
            changeset: 0,
            next_collection_id: 1,
            collections: BTreeMap::new(),
        }
    }

    fn docs(&self, collection: &str) -> &[R] {
        self.collections
            .get(collection)
            .map(|c| c.docs.as_slice())
            .unwrap_or(&[])
    }

    fn state_mut(&mut self, change: &CommitChange) -> Result<&mut CollectionState<R>> {
        match self.collections.get_mut(&change.collection) {
            Some(state) if state.entry.id == change.collection_id => Ok(state),
            _ => Err(ConfDbError::NotFound(format!(
                "collection '{}' (id {})",
                change.collection, change.collection_id
            ))),
        }
    }

    fn apply(&mut self, change: &CommitChange) -> Result<()> {
        match change.op {
            CommitOp::CreateCollection => {
                if self.collections.contains_key(&change.collection) {
                    return Err(ConfDbError::InvalidArgument(format!(
                        "collection '{}' already exists",
                        change.collection
                    )));
                }
                self.collections.insert(
                    change.collection.clone(),
                    CollectionState {
                        entry: CollectionEntry {
                            id: change.collection_id,
                            name: change.collection.clone(),
                        },
                        docs: Vec::new(),
                        log_end: 0,
                    },
                );
                self.next_collection_id = self.next_collection_id.max(change.collection_id + 1);
            }
            CommitOp::DropCollection => {
                self.state_mut(change)?;
                self.collections.remove(&change.collection);
            }
            CommitOp::CreateDoc => {
                let state = self.state_mut(change)?;
                state.docs.push(R::from_change(change));
                state.log_end = state.log_end.max(change.index + 1);
            }
            CommitOp::UpdateDoc => {
                let state = self.state_mut(change)?;
                state.log_end = state.log_end.max(change.index + 1);
                let slot = state
                    .docs
                    .iter_mut()
                    .find(|r| r.doc_id() == change.doc_id)
                    .ok_or_else(|| missing_doc(change))?;
                *slot = R::from_change(change);
            }
            CommitOp::DeleteDoc => {
                let state = self.state_mut(change)?;
                state.log_end = state.log_end.max(change.index + 1);
                let pos = state
                    .docs
                    .iter()
                    .position(|r| r.doc_id() == change.doc_id)
                    .ok_or_else(|| missing_doc(change))?;
                state.docs.remove(pos);
            }
        }
        Ok(())
    }
}

fn missing_doc(change: &CommitChange) -> ConfDbError {
    ConfDbError::NotFound(format!(
        "document {} in collection '{}'",
        change.doc_id, change.collection
    ))
}

/// Live set of every collection at one changeset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Manifest {
    Scan(ManifestBody<DocRef>),
    Indexed(ManifestBody<IndexedRef>),
}

macro_rules! with_body {
    ($manifest:expr, $body:ident => $e:expr) => {
        match $manifest {
            Manifest::Scan($body) => $e,
            Manifest::Indexed($body) => $e,
        }
    };
}

impl Manifest {
    /// Manifest of a database with no commits (changeset 0).
    pub fn empty(format: ManifestFormat) -> Self {
        match format {
            ManifestFormat::Scan => Manifest::Scan(ManifestBody::empty()),
            ManifestFormat::Indexed => Manifest::Indexed(ManifestBody::empty()),
        }
    }

    /// 1 for scan-based manifests, 2 for indexed ones.
    pub fn version(&self) -> u8 {
        self.format().version()
    }

    pub fn format(&self) -> ManifestFormat {
        match self {
            Manifest::Scan(_) => ManifestFormat::Scan,
            Manifest::Indexed(_) => ManifestFormat::Indexed,
        }
    }

    pub fn changeset(&self) -> Changeset {
        with_body!(self, b => b.changeset)
    }

    pub(crate) fn set_changeset(&mut self, changeset: Changeset) {
        with_body!(self, b => b.changeset = changeset)
    }

    pub fn next_collection_id(&self) -> u64 {
        with_body!(self, b => b.next_collection_id)
    }

    pub(crate) fn raise_next_collection_id(&mut self, floor: u64) {
        with_body!(self, b => b.next_collection_id = b.next_collection_id.max(floor))
    }

    pub fn collection_names(&self) -> Vec<String> {
        with_body!(self, b => b.collections.keys().cloned().collect())
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionEntry> {
        with_body!(self, b => b.collections.get(name).map(|c| &c.entry))
    }

    /// True when `entry` is the collection currently registered under its name.
    pub fn has_collection(&self, entry: &CollectionEntry) -> bool {
        self.collection(&entry.name).map(|c| c.id) == Some(entry.id)
    }

    /// Live documents of `collection`, in commit order.
    pub fn get_config_entries(&self, collection: &str) -> Vec<ConfigEntry> {
        with_body!(self, b => b.docs(collection).iter().map(LiveRef::to_entry).collect())
    }

    pub fn count(&self, collection: &str) -> usize {
        with_body!(self, b => b.docs(collection).len())
    }

    pub fn contains_doc(&self, collection: &str, doc_id: DocId, rev: Revision) -> bool {
        with_body!(self, b => b
            .docs(collection)
            .iter()
            .any(|r| r.doc_id() == doc_id && r.rev() == rev))
    }

    /// Live revision of one document, if it is live.
    pub fn live_rev(&self, collection: &str, doc_id: DocId) -> Option<Revision> {
        with_body!(self, b => b
            .docs(collection)
            .iter()
            .find(|r| r.doc_id() == doc_id)
            .map(LiveRef::rev))
    }

    /// Applies one committed change.
    pub fn apply(&mut self, change: &CommitChange) -> Result<()> {
        with_body!(self, b => b.apply(change))
    }

    /// The revlog entries live in `collection`, read through `reader`.
    pub fn snapshot(&self, collection: &str, reader: &mut RevLogReader) -> Result<Vec<RevLogEntry>> {
        match self {
            Manifest::Scan(body) => {
                let state = match body.collections.get(collection) {
                    Some(state) if !state.docs.is_empty() => state,
                    _ => return Ok(Vec::new()),
                };
                let live: AHashSet<(DocId, Revision)> =
                    state.docs.iter().map(|r| (r.doc_id, r.rev)).collect();

                let mut snapshot: Vec<RevLogEntry> = Vec::with_capacity(live.len());
                let mut positions: AHashMap<(DocId, Revision), usize> = AHashMap::new();
                let end = reader.count()?.min(state.log_end);
                for index in 0..end {
                    let entry = reader.read_entry(index)?;
                    if entry.operation == Operation::Delete {
                        continue;
                    }
                    let key = (entry.doc_id, entry.rev);
                    if !live.contains(&key) {
                        continue;
                    }
                    // Orphans of rolled-back transactions and revisions
                    // rewritten after a database rollback can share the
                    // (doc, rev); below the end, the later one wins.
                    match positions.get(&key) {
                        Some(&pos) => snapshot[pos] = entry,
                        None => {
                            positions.insert(key, snapshot.len());
                            snapshot.push(entry);
                        }
                    }
                }
                Ok(snapshot)
            }
            Manifest::Indexed(body) => body
                .docs(collection)
                .iter()
                .map(|r| reader.read_entry(r.index))
                .collect(),
        }
    }
}
