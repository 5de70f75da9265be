//! Value types shared across the engine

use serde::{Deserialize, Serialize};

/// Changeset number: one per committed transaction, starting at 1.
/// Changeset 0 is the empty database.
pub type Changeset = u64;

/// Identifier of a logical document, stable for its whole lifetime.
pub type DocId = u64;

/// Per-document revision number, starting at 1.
pub type Revision = u64;

/// Collection metadata stored in every manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionEntry {
    /// Also names the collection's files (`col{id}.log` / `col{id}.dat`).
    pub id: u64,
    pub name: String,
}

/// One live document as recorded by a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub doc_id: DocId,
    pub rev: Revision,
    /// Position in the collection's revlog. `None` for scan-format manifests,
    /// which only know (doc id, revision).
    pub index: Option<u64>,
}

/// A document handle returned to callers.
///
/// This is a value snapshot: changing `document` does nothing until the handle
/// is passed back through `Collection::update`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config<T> {
    pub id: DocId,
    pub revision: Revision,
    pub prev_revision: Revision,
    pub document: T,
}

impl<T> Config<T> {
    pub fn new(id: DocId, revision: Revision, prev_revision: Revision, document: T) -> Self {
        Self {
            id,
            revision,
            prev_revision,
            document,
        }
    }

    pub fn into_document(self) -> T {
        self.document
    }

    /// Same handle with a replaced document, ready for `update`.
    pub fn with_document(self, document: T) -> Self {
        Self { document, ..self }
    }
}

/// Audit information attached to a commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitMeta {
    pub committer: Option<String>,
    pub message: Option<String>,
}

impl CommitMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committer(mut self, committer: impl Into<String>) -> Self {
        self.committer = Some(committer.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Document filter used by `find`. Must be a pure function of the document.
pub trait Predicate<T> {
    fn test(&self, doc: &T) -> bool;
}

impl<T, F> Predicate<T> for F
where
    F: Fn(&T) -> bool,
{
    fn test(&self, doc: &T) -> bool {
        self(doc)
    }
}
