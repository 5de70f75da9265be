//! Collection operations
//!
//! A `Collection<T>` is a typed view of one collection: reads go through the
//! manifest of the view's changeset (head unless pinned), writes go through a
//! transaction. Every write comes in three forms:
//! - `add(doc)`: own transaction, committed immediately
//! - `add_with(doc, &meta)`: same, with committer and message
//! - `add_in(&mut txn, doc)`: part of a caller-owned transaction

use crate::codec::Document;
use crate::database::core::DbInner;
use crate::database::iterator::ConfigIterator;
use crate::storage::manifest::Manifest;
use crate::storage::revlog::{Operation, RevLog};
use crate::txn::commit_log::{CommitChange, CommitOp};
use crate::txn::transaction::Transaction;
use crate::types::{Changeset, CollectionEntry, CommitMeta, Config, DocId, Predicate, Revision};
use crate::{ConfDbError, Result};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

pub struct Collection<T> {
    inner: Arc<DbInner>,
    entry: CollectionEntry,
    /// Pinned changeset; `None` follows the head
    changeset: Option<Changeset>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            entry: self.entry.clone(),
            changeset: self.changeset,
            _marker: PhantomData,
        }
    }
}

impl<T: Document> Collection<T> {
    pub(crate) fn new(inner: Arc<DbInner>, entry: CollectionEntry, changeset: Option<Changeset>) -> Self {
        Self {
            inner,
            entry,
            changeset,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn id(&self) -> u64 {
        self.entry.id
    }

    pub fn entry(&self) -> &CollectionEntry {
        &self.entry
    }

    /// Changeset this view is pinned to, `None` for the head.
    pub fn changeset(&self) -> Option<Changeset> {
        self.changeset
    }

    /// The same collection pinned to `changeset`.
    pub fn at(&self, changeset: Changeset) -> Self {
        Self {
            changeset: Some(changeset),
            ..self.clone()
        }
    }

    // ---- reads ----

    fn manifest(&self, changeset: Option<Changeset>) -> Result<Arc<Manifest>> {
        self.inner.manifest_at(changeset.or(self.changeset))
    }

    fn count_in_manifest(&self, manifest: &Manifest) -> usize {
        if manifest.has_collection(&self.entry) {
            manifest.count(&self.entry.name)
        } else {
            0
        }
    }

    /// Number of live documents in this view.
    pub fn count(&self) -> Result<usize> {
        let manifest = self.manifest(None)?;
        Ok(self.count_in_manifest(&manifest))
    }

    /// Number of live documents at `changeset`.
    pub fn count_at(&self, changeset: Changeset) -> Result<usize> {
        let manifest = self.manifest(Some(changeset))?;
        Ok(self.count_in_manifest(&manifest))
    }

    /// Number of live documents as `txn` would see them after commit.
    pub fn count_in(&self, txn: &Transaction) -> Result<usize> {
        self.check_transaction(txn)?;
        Ok(self.count_in_manifest(&txn.manifest()?))
    }

    pub fn find_all(&self) -> Result<ConfigIterator<'static, T>> {
        self.iter(None)
    }

    pub fn find<'p, P>(&self, predicate: P) -> Result<ConfigIterator<'p, T>>
    where
        P: Predicate<T> + 'p,
    {
        self.iter(Some(Box::new(predicate)))
    }

    /// First document matching `predicate`, if any.
    pub fn find_one<P: Predicate<T>>(&self, predicate: P) -> Result<Option<Config<T>>> {
        let mut iter = self.find(predicate)?;
        let found = iter.next().transpose();
        iter.close();
        found
    }

    /// Live document `id`, if any.
    pub fn get(&self, id: DocId) -> Result<Option<Config<T>>> {
        let manifest = self.manifest(None)?;
        if !manifest.has_collection(&self.entry) {
            return Ok(None);
        }
        let live = match manifest
            .get_config_entries(&self.entry.name)
            .into_iter()
            .find(|e| e.doc_id == id)
        {
            Some(live) => live,
            None => return Ok(None),
        };
        let mut reader = match self.inner.open_reader(self.entry.id)? {
            Some(reader) => reader,
            None => return Ok(None),
        };

        let entry = match live.index {
            Some(index) => reader.read_entry(index)?,
            None => match manifest
                .snapshot(&self.entry.name, &mut reader)?
                .into_iter()
                .find(|e| e.doc_id == id)
            {
                Some(entry) => entry,
                None => return Ok(None),
            },
        };
        let mut iter = ConfigIterator::new(reader, vec![entry], self.inner.codec(), None);
        iter.next().transpose()
    }

    fn iter<'p>(&self, predicate: Option<Box<dyn Predicate<T> + 'p>>) -> Result<ConfigIterator<'p, T>> {
        let codec = self.inner.codec();
        let manifest = self.manifest(None)?;
        if !manifest.has_collection(&self.entry) {
            return Ok(ConfigIterator::empty(codec));
        }
        let mut reader = match self.inner.open_reader(self.entry.id)? {
            Some(reader) => reader,
            None => return Ok(ConfigIterator::empty(codec)),
        };
        let snapshot = manifest.snapshot(&self.entry.name, &mut reader)?;
        debug!(
            collection = %self.entry.name,
            changeset = manifest.changeset(),
            entries = snapshot.len(),
            "confdb.collection.snapshot"
        );
        Ok(ConfigIterator::new(reader, snapshot, codec, predicate))
    }

    // ---- writes ----

    pub fn add(&self, document: T) -> Result<Config<T>> {
        self.add_with(document, &CommitMeta::default())
    }

    pub fn add_with(&self, document: T, meta: &CommitMeta) -> Result<Config<T>> {
        self.autocommit(meta, |txn| self.add_in(txn, document))
            .map(|(config, _)| config)
    }

    /// Appends a new document (revision 1) inside `txn`.
    pub fn add_in(&self, txn: &mut Transaction, document: T) -> Result<Config<T>> {
        self.check_transaction(txn)?;
        self.require_collection(&txn.manifest()?)?;

        let payload = self.inner.codec().to_bytes(&document)?;
        let mut record = RevLog::new(0, 0, Operation::Create, Some(payload));
        let index = txn.writer(&self.entry)?.write(&mut record)?;
        txn.log_change(self.change(CommitOp::CreateDoc, &record, index), false)?;

        Ok(Config::new(record.doc_id, record.rev, record.prev_rev, document))
    }

    /// Stores `config.document` as the next revision of `config.id`.
    ///
    /// If the document moved past `config.revision` in the meantime, fails
    /// with `Conflict` when `check_conflict` is set, otherwise builds on the
    /// newer revision.
    pub fn update(&self, config: Config<T>, check_conflict: bool) -> Result<Config<T>> {
        self.update_with(config, check_conflict, &CommitMeta::default())
    }

    pub fn update_with(&self, config: Config<T>, check_conflict: bool, meta: &CommitMeta) -> Result<Config<T>> {
        self.autocommit(meta, |txn| self.update_in(txn, config, check_conflict))
            .map(|(config, published)| self.as_published(config, &published))
    }

    pub fn update_in(&self, txn: &mut Transaction, config: Config<T>, check_conflict: bool) -> Result<Config<T>> {
        let payload = self.inner.codec().to_bytes(&config.document)?;
        let record = self.write_revision(txn, &config, Operation::Update, Some(payload), check_conflict)?;
        Ok(Config::new(config.id, record.rev, record.prev_rev, config.document))
    }

    /// Deletes `config.id`, with the same conflict rules as `update`.
    pub fn remove(&self, config: Config<T>, check_conflict: bool) -> Result<Config<T>> {
        self.remove_with(config, check_conflict, &CommitMeta::default())
    }

    pub fn remove_with(&self, config: Config<T>, check_conflict: bool, meta: &CommitMeta) -> Result<Config<T>> {
        self.autocommit(meta, |txn| self.remove_in(txn, config, check_conflict))
            .map(|(config, published)| self.as_published(config, &published))
    }

    pub fn remove_in(&self, txn: &mut Transaction, config: Config<T>, check_conflict: bool) -> Result<Config<T>> {
        let record = self.write_revision(txn, &config, Operation::Delete, None, check_conflict)?;
        Ok(Config::new(config.id, record.rev, record.prev_rev, config.document))
    }

    /// Appends an update or delete on top of the document's live revision.
    fn write_revision(
        &self,
        txn: &mut Transaction,
        config: &Config<T>,
        operation: Operation,
        payload: Option<Vec<u8>>,
        check_conflict: bool,
    ) -> Result<RevLog> {
        self.check_transaction(txn)?;
        let view = txn.manifest()?;
        self.require_collection(&view)?;
        let live = view
            .live_rev(&self.entry.name, config.id)
            .ok_or_else(|| self.missing(config.id))?;
        let base = self.resolve_base(config.id, config.revision, live, check_conflict)?;

        let mut record = RevLog::new(config.id, base, operation, payload);
        let index = txn.writer(&self.entry)?.write(&mut record)?;
        let op = match operation {
            Operation::Delete => CommitOp::DeleteDoc,
            _ => CommitOp::UpdateDoc,
        };
        txn.log_change(self.change(op, &record, index), check_conflict)?;
        debug!(
            collection = %self.entry.name,
            doc_id = config.id,
            rev = record.rev,
            op = %op,
            "confdb.collection.write"
        );
        Ok(record)
    }

    /// Revision the new record builds on: the caller's, unless the document
    /// has moved on.
    fn resolve_base(
        &self,
        doc_id: DocId,
        observed: Revision,
        live: Revision,
        check_conflict: bool,
    ) -> Result<Revision> {
        if live == observed {
            Ok(observed)
        } else if check_conflict {
            Err(ConfDbError::Conflict {
                collection: self.entry.name.clone(),
                doc_id,
                revision: live,
            })
        } else {
            Ok(live)
        }
    }

    fn change(&self, op: CommitOp, record: &RevLog, index: u64) -> CommitChange {
        CommitChange {
            op,
            collection: self.entry.name.clone(),
            collection_id: self.entry.id,
            doc_id: record.doc_id,
            rev: record.rev,
            prev_rev: record.prev_rev,
            index,
        }
    }

    fn autocommit<R>(
        &self,
        meta: &CommitMeta,
        op: impl FnOnce(&mut Transaction) -> Result<R>,
    ) -> Result<(R, Vec<CommitChange>)> {
        self.check_writable()?;
        let mut txn = Transaction::begin(self.inner.clone());
        match op(&mut txn) {
            Ok(result) => {
                let (_, published) = txn.commit_changes(meta)?;
                Ok((result, published))
            }
            Err(e) => Err(txn.fail(e)),
        }
    }

    /// `config` with the revision its write was committed as.
    fn as_published(&self, config: Config<T>, published: &[CommitChange]) -> Config<T> {
        match published
            .iter()
            .rev()
            .find(|c| c.collection_id == self.entry.id && c.doc_id == config.id)
        {
            Some(c) => Config::new(config.id, c.rev, c.prev_rev, config.document),
            None => config,
        }
    }

    fn check_writable(&self) -> Result<()> {
        match self.changeset {
            Some(cs) => Err(ConfDbError::InvalidArgument(format!(
                "collection '{}' is pinned to changeset {} and read-only",
                self.entry.name, cs
            ))),
            None => Ok(()),
        }
    }

    fn check_transaction(&self, txn: &Transaction) -> Result<()> {
        if !Arc::ptr_eq(txn.inner(), &self.inner) {
            return Err(ConfDbError::InvalidArgument(format!(
                "transaction {} belongs to another database",
                txn.id()
            )));
        }
        self.check_writable()
    }

    fn require_collection(&self, manifest: &Manifest) -> Result<()> {
        if manifest.has_collection(&self.entry) {
            Ok(())
        } else {
            Err(ConfDbError::NotFound(format!("collection '{}'", self.entry.name)))
        }
    }

    fn missing(&self, doc_id: DocId) -> ConfDbError {
        ConfDbError::NotFound(format!(
            "document {} in collection '{}'",
            doc_id, self.entry.name
        ))
    }
}
