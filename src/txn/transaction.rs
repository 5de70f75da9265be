//! Transaction lifecycle: begin, log, commit, rollback
//!
//! A transaction owns one revlog writer per collection it touches and the
//! list of changes those writes produced. Revisions are appended to the
//! collection files as soon as they are written; they only become visible
//! when `commit` publishes a manifest that references them. Rolling back
//! just drops the writers, leaving the appended entries as dead history.

use crate::database::core::DbInner;
use crate::storage::manifest::Manifest;
use crate::storage::revlog::RevLogWriter;
use crate::txn::commit_log::CommitChange;
use crate::types::{Changeset, CollectionEntry, CommitMeta};
use crate::{ConfDbError, Result};
use ahash::AHashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tracing::{debug, warn};

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

/// A logged change and whether its base revision is re-checked at commit
#[derive(Debug, Clone)]
pub(crate) struct PendingChange {
    pub change: CommitChange,
    pub checked: bool,
}

pub struct Transaction {
    inner: Arc<DbInner>,
    id: u64,
    state: TransactionState,
    /// Collection id -> writer, opened on first write
    writers: AHashMap<u64, RevLogWriter>,
    changes: Vec<PendingChange>,
}

impl Transaction {
    pub(crate) fn begin(inner: Arc<DbInner>) -> Self {
        let id = inner.next_transaction_id();
        debug!(txn = id, "confdb.txn.begin");
        Self {
            inner,
            id,
            state: TransactionState::Open,
            writers: AHashMap::new(),
            changes: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    /// Changes logged so far, in order.
    pub fn changes(&self) -> impl Iterator<Item = &CommitChange> {
        self.changes.iter().map(|p| &p.change)
    }

    pub(crate) fn inner(&self) -> &Arc<DbInner> {
        &self.inner
    }

    /// Records an intended change. Nothing becomes visible before `commit`.
    pub fn log(&mut self, change: CommitChange) -> Result<()> {
        self.log_change(change, false)
    }

    /// Like `log`, but the change's `prev_rev` must still be the live
    /// revision when the transaction commits.
    pub(crate) fn log_change(&mut self, change: CommitChange, checked: bool) -> Result<()> {
        self.ensure_open()?;
        self.changes.push(PendingChange { change, checked });
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ConfDbError::InvalidArgument(format!(
                "transaction {} is {:?}",
                self.id, self.state
            )))
        }
    }

    /// Head manifest with this transaction's changes applied on top.
    pub(crate) fn manifest(&self) -> Result<Manifest> {
        let mut manifest = Manifest::clone(&self.inner.head());
        for pending in &self.changes {
            manifest.apply(&pending.change)?;
        }
        Ok(manifest)
    }

    /// Writer for `collection`, opened on first use and reused afterwards.
    pub(crate) fn writer(&mut self, collection: &CollectionEntry) -> Result<&mut RevLogWriter> {
        self.ensure_open()?;
        match self.writers.entry(collection.id) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let writer = self.inner.open_writer(collection.id)?;
                Ok(e.insert(writer))
            }
        }
    }

    /// Publishes every logged change as one new changeset.
    ///
    /// A transaction that logged nothing commits without writing and returns
    /// the current head. On failure the transaction is rolled back and the
    /// error comes back as `RolledBack` (or `RollbackFailed`).
    ///
    /// Unchecked updates and deletes are moved onto the live revision if
    /// another transaction replaced their base in the meantime, so the
    /// committed revision can be higher than the one `update_in` returned.
    pub fn commit(self, meta: &CommitMeta) -> Result<Changeset> {
        self.commit_changes(meta).map(|(changeset, _)| changeset)
    }

    /// Like `commit`, also returning the changes as they were published.
    pub(crate) fn commit_changes(mut self, meta: &CommitMeta) -> Result<(Changeset, Vec<CommitChange>)> {
        self.ensure_open()?;
        if self.changes.is_empty() {
            self.state = TransactionState::Committed;
            self.release()?;
            return Ok((self.inner.head().changeset(), Vec::new()));
        }

        let synced = self.writers.values().try_for_each(RevLogWriter::sync);
        if let Err(e) = synced {
            return Err(self.fail(e));
        }

        match self.inner.commit(&mut self.changes, &mut self.writers, meta) {
            Ok(changeset) => {
                self.state = TransactionState::Committed;
                debug!(txn = self.id, changeset, "confdb.txn.commit");
                let published = self.changes.drain(..).map(|p| p.change).collect();
                if let Err(e) = self.release() {
                    // Already durable; the writer only failed to close
                    warn!(txn = self.id, changeset, error = %e, "confdb.txn.release_failed");
                }
                Ok((changeset, published))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Discards the transaction. Entries already appended stay in the
    /// collection files, unreferenced.
    pub fn rollback(mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = TransactionState::RolledBack;
        debug!(txn = self.id, changes = self.changes.len(), "confdb.txn.rollback");
        self.release()
    }

    /// Rolls back after `cause` and reports both outcomes.
    pub(crate) fn fail(mut self, cause: ConfDbError) -> ConfDbError {
        self.state = TransactionState::RolledBack;
        debug!(txn = self.id, error = %cause, "confdb.txn.rollback");
        match self.release() {
            Ok(()) => ConfDbError::RolledBack(Box::new(cause)),
            Err(rollback) => {
                warn!(txn = self.id, error = %rollback, "confdb.txn.rollback_failed");
                ConfDbError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback: Box::new(rollback),
                }
            }
        }
    }

    /// Closes every writer, reporting the first failure.
    fn release(&mut self) -> Result<()> {
        self.changes.clear();
        let mut first_err = None;
        for (_, writer) in self.writers.drain() {
            if let Err(e) = writer.close() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_open() {
            warn!(
                txn = self.id,
                changes = self.changes.len(),
                "confdb.txn.dropped_open"
            );
            self.state = TransactionState::RolledBack;
            if let Err(e) = self.release() {
                warn!(txn = self.id, error = %e, "confdb.txn.rollback_failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfDbConfig;
    use crate::database::ConfigDatabase;
    use crate::txn::commit_log::CommitOp;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Flag {
        name: String,
        on: bool,
    }

    fn flag(name: &str, on: bool) -> Flag {
        Flag {
            name: name.into(),
            on,
        }
    }

    fn open_db(dir: &TempDir) -> ConfigDatabase {
        ConfigDatabase::create_with_config(dir.path().join("app"), ConfDbConfig::for_testing())
            .unwrap()
    }

    #[test]
    fn test_multi_collection_commit_is_one_changeset() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let flags = db.ensure_collection::<Flag>("flags").unwrap();
        let audit = db.ensure_collection::<Flag>("audit").unwrap();
        let before = db.head_changeset();

        let mut txn = db.begin_transaction();
        flags.add_in(&mut txn, flag("dark-mode", true)).unwrap();
        audit.add_in(&mut txn, flag("dark-mode", false)).unwrap();
        assert_eq!(txn.changes().count(), 2);
        assert_eq!(flags.count().unwrap(), 0);

        let changeset = txn.commit(&CommitMeta::new().committer("ops")).unwrap();
        assert_eq!(changeset, before + 1);
        assert_eq!(flags.count().unwrap(), 1);
        assert_eq!(audit.count().unwrap(), 1);

        let log = db.commit_log(changeset).unwrap().unwrap();
        assert_eq!(log.committer.as_deref(), Some("ops"));
        assert_eq!(log.changes.len(), 2);
        assert!(log.changes.iter().all(|c| c.op == CommitOp::CreateDoc));
    }

    #[test]
    fn test_rollback_leaves_head_untouched() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let flags = db.ensure_collection::<Flag>("flags").unwrap();
        let head = db.head_changeset();

        let mut txn = db.begin_transaction();
        flags.add_in(&mut txn, flag("beta", true)).unwrap();
        txn.rollback().unwrap();

        assert_eq!(db.head_changeset(), head);
        assert_eq!(flags.count().unwrap(), 0);

        // The orphaned entry does not disturb later writes
        let added = flags.add(flag("beta", false)).unwrap();
        assert_eq!(added.id, 2);
        let all: Vec<_> = flags.find_all().unwrap().documents().unwrap();
        assert_eq!(all, vec![flag("beta", false)]);
    }

    #[test]
    fn test_empty_commit_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let head = db.head_changeset();
        let commits = db.commit_count();

        let txn = db.begin_transaction();
        assert_eq!(txn.commit(&CommitMeta::default()).unwrap(), head);
        assert_eq!(db.commit_count(), commits);
    }

    #[test]
    fn test_dropped_transaction_is_rolled_back() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let flags = db.ensure_collection::<Flag>("flags").unwrap();
        {
            let mut txn = db.begin_transaction();
            flags.add_in(&mut txn, flag("ghost", true)).unwrap();
        }
        assert_eq!(flags.count().unwrap(), 0);
    }

    #[test]
    fn test_commit_rechecks_base_revision() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let flags = db.ensure_collection::<Flag>("flags").unwrap();
        let original = flags.add(flag("search", false)).unwrap();

        // Both transactions start from revision 1
        let mut first = db.begin_transaction();
        let mut second = db.begin_transaction();
        flags
            .update_in(&mut first, original.clone().with_document(flag("search", true)), true)
            .unwrap();
        flags
            .update_in(&mut second, original.with_document(flag("search", false)), true)
            .unwrap();

        first.commit(&CommitMeta::default()).unwrap();
        let err = second.commit(&CommitMeta::default()).unwrap_err();
        assert!(err.is_rolled_back());
        assert!(err.is_conflict());

        let current = flags.get(1).unwrap().unwrap();
        assert_eq!(current.revision, 2);
        assert_eq!(current.document, flag("search", true));
    }

    #[test]
    fn test_transaction_from_other_database_is_rejected() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let other = ConfigDatabase::create_with_config(
            dir.path().join("other"),
            ConfDbConfig::for_testing(),
        )
        .unwrap();
        let flags = db.ensure_collection::<Flag>("flags").unwrap();

        let mut txn = other.begin_transaction();
        let err = flags.add_in(&mut txn, flag("x", true)).unwrap_err();
        assert!(matches!(err, ConfDbError::InvalidArgument(_)));
        txn.rollback().unwrap();
    }
}
