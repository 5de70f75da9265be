//! Commit log
//!
//! One record per changeset in `commit.log`: who committed, why, when, and
//! the exact list of changes. The manifest record written right after it is
//! what makes the changeset visible; a commit-log record without a matching
//! manifest record is ignored on open and overwritten by the next commit.

use crate::config::DurabilityLevel;
use crate::storage::record_log::RecordLog;
use crate::types::{Changeset, DocId, Revision};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

pub const COMMIT_LOG_FILE: &str = "commit.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitOp {
    CreateDoc,
    UpdateDoc,
    DeleteDoc,
    CreateCollection,
    DropCollection,
}

impl fmt::Display for CommitOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommitOp::CreateDoc => "create",
            CommitOp::UpdateDoc => "update",
            CommitOp::DeleteDoc => "delete",
            CommitOp::CreateCollection => "create-collection",
            CommitOp::DropCollection => "drop-collection",
        };
        f.write_str(s)
    }
}

/// One change inside a changeset.
///
/// Document changes carry the revision they produced, the revision they
/// replaced (`prev_rev`, 0 for a create) and the revlog `index` of the entry
/// that stores it. Collection changes only use `collection` and
/// `collection_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitChange {
    pub op: CommitOp,
    pub collection: String,
    pub collection_id: u64,
    pub doc_id: DocId,
    pub rev: Revision,
    pub prev_rev: Revision,
    pub index: u64,
}

impl CommitChange {
    pub fn create_collection(name: &str, collection_id: u64) -> Self {
        Self::collection_op(CommitOp::CreateCollection, name, collection_id)
    }

    pub fn drop_collection(name: &str, collection_id: u64) -> Self {
        Self::collection_op(CommitOp::DropCollection, name, collection_id)
    }

    fn collection_op(op: CommitOp, name: &str, collection_id: u64) -> Self {
        Self {
            op,
            collection: name.to_string(),
            collection_id,
            doc_id: 0,
            rev: 0,
            prev_rev: 0,
            index: 0,
        }
    }

    pub fn is_document_change(&self) -> bool {
        matches!(
            self.op,
            CommitOp::CreateDoc | CommitOp::UpdateDoc | CommitOp::DeleteDoc
        )
    }
}

impl fmt::Display for CommitChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_document_change() {
            write!(
                f,
                "{} {}/{} rev {} (prev {})",
                self.op, self.collection, self.doc_id, self.rev, self.prev_rev
            )
        } else {
            write!(f, "{} {}", self.op, self.collection)
        }
    }
}

/// Metadata and changes of one committed changeset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitLog {
    pub changeset: Changeset,
    pub committer: Option<String>,
    pub message: Option<String>,
    /// Unix time in milliseconds
    pub created: u64,
    /// Set when this changeset restored an earlier one
    pub rollback_to: Option<Changeset>,
    pub changes: Vec<CommitChange>,
}

impl CommitLog {
    pub fn new(changeset: Changeset, changes: Vec<CommitChange>) -> Self {
        Self {
            changeset,
            committer: None,
            message: None,
            created: now_millis(),
            rollback_to: None,
            changes,
        }
    }
}

impl fmt::Display for CommitLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "changeset {} by {} at {}",
            self.changeset,
            self.committer.as_deref().unwrap_or("<unknown>"),
            self.created
        )?;
        if let Some(target) = self.rollback_to {
            write!(f, " (rollback to {})", target)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct CommitLogStore {
    log: RecordLog,
    offsets: BTreeMap<Changeset, u64>,
    durability: DurabilityLevel,
}

impl CommitLogStore {
    /// Opens `commit.log`, keeping only records for changesets up to `head`.
    pub fn open(dir: &Path, head: Changeset, durability: DurabilityLevel) -> Result<Self> {
        let mut offsets = BTreeMap::new();
        let mut orphans = 0usize;
        let log = RecordLog::open(dir.join(COMMIT_LOG_FILE), |offset, data| {
            let entry: CommitLog = bincode::deserialize(data)?;
            if entry.changeset > head {
                orphans += 1;
            } else {
                offsets.insert(entry.changeset, offset);
            }
            Ok(())
        })?;
        debug!(entries = offsets.len(), orphans, "confdb.commit_log.open");

        Ok(Self {
            log,
            offsets,
            durability,
        })
    }

    /// Appends `entry` and returns a mark that `discard` can roll back to.
    pub fn append(&mut self, entry: &CommitLog) -> Result<u64> {
        let data = bincode::serialize(entry)?;
        let mark = self.log.append(&data)?;
        if self.durability.syncs_on_commit() {
            if let Err(e) = self.log.sync() {
                self.log.truncate(mark)?;
                return Err(e);
            }
        }
        self.offsets.insert(entry.changeset, mark);
        Ok(mark)
    }

    /// Drops everything appended since `mark`.
    pub fn discard(&mut self, mark: u64) -> Result<()> {
        self.offsets.retain(|_, offset| *offset < mark);
        self.log.truncate(mark)
    }

    pub fn get(&mut self, changeset: Changeset) -> Result<Option<CommitLog>> {
        match self.offsets.get(&changeset).copied() {
            Some(offset) => Ok(Some(self.read(offset)?)),
            None => Ok(None),
        }
    }

    /// Newest first, skipping `offset` entries.
    pub fn list(&mut self, offset: usize, limit: usize) -> Result<Vec<CommitLog>> {
        let positions: Vec<u64> = self
            .offsets
            .values()
            .rev()
            .skip(offset)
            .take(limit)
            .copied()
            .collect();
        positions.into_iter().map(|pos| self.read(pos)).collect()
    }

    fn read(&mut self, offset: u64) -> Result<CommitLog> {
        let data = self.log.read_at(offset)?;
        Ok(bincode::deserialize(&data)?)
    }

    pub fn count(&self) -> usize {
        self.offsets.len()
    }
}
