//! Manifest file management and persistence
//!
//! `manifest.log` is a record log with one record per changeset:
//!
//! ```text
//! Edit { changeset, changes }   the changes committed by one transaction
//! Checkpoint(Manifest)          the full live set at that changeset
//! ```
//!
//! Appending the record is the commit point: a changeset exists once its
//! record is complete on disk. Historical manifests are rebuilt from the
//! nearest checkpoint at or before the requested changeset plus the edits
//! after it, and kept in a small LRU.

use super::version::Manifest;
use crate::config::{DurabilityLevel, ManifestFormat};
use crate::storage::record_log::RecordLog;
use crate::txn::commit_log::CommitChange;
use crate::types::Changeset;
use crate::{ConfDbError, Result};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub const MANIFEST_FILE: &str = "manifest.log";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ManifestRecord {
    Edit {
        changeset: Changeset,
        changes: Vec<CommitChange>,
    },
    Checkpoint(Manifest),
}

impl ManifestRecord {
    fn changeset(&self) -> Changeset {
        match self {
            ManifestRecord::Edit { changeset, .. } => *changeset,
            ManifestRecord::Checkpoint(m) => m.changeset(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RecordPos {
    changeset: Changeset,
    offset: u64,
    checkpoint: bool,
}

pub struct ManifestStore {
    log: RecordLog,
    format: ManifestFormat,
    /// Ascending by changeset
    positions: Vec<RecordPos>,
    cache: LruCache<Changeset, Arc<Manifest>>,
    checkpoint_interval: u64,
    durability: DurabilityLevel,
}

impl ManifestStore {
    /// Opens the store and replays it, returning the head manifest.
    pub fn open(
        dir: &Path,
        format: ManifestFormat,
        checkpoint_interval: u64,
        cache_size: usize,
        durability: DurabilityLevel,
    ) -> Result<(Self, Manifest)> {
        let mut head = Manifest::empty(format);
        let mut positions = Vec::new();

        let log = RecordLog::open(dir.join(MANIFEST_FILE), |offset, data| {
            let record: ManifestRecord = bincode::deserialize(data)?;
            let changeset = record.changeset();
            if changeset <= head.changeset() {
                return Err(ConfDbError::Corruption(format!(
                    "manifest changeset {} follows {}",
                    changeset,
                    head.changeset()
                )));
            }
            let checkpoint = matches!(record, ManifestRecord::Checkpoint(_));
            match record {
                ManifestRecord::Checkpoint(manifest) => head = manifest,
                ManifestRecord::Edit { changeset, changes } => {
                    for change in &changes {
                        head.apply(change)?;
                    }
                    head.set_changeset(changeset);
                }
            }
            positions.push(RecordPos {
                changeset,
                offset,
                checkpoint,
            });
            Ok(())
        })?;

        if head.format() != format {
            return Err(ConfDbError::Corruption(format!(
                "manifest log holds version {} manifests, expected version {}",
                head.version(),
                format.version()
            )));
        }
        debug!(
            changesets = positions.len(),
            head = head.changeset(),
            "confdb.manifest.open"
        );

        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Ok((
            Self {
                log,
                format,
                positions,
                cache: LruCache::new(cache_size),
                checkpoint_interval: checkpoint_interval.max(1),
                durability,
            },
            head,
        ))
    }

    /// Persists `manifest` as the new head. `changes` are what turned the
    /// previous head into it; `checkpoint` forces a full record.
    pub fn append(
        &mut self,
        manifest: &Manifest,
        changes: &[CommitChange],
        checkpoint: bool,
    ) -> Result<()> {
        let changeset = manifest.changeset();
        let checkpoint = checkpoint || changeset % self.checkpoint_interval == 0;
        let record = if checkpoint {
            ManifestRecord::Checkpoint(manifest.clone())
        } else {
            ManifestRecord::Edit {
                changeset,
                changes: changes.to_vec(),
            }
        };

        let data = bincode::serialize(&record)?;
        let offset = self.log.append(&data)?;
        if self.durability.syncs_on_commit() {
            if let Err(e) = self.log.sync() {
                self.log.truncate(offset)?;
                return Err(e);
            }
        }

        self.positions.push(RecordPos {
            changeset,
            offset,
            checkpoint,
        });
        debug!(changeset, checkpoint, bytes = data.len(), "confdb.manifest.append");
        Ok(())
    }

    /// Manifest as of `changeset`. Changeset 0 is the empty database.
    pub fn get(&mut self, changeset: Changeset) -> Result<Arc<Manifest>> {
        if changeset == 0 {
            return Ok(Arc::new(Manifest::empty(self.format)));
        }
        if let Some(cached) = self.cache.get(&changeset) {
            return Ok(cached.clone());
        }

        let target = self
            .positions
            .binary_search_by_key(&changeset, |p| p.changeset)
            .map_err(|_| ConfDbError::NotFound(format!("changeset {}", changeset)))?;
        let base = self.positions[..=target].iter().rposition(|p| p.checkpoint);

        let (mut manifest, replay_from) = match base {
            Some(i) => match self.read_record(self.positions[i].offset)? {
                ManifestRecord::Checkpoint(m) => (m, i + 1),
                ManifestRecord::Edit { .. } => {
                    return Err(ConfDbError::Corruption(format!(
                        "manifest record for changeset {} is not a checkpoint",
                        self.positions[i].changeset
                    )))
                }
            },
            None => (Manifest::empty(self.format), 0),
        };

        for i in replay_from..=target {
            let pos = self.positions[i];
            match self.read_record(pos.offset)? {
                ManifestRecord::Edit { changeset, changes } => {
                    for change in &changes {
                        manifest.apply(change)?;
                    }
                    manifest.set_changeset(changeset);
                }
                ManifestRecord::Checkpoint(m) => manifest = m,
            }
        }

        let manifest = Arc::new(manifest);
        self.cache.put(changeset, manifest.clone());
        Ok(manifest)
    }

    fn read_record(&mut self, offset: u64) -> Result<ManifestRecord> {
        let data = self.log.read_at(offset)?;
        Ok(bincode::deserialize(&data)?)
    }

    pub fn contains(&self, changeset: Changeset) -> bool {
        changeset == 0
            || self
                .positions
                .binary_search_by_key(&changeset, |p| p.changeset)
                .is_ok()
    }

    /// Changesets with a persisted record, oldest first.
    pub fn changesets(&self) -> impl Iterator<Item = Changeset> + '_ {
        self.positions.iter().map(|p| p.changeset)
    }
}
