//! Database Core - ConfigDatabase structure and lifecycle
//!
//! This module contains:
//! - `DbInner`, the state shared by database handles, collections and
//!   transactions
//! - create() / open() / open_or_create()
//! - collection management, commit publication and database rollback

use crate::codec::{Document, DocumentCodec};
use crate::config::{ConfDbConfig, ManifestFormat};
use crate::database::collection::Collection;
use crate::storage::manifest::{Manifest, ManifestStore};
use crate::storage::revlog::{revlog_paths, RevLog, RevLogReader, RevLogWriter};
use crate::txn::commit_log::{now_millis, CommitChange, CommitLog, CommitLogStore, CommitOp};
use crate::txn::transaction::{PendingChange, Transaction};
use crate::types::{Changeset, CommitMeta, Revision};
use crate::{ConfDbError, Result};
use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Metadata file at the root of every database directory
pub const META_FILE: &str = "confdb.json";

/// Settings fixed when the database was created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseMeta {
    pub name: String,
    pub manifest_format: ManifestFormat,
    pub codec: DocumentCodec,
    /// Unix time in milliseconds
    pub created_at: u64,
}

impl DatabaseMeta {
    fn load(path: &Path) -> Result<Self> {
        let file = path.join(META_FILE);
        let bytes = match fs::read(&file) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfDbError::NotFound(format!("database at {}", path.display())))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn store(&self, path: &Path) -> Result<()> {
        let tmp = path.join(format!("{}.tmp", META_FILE));
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path.join(META_FILE))?;
        Ok(())
    }
}

/// Database and collection names: letters, digits, `-`, `_` and `.`, not
/// starting with a dot.
pub(crate) fn validate_name(kind: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ConfDbError::InvalidArgument(format!(
            "invalid {} name '{}'",
            kind, name
        )))
    }
}

struct Stores {
    manifests: ManifestStore,
    commits: CommitLogStore,
}

pub(crate) struct DbInner {
    path: PathBuf,
    meta: DatabaseMeta,
    config: ConfDbConfig,
    head: RwLock<Arc<Manifest>>,
    /// Held for a whole commit; serializes commits and history reads
    stores: Mutex<Stores>,
    /// Collection id -> lock shared by every writer of that collection
    append_locks: Mutex<AHashMap<u64, Arc<Mutex<()>>>>,
    next_collection_id: AtomicU64,
    next_txn_id: AtomicU64,
}

impl DbInner {
    fn open(path: PathBuf, meta: DatabaseMeta, config: ConfDbConfig) -> Result<Self> {
        let (manifests, head) = ManifestStore::open(
            &path,
            meta.manifest_format,
            config.checkpoint_interval,
            config.manifest_cache_size,
            config.durability,
        )?;
        let commits = CommitLogStore::open(&path, head.changeset(), config.durability)?;

        // Ids of collections created by transactions that never committed are
        // not in any manifest, but their files exist.
        let next_collection_id = head
            .next_collection_id()
            .max(highest_collection_file(&path)? + 1);

        info!(
            path = %path.display(),
            changeset = head.changeset(),
            version = head.version(),
            collections = head.collection_names().len(),
            "confdb.open"
        );

        Ok(Self {
            path,
            meta,
            config,
            head: RwLock::new(Arc::new(head)),
            stores: Mutex::new(Stores { manifests, commits }),
            append_locks: Mutex::new(AHashMap::new()),
            next_collection_id: AtomicU64::new(next_collection_id),
            next_txn_id: AtomicU64::new(1),
        })
    }

    pub(crate) fn head(&self) -> Arc<Manifest> {
        self.head.read().clone()
    }

    pub(crate) fn codec(&self) -> DocumentCodec {
        self.meta.codec
    }

    /// Manifest at `changeset`, or the head for `None`.
    pub(crate) fn manifest_at(&self, changeset: Option<Changeset>) -> Result<Arc<Manifest>> {
        let head = self.head();
        match changeset {
            None => Ok(head),
            Some(cs) if cs == head.changeset() => Ok(head),
            Some(cs) if cs > head.changeset() => {
                Err(ConfDbError::NotFound(format!("changeset {}", cs)))
            }
            Some(cs) => self.stores.lock().manifests.get(cs),
        }
    }

    pub(crate) fn next_transaction_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }

    fn allocate_collection_id(&self) -> u64 {
        self.next_collection_id.fetch_add(1, Ordering::SeqCst)
    }

    fn append_lock(&self, collection_id: u64) -> Arc<Mutex<()>> {
        self.append_locks
            .lock()
            .entry(collection_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub(crate) fn open_writer(&self, collection_id: u64) -> Result<RevLogWriter> {
        let (log, dat) = revlog_paths(&self.path, collection_id);
        RevLogWriter::open(
            &log,
            &dat,
            self.config.durability,
            self.config.compress_documents,
            self.append_lock(collection_id),
        )
    }

    /// `None` when the collection has never been written.
    pub(crate) fn open_reader(&self, collection_id: u64) -> Result<Option<RevLogReader>> {
        let (log, dat) = revlog_paths(&self.path, collection_id);
        RevLogReader::open(&log, &dat)
    }

    /// Builds the next manifest from the head plus `pending` and publishes it.
    ///
    /// Unchecked updates and deletes whose base was replaced by a commit made
    /// after they were written are rebased: a new entry on top of the live
    /// revision is appended through `writers`, and the change is rewritten to
    /// point at it.
    pub(crate) fn commit(
        &self,
        pending: &mut [PendingChange],
        writers: &mut AHashMap<u64, RevLogWriter>,
        meta: &CommitMeta,
    ) -> Result<Changeset> {
        let mut stores = self.stores.lock();
        let head = self.head();

        let mut next = Manifest::clone(&head);
        for p in pending.iter_mut() {
            if p.checked {
                check_base_revision(&next, &p.change)?;
            } else if let Some(live) = stale_base(&next, &p.change) {
                self.rebase(&mut p.change, live, writers)?;
            }
            next.apply(&p.change)?;
        }
        let changeset = head.changeset() + 1;
        next.set_changeset(changeset);

        let mut log = CommitLog::new(changeset, pending.iter().map(|p| p.change.clone()).collect());
        log.committer = meta.committer.clone();
        log.message = meta.message.clone();
        self.publish(&mut stores, next, log, false)
    }

    /// Rewrites `change` as a revision on top of `live`.
    fn rebase(
        &self,
        change: &mut CommitChange,
        live: Revision,
        writers: &mut AHashMap<u64, RevLogWriter>,
    ) -> Result<()> {
        let written = self
            .open_reader(change.collection_id)?
            .ok_or_else(|| ConfDbError::NotFound(format!("revlog of collection '{}'", change.collection)))?
            .read(change.index)?;
        if written.doc_id != change.doc_id || written.rev != change.rev {
            return Err(ConfDbError::Corruption(format!(
                "revlog entry {} of '{}' is not document {} revision {}",
                change.index, change.collection, change.doc_id, change.rev
            )));
        }

        let writer = match writers.entry(change.collection_id) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(self.open_writer(change.collection_id)?),
        };
        let mut record = RevLog::new(change.doc_id, live, written.operation, written.doc);
        let index = writer.write(&mut record)?;
        writer.sync()?;

        debug!(
            collection = %change.collection,
            doc_id = change.doc_id,
            from_rev = change.rev,
            rev = record.rev,
            "confdb.commit.rebase"
        );
        change.rev = record.rev;
        change.prev_rev = record.prev_rev;
        change.index = index;
        Ok(())
    }

    /// New changeset whose live set equals the one at `target`.
    fn restore(&self, target: Changeset, meta: &CommitMeta) -> Result<Changeset> {
        let mut stores = self.stores.lock();
        let head = self.head();
        if target > head.changeset() || !stores.manifests.contains(target) {
            return Err(ConfDbError::NotFound(format!("changeset {}", target)));
        }

        let mut next = Manifest::clone(&*stores.manifests.get(target)?);
        let changeset = head.changeset() + 1;
        next.set_changeset(changeset);
        next.raise_next_collection_id(head.next_collection_id());

        let mut log = CommitLog::new(changeset, Vec::new());
        log.committer = meta.committer.clone();
        log.message = Some(
            meta.message
                .clone()
                .unwrap_or_else(|| format!("rollback to changeset {}", target)),
        );
        log.rollback_to = Some(target);
        self.publish(&mut stores, next, log, true)
    }

    /// Commit point: commit log, then manifest, then the in-memory head.
    fn publish(
        &self,
        stores: &mut Stores,
        next: Manifest,
        log: CommitLog,
        checkpoint: bool,
    ) -> Result<Changeset> {
        let changeset = next.changeset();
        let mark = stores.commits.append(&log)?;
        if let Err(e) = stores.manifests.append(&next, &log.changes, checkpoint) {
            if let Err(discard) = stores.commits.discard(mark) {
                warn!(changeset, error = %discard, "confdb.commit_log.discard_failed");
            }
            return Err(e);
        }

        *self.head.write() = Arc::new(next);
        info!(
            changeset,
            changes = log.changes.len(),
            committer = log.committer.as_deref().unwrap_or(""),
            rollback_to = log.rollback_to,
            "confdb.commit"
        );
        Ok(changeset)
    }
}

/// A checked update or delete must still replace the live revision.
fn check_base_revision(manifest: &Manifest, change: &CommitChange) -> Result<()> {
    if !matches!(change.op, CommitOp::UpdateDoc | CommitOp::DeleteDoc) {
        return Ok(());
    }
    match manifest.live_rev(&change.collection, change.doc_id) {
        Some(live) if live == change.prev_rev => Ok(()),
        Some(live) => Err(ConfDbError::Conflict {
            collection: change.collection.clone(),
            doc_id: change.doc_id,
            revision: live,
        }),
        None => Err(ConfDbError::NotFound(format!(
            "document {} in collection '{}'",
            change.doc_id, change.collection
        ))),
    }
}

/// Live revision an unchecked update or delete has to be moved onto, if its
/// own base is no longer live.
fn stale_base(manifest: &Manifest, change: &CommitChange) -> Option<Revision> {
    if !matches!(change.op, CommitOp::UpdateDoc | CommitOp::DeleteDoc) {
        return None;
    }
    manifest
        .live_rev(&change.collection, change.doc_id)
        .filter(|&live| live != change.prev_rev)
}

/// Highest N among `col{N}.log` files in `dir`, 0 if none.
fn highest_collection_file(dir: &Path) -> Result<u64> {
    let mut highest = 0;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let id = name
            .to_str()
            .and_then(|n| n.strip_prefix("col"))
            .and_then(|n| n.strip_suffix(".log"))
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(id) = id {
            highest = highest.max(id);
        }
    }
    Ok(highest)
}

/// Handle to one configuration database. Cheap to clone; all clones share
/// the same state.
#[derive(Clone)]
pub struct ConfigDatabase {
    inner: Arc<DbInner>,
}

impl ConfigDatabase {
    /// Create a new database
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with_config(path, ConfDbConfig::default())
    }

    /// Create a new database with custom configuration
    pub fn create_with_config<P: AsRef<Path>>(path: P, config: ConfDbConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.join(META_FILE).exists() {
            return Err(ConfDbError::InvalidArgument(format!(
                "database already exists at {}",
                path.display()
            )));
        }
        let name = database_name(&path)?;
        fs::create_dir_all(&path)?;

        let meta = DatabaseMeta {
            name,
            manifest_format: config.manifest_format,
            codec: config.codec,
            created_at: now_millis(),
        };
        meta.store(&path)?;
        debug!(
            path = %path.display(),
            version = meta.manifest_format.version(),
            codec = meta.codec.name(),
            "confdb.create"
        );

        Self::from_parts(path, meta, config)
    }

    /// Open an existing database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, ConfDbConfig::default())
    }

    /// Open an existing database. Format and codec come from its metadata;
    /// the rest of `config` applies to this session.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: ConfDbConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let meta = DatabaseMeta::load(&path)?;
        Self::from_parts(path, meta, config)
    }

    pub fn open_or_create<P: AsRef<Path>>(path: P, config: ConfDbConfig) -> Result<Self> {
        if path.as_ref().join(META_FILE).exists() {
            Self::open_with_config(path, config)
        } else {
            Self::create_with_config(path, config)
        }
    }

    fn from_parts(path: PathBuf, meta: DatabaseMeta, config: ConfDbConfig) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(DbInner::open(path, meta, config)?),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.meta.name
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn meta(&self) -> &DatabaseMeta {
        &self.inner.meta
    }

    /// Manifest version: 1 (scan) or 2 (indexed).
    pub fn format_version(&self) -> u8 {
        self.inner.meta.manifest_format.version()
    }

    pub fn codec(&self) -> DocumentCodec {
        self.inner.codec()
    }

    pub fn head_changeset(&self) -> Changeset {
        self.inner.head().changeset()
    }

    /// Manifest at `changeset`, or the current head.
    pub fn manifest(&self, changeset: Option<Changeset>) -> Result<Arc<Manifest>> {
        self.inner.manifest_at(changeset)
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.inner.head().collection_names()
    }

    /// Handle to `name` at the head, `None` if there is no such collection.
    pub fn collection<T: Document>(&self, name: &str) -> Option<Collection<T>> {
        let entry = self.inner.head().collection(name)?.clone();
        Some(Collection::new(self.inner.clone(), entry, None))
    }

    /// Read-only handle to `name` as it was at `changeset`.
    pub fn collection_at<T: Document>(
        &self,
        name: &str,
        changeset: Changeset,
    ) -> Result<Option<Collection<T>>> {
        let manifest = self.inner.manifest_at(Some(changeset))?;
        Ok(manifest
            .collection(name)
            .cloned()
            .map(|entry| Collection::new(self.inner.clone(), entry, Some(changeset))))
    }

    /// Returns the collection, creating it in its own changeset if needed.
    pub fn ensure_collection<T: Document>(&self, name: &str) -> Result<Collection<T>> {
        if let Some(collection) = self.collection(name) {
            return Ok(collection);
        }
        validate_name("collection", name)?;

        let id = self.inner.allocate_collection_id();
        let mut txn = self.begin_transaction();
        txn.log(CommitChange::create_collection(name, id))?;
        let meta = CommitMeta::new().message(format!("create collection {}", name));
        match txn.commit(&meta) {
            Ok(_) => {}
            // Lost a race with another creator
            Err(e) => match self.collection(name) {
                Some(collection) => return Ok(collection),
                None => return Err(e),
            },
        }
        debug!(collection = name, id, "confdb.collection.create");
        self.collection(name)
            .ok_or_else(|| ConfDbError::NotFound(format!("collection '{}'", name)))
    }

    /// Removes `name` from the head. Its history stays readable through
    /// older changesets. Returns false if there was no such collection.
    pub fn drop_collection(&self, name: &str) -> Result<bool> {
        let entry = match self.inner.head().collection(name) {
            Some(entry) => entry.clone(),
            None => return Ok(false),
        };
        let mut txn = self.begin_transaction();
        txn.log(CommitChange::drop_collection(&entry.name, entry.id))?;
        txn.commit(&CommitMeta::new().message(format!("drop collection {}", name)))?;
        debug!(collection = name, id = entry.id, "confdb.collection.drop");
        Ok(true)
    }

    pub fn begin_transaction(&self) -> Transaction {
        Transaction::begin(self.inner.clone())
    }

    /// Commit log entries, newest first.
    pub fn commit_logs(&self, offset: usize, limit: usize) -> Result<Vec<CommitLog>> {
        self.inner.stores.lock().commits.list(offset, limit)
    }

    pub fn commit_log(&self, changeset: Changeset) -> Result<Option<CommitLog>> {
        self.inner.stores.lock().commits.get(changeset)
    }

    pub fn commit_count(&self) -> usize {
        self.inner.stores.lock().commits.count()
    }

    /// Makes the state at `changeset` current again, as a new changeset.
    /// Nothing is erased; the changesets in between stay in the history.
    pub fn rollback(&self, changeset: Changeset, meta: &CommitMeta) -> Result<Changeset> {
        self.inner.restore(changeset, meta)
    }
}

fn database_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ConfDbError::InvalidArgument(format!("no database name in {}", path.display()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Route {
        path: String,
        upstream: String,
    }

    fn route(path: &str, upstream: &str) -> Route {
        Route {
            path: path.into(),
            upstream: upstream.into(),
        }
    }

    fn config() -> ConfDbConfig {
        ConfDbConfig::for_testing()
    }

    #[test]
    fn test_create_then_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gateway");
        {
            let db = ConfigDatabase::create_with_config(&path, config().with_codec(DocumentCodec::Bincode))
                .unwrap();
            assert_eq!(db.name(), "gateway");
            assert_eq!(db.head_changeset(), 0);
            assert!(ConfigDatabase::create_with_config(&path, config()).is_err());
        }

        // Codec and format come from metadata, not from the new config
        let db = ConfigDatabase::open_with_config(&path, config().with_manifest_format(ManifestFormat::Scan)).unwrap();
        assert_eq!(db.codec(), DocumentCodec::Bincode);
        assert_eq!(db.format_version(), 2);
        assert!(matches!(
            ConfigDatabase::open(dir.path().join("missing")),
            Err(e) if e.is_not_found()
        ));
    }

    #[test]
    fn test_reopen_preserves_documents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gateway");
        let head = {
            let db = ConfigDatabase::create_with_config(&path, config()).unwrap();
            let routes = db.ensure_collection::<Route>("routes").unwrap();
            let a = routes.add(route("/api", "backend:80")).unwrap();
            routes.add(route("/static", "cdn:80")).unwrap();
            routes
                .update(a.with_document(route("/api", "backend:8080")), true)
                .unwrap();
            db.head_changeset()
        };

        let db = ConfigDatabase::open_with_config(&path, config()).unwrap();
        assert_eq!(db.head_changeset(), head);
        let routes = db.collection::<Route>("routes").unwrap();
        assert_eq!(routes.count().unwrap(), 2);
        let api = routes.get(1).unwrap().unwrap();
        assert_eq!(api.revision, 2);
        assert_eq!(api.document.upstream, "backend:8080");
        assert_eq!(db.commit_count() as u64, head);
    }

    #[test]
    fn test_collections_lifecycle() {
        let dir = TempDir::new().unwrap();
        let db = ConfigDatabase::create_with_config(dir.path().join("db"), config()).unwrap();
        assert!(db.collection::<Route>("routes").is_none());

        let routes = db.ensure_collection::<Route>("routes").unwrap();
        let again = db.ensure_collection::<Route>("routes").unwrap();
        assert_eq!(routes.id(), again.id());
        routes.add(route("/", "web:80")).unwrap();
        let before_drop = db.head_changeset();

        assert!(db.drop_collection("routes").unwrap());
        assert!(!db.drop_collection("routes").unwrap());
        assert!(db.collection_names().is_empty());
        // Stale handles see nothing and cannot write
        assert_eq!(routes.count().unwrap(), 0);
        assert!(routes.add(route("/x", "y")).unwrap_err().is_not_found());

        let recreated = db.ensure_collection::<Route>("routes").unwrap();
        assert_ne!(recreated.id(), routes.id());
        assert_eq!(recreated.count().unwrap(), 0);

        let old = db.collection_at::<Route>("routes", before_drop).unwrap().unwrap();
        assert_eq!(old.count().unwrap(), 1);
        assert!(db.ensure_collection::<Route>("bad/name").is_err());
    }

    #[test]
    fn test_rollback_restores_state() {
        let dir = TempDir::new().unwrap();
        let db = ConfigDatabase::create_with_config(dir.path().join("db"), config()).unwrap();
        let routes = db.ensure_collection::<Route>("routes").unwrap();
        let a = routes.add(route("/a", "one")).unwrap();
        let target = db.head_changeset();

        routes.add(route("/b", "two")).unwrap();
        routes.remove(a, true).unwrap();
        assert_eq!(routes.count().unwrap(), 1);

        let first = db.rollback(target, &CommitMeta::new().committer("ops")).unwrap();
        assert_eq!(first, target + 3);
        let docs: Vec<Route> = routes.find_all().unwrap().documents().unwrap();
        assert_eq!(docs, vec![route("/a", "one")]);

        let log = db.commit_log(first).unwrap().unwrap();
        assert_eq!(log.rollback_to, Some(target));
        assert_eq!(log.message.as_deref(), Some(&*format!("rollback to changeset {}", target)));

        // Rolling back to the same changeset again gives the same live set
        routes.add(route("/c", "three")).unwrap();
        db.rollback(target, &CommitMeta::default()).unwrap();
        let again = db.manifest(None).unwrap();
        let restored = db.manifest(Some(first)).unwrap();
        assert_eq!(
            again.get_config_entries("routes"),
            restored.get_config_entries("routes")
        );

        assert!(db.rollback(999, &CommitMeta::default()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_rollback_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        let cfg = config().with_checkpoint_interval(2);
        {
            let db = ConfigDatabase::create_with_config(&path, cfg.clone()).unwrap();
            let routes = db.ensure_collection::<Route>("routes").unwrap();
            routes.add(route("/a", "one")).unwrap();
            routes.add(route("/b", "two")).unwrap();
            routes.add(route("/c", "three")).unwrap();
            db.rollback(2, &CommitMeta::default()).unwrap();
        }
        let db = ConfigDatabase::open_with_config(&path, cfg).unwrap();
        assert_eq!(db.head_changeset(), 5);
        let routes = db.collection::<Route>("routes").unwrap();
        assert_eq!(routes.count().unwrap(), 1);
        assert_eq!(db.manifest(Some(4)).unwrap().count("routes"), 3);
    }

    #[test]
    fn test_commit_logs_paging() {
        let dir = TempDir::new().unwrap();
        let db = ConfigDatabase::create_with_config(dir.path().join("db"), config()).unwrap();
        let routes = db.ensure_collection::<Route>("routes").unwrap();
        for i in 0..4 {
            routes
                .add_with(
                    route(&format!("/{}", i), "up"),
                    &CommitMeta::new().committer("ci").message(format!("route {}", i)),
                )
                .unwrap();
        }
        let page = db.commit_logs(0, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].changeset, 5);
        assert_eq!(page[0].message.as_deref(), Some("route 3"));
        assert_eq!(page[1].changeset, 4);
        let last = db.commit_logs(4, 10).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].changes[0].op, CommitOp::CreateCollection);
    }

    #[test]
    fn test_uncommitted_collection_ids_not_reused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let db = ConfigDatabase::create_with_config(&path, config()).unwrap();
            // A writer for collection 7 that never commits
            let writer = db.inner.open_writer(7).unwrap();
            writer.close().unwrap();
        }
        let db = ConfigDatabase::open_with_config(&path, config()).unwrap();
        let routes = db.ensure_collection::<Route>("routes").unwrap();
        assert_eq!(routes.id(), 8);
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("collection", "routes-v2_x.y").is_ok());
        assert!(validate_name("collection", "").is_err());
        assert!(validate_name("collection", ".hidden").is_err());
        assert!(validate_name("collection", "a b").is_err());
    }
}
