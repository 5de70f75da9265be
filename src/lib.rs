//! confdb: embedded configuration document store
//!
//! Documents live in named collections inside a database directory. Every
//! write appends a revision to the collection's revlog; a transaction's
//! revisions become visible together when its commit publishes a new
//! manifest under the next changeset number.
//!
//! ## Architecture
//! - Storage: per-collection revlogs (`col{id}.log` + `col{id}.dat`), the
//!   manifest store and the commit log, all append-only
//! - Transactions: buffered writers, optimistic revision checks, one
//!   changeset per commit
//! - Database: collections, historical views, rollback to any changeset
//!
//! ```no_run
//! use confdb::{ConfDbConfig, ConfigDatabase};
//! use serde_json::json;
//!
//! # fn main() -> confdb::Result<()> {
//! let db = ConfigDatabase::open_or_create("./data/app", ConfDbConfig::default())?;
//! let settings = db.ensure_collection::<serde_json::Value>("settings")?;
//! let theme = settings.add(json!({"key": "theme", "value": "dark"}))?;
//! settings.update(theme.with_document(json!({"key": "theme", "value": "light"})), true)?;
//! assert_eq!(settings.count()?, 1);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod database;
pub mod storage;
pub mod txn;
pub mod types;

mod error;

pub use codec::{Document, DocumentCodec};
pub use config::{ConfDbConfig, DurabilityLevel, ManifestFormat};
pub use database::{Collection, ConfigDatabase, ConfigIterator, ConfigService, DatabaseMeta};
pub use error::{ConfDbError, Result};
pub use txn::{CommitChange, CommitLog, CommitOp, Transaction};
pub use types::{Changeset, CollectionEntry, CommitMeta, Config, ConfigEntry, DocId, Predicate, Revision};
