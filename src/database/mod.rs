//! Database Module
//!
//! # Module Structure
//! - `core`: ConfigDatabase and create/open/rollback
//! - `collection`: typed document operations (count, find, add, update, remove)
//! - `iterator`: lazy snapshot iteration
//! - `service`: many databases under one root directory

pub mod collection;
pub mod core;
pub mod iterator;
pub mod service;

pub use self::core::{ConfigDatabase, DatabaseMeta, META_FILE};
pub use collection::Collection;
pub use iterator::ConfigIterator;
pub use service::ConfigService;
