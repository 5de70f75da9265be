//! Storage layer implementation
//!
//! Append-only files only: per-collection revlogs plus the framed record logs
//! behind the manifest store and the commit log.

pub mod checksum;
pub mod manifest;
pub mod record_log;
pub mod revlog;

pub use checksum::{Checksum, ChecksumError};
pub use manifest::{Manifest, ManifestRecord, ManifestStore};
pub use record_log::RecordLog;
pub use revlog::{Operation, RevLog, RevLogEntry, RevLogReader, RevLogWriter};
