//! Manifest: which revisions are live at each changeset
//!
//! ## Responsibilities
//! 1. **Atomic commit**: a changeset becomes visible by appending one record
//! 2. **History**: every changeset's live set can be rebuilt
//! 3. **Crash recovery**: only complete records are loaded

mod manifest;
mod version;

pub use manifest::{ManifestRecord, ManifestStore, MANIFEST_FILE};
pub use version::{CollectionState, DocRef, IndexedRef, LiveRef, Manifest, ManifestBody};
