//! Database configuration and durability levels
//!
//! Provides flexible configuration options for balancing performance and safety.

use crate::codec::DocumentCodec;
use serde::{Deserialize, Serialize};

/// Durability level
///
/// Trades write latency against crash safety:
/// - Synchronous: fsync after every revlog append
/// - OnCommit: fsync once per committed transaction
/// - NoSync: leave flushing to the OS, tests only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DurabilityLevel {
    /// Every appended record is fsynced before `write` returns.
    Synchronous,

    /// Revlog files, the commit log and the manifest are fsynced when a
    /// transaction commits. A crash between appends and commit leaves only
    /// unreferenced bytes behind.
    #[default]
    OnCommit,

    /// Nothing is fsynced. Data may be lost on power failure.
    NoSync,
}

impl DurabilityLevel {
    pub fn syncs_every_append(&self) -> bool {
        matches!(self, Self::Synchronous)
    }

    pub fn syncs_on_commit(&self) -> bool {
        !matches!(self, Self::NoSync)
    }
}

/// Physical encoding of the live set stored in each manifest.
///
/// `Scan` records only (doc id, revision) pairs, so building a snapshot replays
/// the whole revlog. `Indexed` stores the revlog position of every live entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ManifestFormat {
    Scan,
    #[default]
    Indexed,
}

impl ManifestFormat {
    /// Format version number as exposed by `Manifest::version`.
    pub fn version(&self) -> u8 {
        match self {
            Self::Scan => 1,
            Self::Indexed => 2,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfDbConfig {
    pub durability: DurabilityLevel,

    /// Used only when a database is created; existing databases keep the
    /// format recorded in their metadata.
    pub manifest_format: ManifestFormat,

    /// Used only when a database is created, like `manifest_format`.
    pub codec: DocumentCodec,

    /// Every N-th changeset is persisted as a full manifest instead of an edit.
    pub checkpoint_interval: u64,

    /// Number of reconstructed historical manifests kept in memory.
    pub manifest_cache_size: usize,

    /// Snappy-compress document payloads in the data file.
    pub compress_documents: bool,
}

impl Default for ConfDbConfig {
    fn default() -> Self {
        Self {
            durability: DurabilityLevel::default(),
            manifest_format: ManifestFormat::default(),
            codec: DocumentCodec::default(),
            checkpoint_interval: 64,
            manifest_cache_size: 32,
            compress_documents: false,
        }
    }
}

impl ConfDbConfig {
    /// fsync on every append
    pub fn for_durable() -> Self {
        Self {
            durability: DurabilityLevel::Synchronous,
            ..Default::default()
        }
    }

    /// Fastest settings, never fsyncs
    pub fn for_testing() -> Self {
        Self {
            durability: DurabilityLevel::NoSync,
            ..Default::default()
        }
    }

    /// Scan-based (version 1) manifests
    pub fn legacy_scan() -> Self {
        Self {
            manifest_format: ManifestFormat::Scan,
            ..Default::default()
        }
    }

    pub fn with_durability(mut self, durability: DurabilityLevel) -> Self {
        self.durability = durability;
        self
    }

    pub fn with_manifest_format(mut self, format: ManifestFormat) -> Self {
        self.manifest_format = format;
        self
    }

    pub fn with_codec(mut self, codec: DocumentCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval.max(1);
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress_documents = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durability_levels() {
        let sync = DurabilityLevel::Synchronous;
        assert!(sync.syncs_every_append());
        assert!(sync.syncs_on_commit());

        let commit = DurabilityLevel::default();
        assert_eq!(commit, DurabilityLevel::OnCommit);
        assert!(!commit.syncs_every_append());

        assert!(!DurabilityLevel::NoSync.syncs_on_commit());
    }

    #[test]
    fn test_config_presets() {
        assert!(ConfDbConfig::for_durable().durability.syncs_every_append());
        assert_eq!(ConfDbConfig::for_testing().durability, DurabilityLevel::NoSync);
        assert_eq!(ConfDbConfig::legacy_scan().manifest_format.version(), 1);
        assert_eq!(ConfDbConfig::default().manifest_format.version(), 2);
        assert_eq!(
            ConfDbConfig::default().with_checkpoint_interval(0).checkpoint_interval,
            1
        );
    }
}
