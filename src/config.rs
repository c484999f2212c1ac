//! Configuration types for the coordination core.

use crate::types::NodeId;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for one node's coordination core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Unique identifier for this node.
    pub node_id: NodeId,

    /// Location lookup cache configuration.
    pub lookup: LookupConfig,

    /// Migration configuration.
    pub migration: MigrationConfig,

    /// Backup log configuration.
    pub backup: BackupConfig,
}

impl CoreConfig {
    /// Create a new configuration for the given node.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            lookup: LookupConfig::default(),
            migration: MigrationConfig::default(),
            backup: BackupConfig::default(),
        }
    }

    /// Set the lookup cache configuration.
    pub fn with_lookup_config(mut self, lookup: LookupConfig) -> Self {
        self.lookup = lookup;
        self
    }

    /// Set the migration configuration.
    pub fn with_migration_config(mut self, migration: MigrationConfig) -> Self {
        self.migration = migration;
        self
    }

    /// Set the backup configuration.
    pub fn with_backup_config(mut self, backup: BackupConfig) -> Self {
        self.backup = backup;
        self
    }
}

/// Configuration for the location lookup cache.
#[derive(Debug, Clone)]
pub struct LookupConfig {
    /// Maximum number of cached chunk locations.
    pub cache_entries: u64,

    /// Time-to-live for cached locations. `None` disables expiry.
    pub cache_ttl: Option<Duration>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            cache_entries: 10_000,
            cache_ttl: Some(Duration::from_secs(3600)),
        }
    }
}

impl LookupConfig {
    /// Set the maximum number of cached entries.
    pub fn with_cache_entries(mut self, entries: u64) -> Self {
        self.cache_entries = entries;
        self
    }

    /// Set the cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Disable cache expiry.
    pub fn without_cache_ttl(mut self) -> Self {
        self.cache_ttl = None;
        self
    }
}

/// Configuration for the migration coordinator.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Maximum payload bytes batched into one outbound transfer message.
    pub max_batch_bytes: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            max_batch_bytes: 8 * 1024 * 1024, // 8 MiB
        }
    }
}

impl MigrationConfig {
    /// Set the outbound batch size limit.
    pub fn with_max_batch_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_bytes = bytes;
        self
    }
}

/// Configuration for the backup log layer.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Whether backup replication is active on this node.
    pub active: bool,

    /// Directory holding durable log segments.
    pub segment_dir: PathBuf,

    /// Buffered bytes per segment before a flush is forced.
    pub buffer_flush_threshold: usize,

    /// Fixed capacity of the per-node version table.
    ///
    /// The table never rehashes; size it with a safety margin above the
    /// expected number of distinct chunks.
    pub version_table_capacity: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            active: false,
            segment_dir: PathBuf::from("./backup"),
            buffer_flush_threshold: 128 * 1024,
            version_table_capacity: 1_000_000,
        }
    }
}

impl BackupConfig {
    /// Enable backup replication.
    pub fn enabled(mut self) -> Self {
        self.active = true;
        self
    }

    /// Set the segment directory.
    pub fn with_segment_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.segment_dir = dir.into();
        self
    }

    /// Set the per-segment buffer flush threshold.
    pub fn with_buffer_flush_threshold(mut self, bytes: usize) -> Self {
        self.buffer_flush_threshold = bytes;
        self
    }

    /// Set the version table capacity.
    pub fn with_version_table_capacity(mut self, capacity: usize) -> Self {
        self.version_table_capacity = capacity;
        self
    }
}
