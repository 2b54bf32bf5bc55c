//! Configuration types for casnode
//!
//! Configuration is read from TOML. A `[shard_defaults]` table supplies values
//! for every `[[shards]]` entry; keys set on a shard override the defaults,
//! nested tables are merged key by key.
//!
//! ```toml
//! [shard_defaults.write_buffer]
//! max_entries = 1000
//!
//! [[shards]]
//! path = "/srv/casnode/shard0"
//!
//! [[shards]]
//! path = "/srv/casnode/shard1"
//! mode = "read_only"
//! ```

use crate::error::{Error, Result};
use crate::types::ShardMode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for a storage node
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub shards: Vec<ShardConfig>,
}

impl EngineConfig {
    /// Parse TOML text, resolving `[shard_defaults]`
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut root: toml::Table = text
            .parse()
            .map_err(|e: toml::de::Error| Error::Configuration(e.to_string()))?;

        let defaults = match root.remove("shard_defaults") {
            Some(toml::Value::Table(t)) => Some(t),
            Some(_) => {
                return Err(Error::Configuration(
                    "shard_defaults must be a table".into(),
                ));
            }
            None => None,
        };

        if let (Some(defaults), Some(toml::Value::Array(shards))) =
            (defaults, root.get_mut("shards"))
        {
            for shard in shards.iter_mut() {
                let toml::Value::Table(table) = shard else {
                    return Err(Error::Configuration("shards entries must be tables".into()));
                };
                merge_defaults(table, &defaults);
            }
        }

        let config: Self = toml::Value::Table(root)
            .try_into()
            .map_err(|e: toml::de::Error| Error::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Check the whole configuration
    pub fn validate(&self) -> Result<()> {
        if self.shards.is_empty() {
            return Err(Error::Configuration("no shards configured".into()));
        }
        let mut seen = HashSet::new();
        for shard in &self.shards {
            shard.validate()?;
            if !seen.insert(&shard.path) {
                return Err(Error::Configuration(format!(
                    "shard path {} is used twice",
                    shard.path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Fill keys missing from `target` with values from `defaults`, recursively
fn merge_defaults(target: &mut toml::Table, defaults: &toml::Table) {
    for (key, default) in defaults {
        match (target.get_mut(key), default) {
            (Some(toml::Value::Table(sub)), toml::Value::Table(default_sub)) => {
                merge_defaults(sub, default_sub);
            }
            (Some(_), _) => {}
            (None, _) => {
                target.insert(key.clone(), default.clone());
            }
        }
    }
}

/// Configuration of one shard
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    /// Root directory; every tier lives in a subdirectory
    pub path: PathBuf,
    /// Initial operating mode
    pub mode: ShardMode,
    pub write_buffer: WriteBufferConfig,
    pub metabase: MetabaseConfig,
    pub blobstore: BlobStoreConfig,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            mode: ShardMode::ReadWrite,
            write_buffer: WriteBufferConfig::default(),
            metabase: MetabaseConfig::default(),
            blobstore: BlobStoreConfig::default(),
        }
    }
}

impl ShardConfig {
    /// Default configuration rooted at `path`
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn metabase_path(&self) -> PathBuf {
        self.path.join("metabase")
    }

    #[must_use]
    pub fn blobstore_path(&self) -> PathBuf {
        self.path.join("blobstore")
    }

    #[must_use]
    pub fn write_buffer_path(&self) -> PathBuf {
        self.path.join("writecache")
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::Configuration("shard path is empty".into()));
        }
        self.write_buffer.validate()?;
        self.metabase.validate()
    }
}

/// Write buffer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBufferConfig {
    pub enabled: bool,
    /// Keep staged objects on disk so they survive a restart
    pub persistent: bool,
    /// Maximum number of buffered objects
    pub max_entries: usize,
    /// Maximum buffered payload bytes
    pub max_bytes: u64,
    /// Objects larger than this bypass the buffer
    pub max_object_size: u64,
    /// Background flush interval (milliseconds)
    pub flush_interval_ms: u64,
    /// Objects committed per flush pass
    pub flush_batch_size: usize,
    /// Drain the buffer when the shard closes
    pub flush_on_close: bool,
}

impl Default for WriteBufferConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            persistent: true,
            max_entries: 10_000,
            max_bytes: 256 * 1024 * 1024,      // 256 MB
            max_object_size: 16 * 1024 * 1024, // 16 MB
            flush_interval_ms: 1000,
            flush_batch_size: 128,
            flush_on_close: true,
        }
    }
}

impl WriteBufferConfig {
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.max_entries == 0 || self.max_bytes == 0 {
            return Err(Error::Configuration(
                "write buffer limits must be positive".into(),
            ));
        }
        if self.flush_interval_ms == 0 || self.flush_batch_size == 0 {
            return Err(Error::Configuration(
                "write buffer flush interval and batch size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Metabase (metadata index) configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetabaseConfig {
    /// Sync the WAL after every record
    pub sync_on_write: bool,
    /// WAL size that triggers compaction
    pub wal_max_size: u64,
    /// WAL write buffer size
    pub wal_buffer_size: usize,
    /// Mutations between snapshots
    pub snapshot_threshold: u64,
    /// Snapshots kept on disk
    pub snapshot_retention: usize,
    pub background_compaction: bool,
    /// Compaction check interval (seconds)
    pub compaction_interval_secs: u64,
}

impl Default for MetabaseConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            wal_max_size: 64 * 1024 * 1024, // 64MB
            wal_buffer_size: 64 * 1024,     // 64KB
            snapshot_threshold: 10_000,
            snapshot_retention: 2,
            background_compaction: true,
            compaction_interval_secs: 60,
        }
    }
}

impl MetabaseConfig {
    #[must_use]
    pub const fn compaction_interval(&self) -> Duration {
        Duration::from_secs(self.compaction_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.snapshot_retention == 0 {
            return Err(Error::Configuration(
                "metabase must retain at least one snapshot".into(),
            ));
        }
        if self.background_compaction && self.compaction_interval_secs == 0 {
            return Err(Error::Configuration(
                "compaction interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Blob store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobStoreConfig {
    /// fsync every blob file before it becomes visible
    pub sync_on_write: bool,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShardConfig::with_path("/tmp/shard");
        assert!(config.write_buffer.enabled);
        assert_eq!(config.mode, ShardMode::ReadWrite);
        assert_eq!(config.metabase.snapshot_retention, 2);
        assert_eq!(config.metabase_path(), PathBuf::from("/tmp/shard/metabase"));
        config.validate().unwrap();
    }

    #[test]
    fn test_shard_defaults_merge() {
        let text = r#"
            [shard_defaults]
            mode = "read_only"

            [shard_defaults.write_buffer]
            max_entries = 42
            flush_interval_ms = 250

            [[shards]]
            path = "/srv/a"

            [[shards]]
            path = "/srv/b"
            mode = "read_write"

            [shards.write_buffer]
            max_entries = 7
        "#;

        let config = EngineConfig::from_toml_str(text).unwrap();
        assert_eq!(config.shards.len(), 2);

        let a = &config.shards[0];
        assert_eq!(a.mode, ShardMode::ReadOnly);
        assert_eq!(a.write_buffer.max_entries, 42);
        assert_eq!(a.write_buffer.flush_interval_ms, 250);

        let b = &config.shards[1];
        assert_eq!(b.mode, ShardMode::ReadWrite);
        assert_eq!(b.write_buffer.max_entries, 7);
        // nested defaults still apply to keys the shard left out
        assert_eq!(b.write_buffer.flush_interval_ms, 250);
        // untouched sections keep the built-in defaults
        assert_eq!(b.metabase.snapshot_threshold, 10_000);
    }

    #[test]
    fn test_config_rejects_duplicate_paths() {
        let text = r#"
            [[shards]]
            path = "/srv/a"
            [[shards]]
            path = "/srv/a"
        "#;
        assert!(matches!(
            EngineConfig::from_toml_str(text),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_config_rejects_empty() {
        assert!(EngineConfig::from_toml_str("").is_err());
        assert!(EngineConfig::from_toml_str("[[shards]]\nmode = \"read_only\"").is_err());
        assert!(EngineConfig::from_toml_str("shards = 3").is_err());
    }

    #[test]
    fn test_config_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("node.toml");
        std::fs::write(&file, "[[shards]]\npath = \"/srv/x\"\n").unwrap();
        let config = EngineConfig::load(&file).unwrap();
        assert_eq!(config.shards[0].path, PathBuf::from("/srv/x"));
        assert!(EngineConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
