//! In-memory ordered index with snapshot persistence
//!
//! Entries are kept in a `BTreeMap` keyed by [`Address`], so all entries of a
//! container are contiguous and a container search is a range scan.
//! Snapshots are written as `meta_<lsn>.snapshot` (header, bincode body,
//! CRC32C) through a temp file and an atomic rename.

use super::types::{IndexEntry, MetaOp, SnapshotHeader};
use casnode_common::{Address, ContainerId, Error, ObjectId, Result, Tier};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

fn snap_err(what: &str, e: impl std::fmt::Display) -> Error {
    Error::storage(Tier::MetadataIndex, format!("snapshot {what}: {e}"))
}

/// Snapshot settings
#[derive(Clone, Debug)]
pub struct SnapshotOptions {
    pub dir: PathBuf,
    /// Mutations between snapshots
    pub threshold: u64,
    /// Snapshots kept on disk
    pub retention: usize,
}

/// Ordered index of metabase entries
pub struct IndexTree {
    tree: RwLock<BTreeMap<Address, IndexEntry>>,
    mutations_since_snapshot: AtomicU64,
    last_snapshot_lsn: AtomicU64,
    options: SnapshotOptions,
}

/// Key range covering every address of `container`
pub fn container_range(container: &ContainerId) -> RangeInclusive<Address> {
    Address::new(*container, ObjectId::from_bytes([0; 32]))
        ..=Address::new(*container, ObjectId::from_bytes([0xff; 32]))
}

fn list_snapshots(dir: &Path) -> Result<Vec<(PathBuf, u64)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut snapshots: Vec<(PathBuf, u64)> = fs::read_dir(dir)
        .map_err(|e| snap_err("listing failed", e))?
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            let lsn = name
                .to_str()?
                .strip_prefix("meta_")?
                .strip_suffix(".snapshot")?
                .parse::<u64>()
                .ok()?;
            Some((entry.path(), lsn))
        })
        .collect();
    // newest first
    snapshots.sort_by_key(|(_, lsn)| std::cmp::Reverse(*lsn));
    Ok(snapshots)
}

fn read_snapshot(path: &Path) -> Result<(BTreeMap<Address, IndexEntry>, SnapshotHeader)> {
    let raw = fs::read(path).map_err(|e| snap_err("read failed", e))?;
    let header = SnapshotHeader::from_bytes(&raw)
        .ok_or_else(|| snap_err("invalid header", path.display()))?;
    let body = &raw[SnapshotHeader::SIZE..];
    if crc32c::crc32c(body) != header.checksum {
        return Err(Error::DataCorruption(format!(
            "snapshot {} checksum mismatch",
            path.display()
        )));
    }
    let entries: Vec<(Address, IndexEntry)> =
        bincode::deserialize(body).map_err(|e| Error::Deserialization(e.to_string()))?;
    if entries.len() as u64 != header.entry_count {
        return Err(Error::DataCorruption(format!(
            "snapshot {} entry count mismatch",
            path.display()
        )));
    }
    Ok((entries.into_iter().collect(), header))
}

impl IndexTree {
    pub fn new(options: SnapshotOptions) -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
            mutations_since_snapshot: AtomicU64::new(0),
            last_snapshot_lsn: AtomicU64::new(0),
            options,
        }
    }

    /// Load the newest readable snapshot, or start empty
    ///
    /// A damaged snapshot is skipped in favour of an older one.
    pub fn load(options: SnapshotOptions) -> Result<Self> {
        for (path, _) in list_snapshots(&options.dir)? {
            match read_snapshot(&path) {
                Ok((tree, header)) => {
                    debug!("Loaded snapshot {:?} ({} entries)", path, tree.len());
                    return Ok(Self {
                        tree: RwLock::new(tree),
                        mutations_since_snapshot: AtomicU64::new(0),
                        last_snapshot_lsn: AtomicU64::new(header.lsn),
                        options,
                    });
                }
                Err(e) => warn!("Skipping unreadable snapshot {:?}: {}", path, e),
            }
        }
        Ok(Self::new(options))
    }

    pub fn get(&self, address: &Address) -> Option<IndexEntry> {
        self.tree.read().get(address).cloned()
    }

    /// Read access for scans
    pub fn read(&self) -> RwLockReadGuard<'_, BTreeMap<Address, IndexEntry>> {
        self.tree.read()
    }

    /// Apply a logged operation
    pub fn apply(&self, op: MetaOp) {
        let mut tree = self.tree.write();
        let mut applied = 0;
        for leaf in op.leaves() {
            match leaf {
                MetaOp::Put { address, entry } => {
                    tree.insert(address, entry);
                }
                MetaOp::Delete { address } => {
                    tree.remove(&address);
                }
                MetaOp::Batch { .. } => {}
            }
            applied += 1;
        }
        self.mutations_since_snapshot
            .fetch_add(applied, Ordering::Relaxed);
    }

    /// Write a snapshot covering everything up to `lsn`
    pub fn write_snapshot(&self, lsn: u64) -> Result<PathBuf> {
        let (body, entry_count) = {
            let tree = self.tree.read();
            let entries: Vec<(&Address, &IndexEntry)> = tree.iter().collect();
            let body =
                bincode::serialize(&entries).map_err(|e| Error::Serialization(e.to_string()))?;
            (body, entries.len() as u64)
        };
        let header = SnapshotHeader::new(lsn, entry_count, crc32c::crc32c(&body));

        fs::create_dir_all(&self.options.dir).map_err(|e| snap_err("mkdir failed", e))?;
        let name = format!("meta_{lsn}.snapshot");
        let path = self.options.dir.join(&name);
        let temp_path = self.options.dir.join(format!("{name}.tmp"));
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| snap_err("create failed", e))?;
            file.write_all(&header.to_bytes())
                .and_then(|()| file.write_all(&body))
                .and_then(|()| file.sync_all())
                .map_err(|e| snap_err("write failed", e))?;
        }
        fs::rename(&temp_path, &path).map_err(|e| snap_err("rename failed", e))?;

        self.last_snapshot_lsn.store(lsn, Ordering::SeqCst);
        self.mutations_since_snapshot.store(0, Ordering::Relaxed);
        self.cleanup_old_snapshots()?;
        Ok(path)
    }

    fn cleanup_old_snapshots(&self) -> Result<()> {
        for (path, _) in list_snapshots(&self.options.dir)?
            .into_iter()
            .skip(self.options.retention)
        {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove old snapshot {:?}: {}", path, e);
            }
        }
        Ok(())
    }

    pub fn needs_snapshot(&self) -> bool {
        self.mutations_since_snapshot.load(Ordering::Relaxed) >= self.options.threshold
    }

    pub fn last_snapshot_lsn(&self) -> u64 {
        self.last_snapshot_lsn.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
