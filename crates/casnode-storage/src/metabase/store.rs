//! WAL-backed metabase with background compaction

use super::index::{IndexTree, SnapshotOptions, container_range};
use super::types::{IndexEntry, MetaOp, ParentRecord};
use super::wal::{MetaWal, WalOptions};
use super::MetadataIndex;
use casnode_common::{
    Address, ContainerId, Error, Header, MetabaseConfig, ObjectId, Result, Tier,
};
use casnode_search::{SearchPage, SearchQuery, select};
use crossbeam_channel::{RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

struct Inner {
    dir: PathBuf,
    wal: MetaWal,
    index: IndexTree,
    /// Serializes read-modify-write of entries and compaction
    write_lock: Mutex<()>,
}

impl Inner {
    fn commit(&self, op: MetaOp) -> Result<u64> {
        let lsn = self.wal.append(&op)?;
        self.index.apply(op);
        Ok(lsn)
    }

    fn needs_compaction(&self) -> bool {
        self.index.needs_snapshot() || self.wal.needs_compaction()
    }

    fn compact(&self) -> Result<PathBuf> {
        let _guard = self.write_lock.lock();
        let lsn = self.wal.current_lsn();
        let path = self.index.write_snapshot(lsn)?;
        info!("Wrote metabase snapshot at LSN {}", lsn);

        if let Err(e) = self.wal.reset() {
            warn!("Failed to reset metabase WAL: {}", e);
        } else {
            debug!("Reset metabase WAL after LSN {}", lsn);
        }
        Ok(path)
    }
}

/// Metabase statistics
#[derive(Debug, Clone)]
pub struct MetabaseStats {
    pub entry_count: usize,
    pub wal_size: u64,
    pub wal_lsn: u64,
    pub last_snapshot_lsn: u64,
}

/// Durable metadata index: WAL + in-memory B-tree + snapshots
pub struct Metabase {
    inner: Arc<Inner>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    compaction_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Metabase {
    /// Open the metabase in `dir`, creating it if needed
    pub fn open(dir: impl AsRef<Path>, config: &MetabaseConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| Error::io(Tier::MetadataIndex, e))?;

        let index = IndexTree::load(SnapshotOptions {
            dir: dir.join("snapshots"),
            threshold: config.snapshot_threshold,
            retention: config.snapshot_retention,
        })?;
        let snapshot_lsn = index.last_snapshot_lsn();

        let wal = MetaWal::open(
            dir.join("metabase.wal"),
            WalOptions {
                sync_on_write: config.sync_on_write,
                max_size_bytes: config.wal_max_size,
                write_buffer_size: config.wal_buffer_size,
            },
            snapshot_lsn,
        )?;

        let replayed = wal.replay(snapshot_lsn + 1, |_lsn, op| {
            index.apply(op);
            Ok(())
        })?;
        info!(
            "Opened metabase at {:?} ({} entries, {} WAL records replayed after LSN {})",
            dir,
            index.len(),
            replayed,
            snapshot_lsn
        );

        let metabase = Self {
            inner: Arc::new(Inner {
                dir,
                wal,
                index,
                write_lock: Mutex::new(()),
            }),
            shutdown_tx: Mutex::new(None),
            compaction_handle: Mutex::new(None),
        };
        if config.background_compaction {
            metabase.start_background_compaction(config.compaction_interval())?;
        }
        Ok(metabase)
    }

    fn start_background_compaction(&self, interval: std::time::Duration) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let (tx, rx) = crossbeam_channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("metabase-compaction".into())
            .spawn(move || {
                debug!("Metabase compaction thread started");
                loop {
                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if inner.needs_compaction() {
                        if let Err(e) = inner.compact() {
                            error!("Background metabase compaction failed: {}", e);
                        }
                    }
                }
                debug!("Metabase compaction thread stopped");
            })
            .map_err(|e| Error::io(Tier::MetadataIndex, e))?;

        *self.shutdown_tx.lock() = Some(tx);
        *self.compaction_handle.lock() = Some(handle);
        Ok(())
    }

    /// Snapshot the index and reset the WAL now
    pub fn snapshot(&self) -> Result<PathBuf> {
        self.inner.compact()
    }

    /// Snapshot only if thresholds are exceeded
    pub fn maybe_compact(&self) -> Result<Option<PathBuf>> {
        if self.inner.needs_compaction() {
            self.snapshot().map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.dir
    }

    pub fn len(&self) -> usize {
        self.inner.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.index.is_empty()
    }

    pub fn stats(&self) -> MetabaseStats {
        MetabaseStats {
            entry_count: self.inner.index.len(),
            wal_size: self.inner.wal.size(),
            wal_lsn: self.inner.wal.current_lsn(),
            last_snapshot_lsn: self.inner.index.last_snapshot_lsn(),
        }
    }

    /// Parent record update caused by storing `id`
    fn parent_after_put(&self, id: ObjectId, header: &Header) -> Option<MetaOp> {
        let split = header.split.as_ref()?;
        let parent = Address::new(header.container_id, split.parent_id);

        let mut record = match self.inner.index.get(&parent) {
            Some(IndexEntry::Stored(_)) => {
                warn!("Split parent {} is stored as a regular object", parent);
                return None;
            }
            Some(IndexEntry::Parent(record)) => record,
            None => ParentRecord::new(split.split_id),
        };
        if header.is_link() {
            record.link = Some(id);
        } else {
            record.children.insert(id);
            if split.parent.is_some() {
                record.last_part = Some(id);
            }
        }
        if record.header.is_none() {
            record.header = split.parent.as_deref().cloned();
        }
        Some(MetaOp::Put {
            address: parent,
            entry: IndexEntry::Parent(record),
        })
    }

    /// Parent record update caused by deleting a stored child
    fn parent_after_delete(&self, address: &Address, header: &Header) -> Option<MetaOp> {
        let split = header.split.as_ref()?;
        let parent = Address::new(address.container, split.parent_id);
        let Some(IndexEntry::Parent(mut record)) = self.inner.index.get(&parent) else {
            return None;
        };

        if record.link == Some(address.object) {
            record.link = None;
        }
        if record.last_part == Some(address.object) {
            record.last_part = None;
        }
        record.children.remove(&address.object);

        Some(if record.is_orphaned() {
            MetaOp::Delete { address: parent }
        } else {
            MetaOp::Put {
                address: parent,
                entry: IndexEntry::Parent(record),
            }
        })
    }

    fn shutdown(&self) {
        drop(self.shutdown_tx.lock().take());
        if let Some(handle) = self.compaction_handle.lock().take() {
            if handle.join().is_err() {
                error!("Metabase compaction thread panicked");
            }
        }
        if let Err(e) = self.inner.wal.sync() {
            error!("Failed to sync metabase WAL on shutdown: {}", e);
        }
    }
}

impl MetadataIndex for Metabase {
    fn put(&self, id: ObjectId, header: &Header) -> Result<()> {
        let _guard = self.inner.write_lock.lock();
        let address = Address::new(header.container_id, id);

        let stored = MetaOp::Put {
            address,
            entry: IndexEntry::Stored(header.clone()),
        };
        let op = match self.parent_after_put(id, header) {
            Some(parent) => MetaOp::Batch {
                ops: vec![stored, parent],
            },
            None => stored,
        };
        let lsn = self.inner.commit(op)?;
        debug!("metabase put: {} lsn={}", address, lsn);
        Ok(())
    }

    fn delete(&self, address: &Address) -> Result<bool> {
        let _guard = self.inner.write_lock.lock();
        let Some(entry) = self.inner.index.get(address) else {
            return Ok(false);
        };

        let removed = MetaOp::Delete { address: *address };
        let parent = match &entry {
            IndexEntry::Stored(header) => self.parent_after_delete(address, header),
            IndexEntry::Parent(_) => None,
        };
        let op = match parent {
            Some(parent) => MetaOp::Batch {
                ops: vec![removed, parent],
            },
            None => removed,
        };
        let lsn = self.inner.commit(op)?;
        debug!("metabase delete: {} lsn={}", address, lsn);
        Ok(true)
    }

    fn has(&self, address: &Address) -> Result<bool> {
        Ok(self
            .inner
            .index
            .read()
            .get(address)
            .is_some_and(IndexEntry::is_stored))
    }

    fn lookup(&self, address: &Address) -> Result<Option<IndexEntry>> {
        Ok(self.inner.index.get(address))
    }

    fn search(&self, container: &ContainerId, query: &SearchQuery) -> Result<SearchPage> {
        let tree = self.inner.index.read();
        let candidates = tree
            .range(container_range(container))
            .filter_map(|(address, entry)| entry.header().map(|h| (address.object, h)));
        select(query, candidates)
    }

    fn sync(&self) -> Result<()> {
        self.inner.wal.sync()
    }

    fn close(&self) {
        self.shutdown();
    }
}

impl Drop for Metabase {
    fn drop(&mut self) {
        self.shutdown();
    }
}
