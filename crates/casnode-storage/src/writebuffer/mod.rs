//! Write buffer
//!
//! Bounded staging area in front of the metabase and blob store. Accepted
//! objects are visible immediately; a background worker (see [`flush`])
//! commits them to the lower tiers and evicts them once committed.
//!
//! Staged objects are also written, encoded whole, to a private blob store so
//! that a persistent buffer survives a restart.

mod flush;

pub use flush::{FlushTarget, FlushWorker};

use crate::blobstore::{BlobStore, FsBlobStore, MemoryBlobStore};
use casnode_common::{
    Address, ContainerId, Error, Header, Object, ObjectId, Result, SplitInfo, Tier,
    WriteBufferConfig,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

#[derive(Default)]
struct Staged {
    objects: HashMap<Address, Object>,
    bytes: u64,
    /// Room held by puts still writing to staging
    reserved_entries: usize,
    reserved_bytes: u64,
}

impl Staged {
    fn release(&mut self, size: u64) {
        self.reserved_entries -= 1;
        self.reserved_bytes -= size;
    }
}

/// Write buffer statistics
#[derive(Clone, Debug, Default)]
pub struct WriteBufferStats {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub flushed: u64,
    pub flush_errors: u64,
}

/// Bounded in-memory object buffer with optional on-disk staging
pub struct WriteBuffer {
    staged: RwLock<Staged>,
    staging: Box<dyn BlobStore>,
    config: WriteBufferConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    flushed: AtomicU64,
    flush_errors: AtomicU64,
}

impl WriteBuffer {
    /// Open a buffer staging to `dir` (or to memory if not persistent)
    pub fn open(config: &WriteBufferConfig, dir: impl AsRef<Path>) -> Result<Self> {
        let staging: Box<dyn BlobStore> = if config.persistent {
            Box::new(FsBlobStore::open(dir.as_ref(), true).map_err(|e| e.with_tier(Tier::WriteBuffer))?)
        } else {
            warn!("Write buffer is memory-only; unflushed objects are lost on crash");
            Box::new(MemoryBlobStore::new())
        };
        Self::with_staging(config, staging)
    }

    /// Build a buffer on top of an explicit staging store, reloading its content
    pub fn with_staging(config: &WriteBufferConfig, staging: Box<dyn BlobStore>) -> Result<Self> {
        config.validate()?;
        let buffer = Self {
            staged: RwLock::new(Staged::default()),
            staging,
            config: config.clone(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            flush_errors: AtomicU64::new(0),
        };
        buffer.reload()?;
        Ok(buffer)
    }

    fn reload(&self) -> Result<()> {
        let addresses = self
            .staging
            .addresses()
            .map_err(|e| e.with_tier(Tier::WriteBuffer))?;
        if addresses.is_empty() {
            return Ok(());
        }

        let mut staged = self.staged.write();
        let mut dropped = 0;
        for address in addresses {
            let decoded = self
                .staging
                .get(&address)
                .and_then(|raw| raw.map(|raw| Object::decode(&raw)).transpose());
            match decoded {
                Ok(Some(object)) if object.address() == address => {
                    staged.bytes += object.payload.len() as u64;
                    staged.objects.insert(address, object);
                }
                Ok(_) | Err(_) => {
                    warn!("Dropping unreadable staged object {}", address);
                    if let Err(e) = self.staging.delete(&address) {
                        warn!("Failed to remove staged object {}: {}", address, e);
                    }
                    dropped += 1;
                }
            }
        }
        info!(
            "Reloaded {} staged objects ({} bytes, {} dropped)",
            staged.objects.len(),
            staged.bytes,
            dropped
        );
        Ok(())
    }

    pub const fn config(&self) -> &WriteBufferConfig {
        &self.config
    }

    /// Stage an object
    ///
    /// Fails with [`Error::BufferFull`] when the object is above the size cap
    /// or the buffer has no room for it.
    pub fn put(&self, object: &Object) -> Result<()> {
        let size = object.payload.len() as u64;
        let address = object.address();
        if size > self.config.max_object_size {
            return Err(Error::BufferFull);
        }
        let encoded = object.encode()?;

        {
            let mut staged = self.staged.write();
            // same address means same content
            if staged.objects.contains_key(&address) {
                return Ok(());
            }
            if staged.objects.len() + staged.reserved_entries >= self.config.max_entries {
                return Err(Error::BufferFull);
            }
            if staged.bytes + staged.reserved_bytes + size > self.config.max_bytes {
                return Err(Error::BufferFull);
            }
            staged.reserved_entries += 1;
            staged.reserved_bytes += size;
        }

        let written = self
            .staging
            .put(&address, &encoded)
            .map_err(|e| e.with_tier(Tier::WriteBuffer));

        let mut staged = self.staged.write();
        staged.release(size);
        written?;
        if staged.objects.insert(address, object.clone()).is_none() {
            staged.bytes += size;
        }
        debug!("write buffer put: {} ({} bytes)", address, size);
        Ok(())
    }

    pub fn get(&self, address: &Address) -> Option<Object> {
        let found = self.staged.read().objects.get(address).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Like [`WriteBuffer::get`] but without touching hit statistics
    pub(crate) fn peek(&self, address: &Address) -> Option<Object> {
        self.staged.read().objects.get(address).cloned()
    }

    pub fn has(&self, address: &Address) -> bool {
        self.staged.read().objects.contains_key(address)
    }

    /// Drop an entry from memory and staging; returns whether it was buffered
    pub fn remove(&self, address: &Address) -> Result<bool> {
        let removed = {
            let mut staged = self.staged.write();
            let removed = staged.objects.remove(address);
            if let Some(object) = &removed {
                staged.bytes -= object.payload.len() as u64;
            }
            removed.is_some()
        };
        if removed {
            self.staging
                .delete(address)
                .map_err(|e| e.with_tier(Tier::WriteBuffer))?;
        }
        Ok(removed)
    }

    /// Buffered children (and link) of the split parent at `parent`
    pub fn children_of(&self, parent: &Address) -> Vec<Object> {
        self.staged
            .read()
            .objects
            .values()
            .filter(|o| {
                o.header.container_id == parent.container
                    && o.header.parent_id() == Some(parent.object)
            })
            .cloned()
            .collect()
    }

    /// What the buffer alone knows about the split parent at `parent`
    pub fn split_info(&self, parent: &Address) -> Option<SplitInfo> {
        let children = self.children_of(parent);
        let first = children.first()?;
        let mut info = SplitInfo {
            split_id: first.header.split.as_ref().map(|s| s.split_id),
            ..SplitInfo::default()
        };
        for child in &children {
            if child.header.is_link() {
                info.link = Some(child.id);
            } else if child.header.parent_header().is_some() {
                info.last_part = Some(child.id);
            }
        }
        Some(info)
    }

    /// Parent header carried by a buffered child, if any
    pub fn parent_header(&self, parent: &Address) -> Option<Header> {
        self.children_of(parent)
            .into_iter()
            .find_map(|child| child.header.parent_header().cloned())
    }

    /// Searchable headers of one container: buffered objects plus the parents
    /// their children describe
    pub fn headers(&self, container: &ContainerId) -> Vec<(ObjectId, Header)> {
        let staged = self.staged.read();
        let mut headers: HashMap<ObjectId, Header> = HashMap::new();
        for object in staged.objects.values() {
            if object.header.container_id != *container {
                continue;
            }
            if let Some(parent) = object.header.parent_header() {
                if let Some(parent_id) = object.header.parent_id() {
                    headers.entry(parent_id).or_insert_with(|| parent.clone());
                }
            }
            headers.insert(object.id, object.header.clone());
        }
        headers.into_iter().collect()
    }

    /// Up to `limit` buffered addresses, for a flush pass
    pub fn pending(&self, limit: usize) -> Vec<Address> {
        self.staged.read().objects.keys().take(limit).copied().collect()
    }

    pub(crate) fn record_flushed(&self) {
        self.flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush_error(&self) {
        self.flush_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.staged.read().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> WriteBufferStats {
        let staged = self.staged.read();
        WriteBufferStats {
            entries: staged.objects.len(),
            bytes: staged.bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            flush_errors: self.flush_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use casnode_common::split_payload;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Staging store that takes a while to accept each write
    struct SlowStaging {
        inner: MemoryBlobStore,
        delay: Duration,
        fail: bool,
    }

    impl BlobStore for SlowStaging {
        fn put(&self, address: &Address, data: &[u8]) -> Result<()> {
            thread::sleep(self.delay);
            if self.fail {
                return Err(Error::storage(Tier::BlobStore, "staging disk full"));
            }
            self.inner.put(address, data)
        }

        fn get(&self, address: &Address) -> Result<Option<Bytes>> {
            self.inner.get(address)
        }

        fn delete(&self, address: &Address) -> Result<bool> {
            self.inner.delete(address)
        }

        fn exists(&self, address: &Address) -> Result<bool> {
            self.inner.exists(address)
        }

        fn addresses(&self) -> Result<Vec<Address>> {
            self.inner.addresses()
        }
    }

    fn config() -> WriteBufferConfig {
        WriteBufferConfig {
            max_entries: 4,
            max_bytes: 1024,
            max_object_size: 512,
            ..WriteBufferConfig::default()
        }
    }

    fn object(cnr: ContainerId, len: usize) -> Object {
        let mut payload = vec![0u8; len];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut payload);
        Object::seal(Header::new(cnr), payload).unwrap()
    }

    #[test]
    fn test_put_get_remove() {
        let buffer = WriteBuffer::with_staging(&config(), Box::new(MemoryBlobStore::new())).unwrap();
        let obj = object(ContainerId::random(), 100);
        let addr = obj.address();

        assert!(buffer.get(&addr).is_none());
        buffer.put(&obj).unwrap();
        assert!(buffer.has(&addr));
        assert_eq!(buffer.get(&addr), Some(obj));

        assert!(buffer.remove(&addr).unwrap());
        assert!(!buffer.remove(&addr).unwrap());
        let stats = buffer.stats();
        assert_eq!((stats.entries, stats.bytes), (0, 0));
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_zero_length_object_is_not_absent() {
        let buffer = WriteBuffer::with_staging(&config(), Box::new(MemoryBlobStore::new())).unwrap();
        let obj = object(ContainerId::random(), 0);
        buffer.put(&obj).unwrap();
        assert_eq!(buffer.get(&obj.address()).map(|o| o.payload.len()), Some(0));
    }

    #[test]
    fn test_bounds() {
        let buffer = WriteBuffer::with_staging(&config(), Box::new(MemoryBlobStore::new())).unwrap();
        let cnr = ContainerId::random();

        assert!(matches!(buffer.put(&object(cnr, 600)), Err(Error::BufferFull)));

        buffer.put(&object(cnr, 500)).unwrap();
        buffer.put(&object(cnr, 500)).unwrap();
        assert!(matches!(buffer.put(&object(cnr, 100)), Err(Error::BufferFull)));

        buffer.put(&object(cnr, 10)).unwrap();
        buffer.put(&object(cnr, 10)).unwrap();
        assert!(matches!(buffer.put(&object(cnr, 1)), Err(Error::BufferFull)));
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_bounds_hold_under_concurrent_puts() {
        let config = WriteBufferConfig {
            max_entries: 2,
            ..config()
        };
        let staging = SlowStaging {
            inner: MemoryBlobStore::new(),
            delay: Duration::from_millis(50),
            fail: false,
        };
        let buffer = Arc::new(WriteBuffer::with_staging(&config, Box::new(staging)).unwrap());
        let cnr = ContainerId::random();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                let barrier = Arc::clone(&barrier);
                let obj = object(cnr, 16);
                thread::spawn(move || {
                    barrier.wait();
                    buffer.put(&obj).is_ok()
                })
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(accepted, 2);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.stats().bytes, 32);
    }

    #[test]
    fn test_failed_staging_write_releases_room() {
        let config = WriteBufferConfig {
            max_entries: 1,
            ..config()
        };
        let staging = SlowStaging {
            inner: MemoryBlobStore::new(),
            delay: Duration::ZERO,
            fail: true,
        };
        let buffer = WriteBuffer::with_staging(&config, Box::new(staging)).unwrap();
        let cnr = ContainerId::random();

        for _ in 0..3 {
            let err = buffer.put(&object(cnr, 16)).unwrap_err();
            assert!(!matches!(err, Error::BufferFull), "{err}");
        }
        assert!(buffer.is_empty());
        assert_eq!(buffer.stats().bytes, 0);
    }

    #[test]
    fn test_persistent_reload() {
        let dir = tempdir().unwrap();
        let cnr = ContainerId::random();
        let objs: Vec<_> = (0..3).map(|_| object(cnr, 64)).collect();
        {
            let buffer = WriteBuffer::open(&config(), dir.path()).unwrap();
            for obj in &objs {
                buffer.put(obj).unwrap();
            }
            buffer.remove(&objs[0].address()).unwrap();
        }

        let buffer = WriteBuffer::open(&config(), dir.path()).unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.stats().bytes, 128);
        assert!(!buffer.has(&objs[0].address()));
        assert_eq!(buffer.get(&objs[2].address()).as_ref(), Some(&objs[2]));
    }

    #[test]
    fn test_split_view() {
        let buffer = WriteBuffer::with_staging(
            &WriteBufferConfig {
                max_entries: 100,
                ..config()
            },
            Box::new(MemoryBlobStore::new()),
        )
        .unwrap();
        let cnr = ContainerId::random();
        let chain = split_payload(Header::new(cnr).with_attribute("a", "1"), &[1u8; 64], 16).unwrap();
        let parent = Address::new(cnr, chain.parent_id);

        assert!(buffer.split_info(&parent).is_none());
        let last = chain.parts.last().unwrap();
        buffer.put(last).unwrap();

        let info = buffer.split_info(&parent).unwrap();
        assert_eq!(info.last_part, Some(last.id));
        assert_eq!(info.split_id, Some(chain.split_id));
        assert!(info.link.is_none());
        assert_eq!(buffer.parent_header(&parent), Some(chain.parent.clone()));

        buffer.put(&chain.link).unwrap();
        assert_eq!(buffer.split_info(&parent).unwrap().link, Some(chain.link.id));

        let headers = buffer.headers(&cnr);
        assert_eq!(headers.len(), 3);
        assert!(headers.iter().any(|(id, _)| *id == chain.parent_id));
        assert!(buffer.headers(&ContainerId::random()).is_empty());
    }
}
