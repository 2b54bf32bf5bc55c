//! Shard: one independent unit of local object storage
//!
//! A shard chains three tiers:
//!
//! ```text
//!   put ──▶ WriteBuffer ──(flush worker)──▶ BlobStore ─▶ Metabase
//!              │  full / oversized                ▲
//!              └────────── write through ─────────┘
//!
//!   get ──▶ WriteBuffer ─▶ Metabase + BlobStore ─▶ split reassembly
//! ```
//!
//! Every mutation of an address (put, delete, flush commit) runs under that
//! address's stripe of [`AddressLocks`].

use crate::assembly::reassemble;
use crate::blobstore::{BlobStore, FsBlobStore};
use crate::lock::AddressLocks;
use crate::metabase::{IndexEntry, Metabase, MetadataIndex};
use crate::source::{IndexedStorage, ObjectSource};
use crate::writebuffer::{FlushTarget, FlushWorker, WriteBuffer, WriteBufferStats};
use bytes::Bytes;
use casnode_common::{
    Address, ContainerId, Error, Header, Object, ObjectId, Result, ShardConfig, ShardMode,
    SplitInfo, Tier,
};
use casnode_search::{SearchPage, SearchQuery, merge_search_results, select};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const SHARD_ID_FILE: &str = "shard_id";

/// Tier implementations a shard is built from
pub struct ShardTiers {
    pub metabase: Arc<dyn MetadataIndex>,
    pub blobstore: Arc<dyn BlobStore>,
    pub write_buffer: Option<WriteBuffer>,
}

#[derive(Default)]
struct Counters {
    puts: AtomicU64,
    gets: AtomicU64,
    deletes: AtomicU64,
    searches: AtomicU64,
    buffer_hits: AtomicU64,
    direct_writes: AtomicU64,
}

/// Shard statistics
#[derive(Clone, Debug)]
pub struct ShardStats {
    pub puts: u64,
    pub gets: u64,
    pub deletes: u64,
    pub searches: u64,
    /// Reads answered by the write buffer
    pub buffer_hits: u64,
    /// Puts that bypassed the write buffer
    pub direct_writes: u64,
    pub write_buffer: Option<WriteBufferStats>,
}

/// Local object storage shard
pub struct Shard {
    id: Uuid,
    mode: RwLock<ShardMode>,
    storage: Arc<IndexedStorage>,
    write_buffer: Option<Arc<WriteBuffer>>,
    flusher: Option<FlushWorker>,
    locks: Arc<AddressLocks>,
    closed: AtomicBool,
    counters: Counters,
}

fn load_or_create_id(dir: &Path) -> Result<Uuid> {
    let path = dir.join(SHARD_ID_FILE);
    match fs::read_to_string(&path) {
        Ok(text) => Uuid::parse_str(text.trim())
            .map_err(|e| Error::DataCorruption(format!("shard id in {}: {e}", path.display()))),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let id = Uuid::new_v4();
            fs::write(&path, id.to_string()).map_err(|e| {
                Error::Configuration(format!("cannot write {}: {e}", path.display()))
            })?;
            Ok(id)
        }
        Err(e) => Err(Error::Configuration(format!(
            "cannot read {}: {e}",
            path.display()
        ))),
    }
}

impl Shard {
    /// Open (or create) a shard with the default tier implementations
    pub fn open(config: &ShardConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.path).map_err(|e| {
            Error::Configuration(format!("cannot create {}: {e}", config.path.display()))
        })?;
        let id = load_or_create_id(&config.path)?;

        let blobstore = FsBlobStore::open(config.blobstore_path(), config.blobstore.sync_on_write)?;
        let metabase = Metabase::open(config.metabase_path(), &config.metabase)?;
        let write_buffer = if config.write_buffer.enabled {
            Some(WriteBuffer::open(
                &config.write_buffer,
                config.write_buffer_path(),
            )?)
        } else {
            None
        };

        let shard = Self::with_tiers(
            id,
            ShardTiers {
                metabase: Arc::new(metabase),
                blobstore: Arc::new(blobstore),
                write_buffer,
            },
        )?;
        shard.set_mode(config.mode);
        info!("Opened shard {} at {:?}", id, config.path);
        Ok(shard)
    }

    /// Assemble a shard from explicit tiers
    pub fn with_tiers(id: Uuid, tiers: ShardTiers) -> Result<Self> {
        let storage = Arc::new(IndexedStorage::new(tiers.metabase, tiers.blobstore));
        let locks = Arc::new(AddressLocks::default());
        let write_buffer = tiers.write_buffer.map(Arc::new);
        let flusher = write_buffer
            .as_ref()
            .map(|wb| {
                FlushWorker::spawn(
                    Arc::clone(wb),
                    Arc::clone(&storage) as Arc<dyn FlushTarget>,
                    Arc::clone(&locks),
                )
            })
            .transpose()?;

        Ok(Self {
            id,
            mode: RwLock::new(ShardMode::ReadWrite),
            storage,
            write_buffer,
            flusher,
            locks,
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        })
    }

    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> ShardMode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: ShardMode) {
        let previous = std::mem::replace(&mut *self.mode.write(), mode);
        if previous != mode {
            info!("Shard {} mode changed: {:?} -> {:?}", self.id, previous, mode);
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.mode().is_read_only() {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    fn sources(&self) -> Vec<&dyn ObjectSource> {
        let mut sources: Vec<&dyn ObjectSource> = Vec::with_capacity(2);
        if let Some(wb) = &self.write_buffer {
            sources.push(wb.as_ref());
        }
        sources.push(self.storage.as_ref());
        sources
    }

    /// Store an object
    ///
    /// The object is readable as soon as this returns. It goes to the write
    /// buffer when there is room and straight to the durable tiers otherwise.
    pub fn put(&self, object: &Object) -> Result<()> {
        self.check_writable()?;
        object.verify()?;
        let address = object.address();
        let _guard = self.locks.lock(&address);

        if let Some(wb) = &self.write_buffer {
            match wb.put(object) {
                Ok(()) => {
                    self.counters.puts.fetch_add(1, Ordering::Relaxed);
                    debug!("shard put (buffered): {}", address);
                    return Ok(());
                }
                Err(Error::BufferFull) => {
                    warn!("Write buffer refused {}, writing through", address);
                }
                Err(e) => return Err(e),
            }
        }

        self.storage.commit(object)?;
        self.counters.direct_writes.fetch_add(1, Ordering::Relaxed);
        self.counters.puts.fetch_add(1, Ordering::Relaxed);
        debug!("shard put (direct): {}", address);
        Ok(())
    }

    /// Resolve `address` through the tiers, reassembling split parents
    pub fn get(&self, address: &Address) -> Result<Object> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        let mut split: Option<SplitInfo> = None;

        for source in self.sources() {
            match source.get(address) {
                Ok(Some(object)) => {
                    if source.tier() == Tier::WriteBuffer {
                        self.counters.buffer_hits.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(object);
                }
                Ok(None) => {}
                Err(Error::SplitIncomplete(info)) => {
                    split.get_or_insert_with(SplitInfo::default).merge(&info);
                }
                Err(e) => return Err(e),
            }
        }

        let Some(info) = split else {
            return Err(Error::not_found(*address));
        };
        if let Some(link) = info.link {
            if let Some(object) = reassemble(address, link, |a| self.fetch_stored(a))? {
                return Ok(object);
            }
        }
        Err(Error::split_incomplete(info))
    }

    /// First tier physically holding `address`, without split handling
    fn fetch_stored(&self, address: &Address) -> Result<Option<Object>> {
        for source in self.sources() {
            match source.get(address) {
                Ok(Some(object)) => return Ok(Some(object)),
                Ok(None) | Err(Error::SplitIncomplete(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Payload of the object at `address`
    pub fn get_bytes(&self, address: &Address) -> Result<Bytes> {
        self.get(address).map(|object| object.payload)
    }

    /// Payload plus whether the metabase holds an entry for `address`
    pub fn get_bytes_with_metadata_lookup(&self, address: &Address) -> Result<(Bytes, bool)> {
        let payload = self.get_bytes(address)?;
        let has_meta = self
            .storage
            .metabase()
            .lookup(address)
            .map_err(|e| e.with_tier(Tier::MetadataIndex))?
            .is_some();
        Ok((payload, has_meta))
    }

    /// Header of the object (or known split parent) at `address`
    pub fn head(&self, address: &Address) -> Result<Header> {
        let mut split: Option<SplitInfo> = None;
        for source in self.sources() {
            match source.head(address) {
                Ok(Some(header)) => return Ok(header),
                Ok(None) => {}
                Err(Error::SplitIncomplete(info)) => {
                    split.get_or_insert_with(SplitInfo::default).merge(&info);
                }
                Err(e) => return Err(e),
            }
        }
        Err(split.map_or_else(|| Error::not_found(*address), Error::split_incomplete))
    }

    /// Whether any tier physically holds `address`
    pub fn exists(&self, address: &Address) -> Result<bool> {
        for source in self.sources() {
            if source.has(address)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Remove `address` from every tier
    ///
    /// Deleting a split parent deletes every locally known child. Deleting an
    /// absent address succeeds.
    pub fn delete(&self, address: &Address) -> Result<()> {
        self.check_writable()?;
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);

        for child in self.split_members(address)? {
            self.delete_one(&Address::new(address.container, child))?;
        }
        let removed = self.delete_one(address)?;
        debug!("shard delete: {} (present: {})", address, removed);
        Ok(())
    }

    fn delete_one(&self, address: &Address) -> Result<bool> {
        let _guard = self.locks.lock(address);
        let buffered = match &self.write_buffer {
            Some(wb) => wb.remove(address)?,
            None => false,
        };
        let stored = self.storage.remove(address)?;
        Ok(buffered || stored)
    }

    /// Children and link of the split parent at `address`, from every tier
    fn split_members(&self, address: &Address) -> Result<BTreeSet<ObjectId>> {
        let mut members = BTreeSet::new();
        if let Some(IndexEntry::Parent(record)) = self
            .storage
            .metabase()
            .lookup(address)
            .map_err(|e| e.with_tier(Tier::MetadataIndex))?
        {
            members.extend(record.children);
            members.extend(record.link);
        }
        if let Some(wb) = &self.write_buffer {
            members.extend(wb.children_of(address).iter().map(|o| o.id));
        }
        Ok(members)
    }

    /// Search one container through the metabase and the write buffer
    pub fn search(&self, container: &ContainerId, query: &SearchQuery) -> Result<SearchPage> {
        query.validate()?;
        self.counters.searches.fetch_add(1, Ordering::Relaxed);

        let indexed = self
            .storage
            .metabase()
            .search(container, query)
            .map_err(|e| e.with_tier(Tier::MetadataIndex))?;
        let Some(wb) = &self.write_buffer else {
            return Ok(indexed);
        };
        let headers = wb.headers(container);
        if headers.is_empty() {
            return Ok(indexed);
        }

        let buffered = select(query, headers.iter().map(|(id, header)| (*id, header)))?;
        merge_search_results(
            query.limit,
            query.with_attributes(),
            query.compares_integers(),
            &[indexed, buffered],
        )
    }

    /// Commit everything buffered now; returns the number of objects flushed
    pub fn flush_write_buffer(&self) -> Result<usize> {
        self.flusher.as_ref().map_or(Ok(0), FlushWorker::flush_now)
    }

    pub fn pause_flush(&self) -> Result<()> {
        self.flusher.as_ref().map_or(Ok(()), FlushWorker::pause)
    }

    pub fn resume_flush(&self) -> Result<()> {
        self.flusher.as_ref().map_or(Ok(()), FlushWorker::resume)
    }

    pub fn stats(&self) -> ShardStats {
        ShardStats {
            puts: self.counters.puts.load(Ordering::Relaxed),
            gets: self.counters.gets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            searches: self.counters.searches.load(Ordering::Relaxed),
            buffer_hits: self.counters.buffer_hits.load(Ordering::Relaxed),
            direct_writes: self.counters.direct_writes.load(Ordering::Relaxed),
            write_buffer: self.write_buffer.as_ref().map(|wb| wb.stats()),
        }
    }

    /// Stop the flush worker and sync the metabase
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let (Some(flusher), Some(wb)) = (&self.flusher, &self.write_buffer) {
            flusher.shutdown(wb.config().flush_on_close);
        }
        let metabase = self.storage.metabase();
        if let Err(e) = metabase.sync() {
            error!("Failed to sync metabase of shard {}: {}", self.id, e);
        }
        metabase.close();
        info!("Closed shard {}", self.id);
    }
}

impl Drop for Shard {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casnode_common::{ObjectType, SplitHeader, SplitId, split_payload};
    use casnode_search::MatchType;
    use rand::RngCore;
    use std::thread;
    use tempfile::{TempDir, tempdir};

    fn config(dir: &Path, buffered: bool) -> ShardConfig {
        let mut config = ShardConfig::with_path(dir);
        config.write_buffer.enabled = buffered;
        config.write_buffer.flush_interval_ms = 3_600_000;
        config.metabase.sync_on_write = false;
        config.metabase.background_compaction = false;
        config.blobstore.sync_on_write = false;
        config
    }

    fn open(buffered: bool) -> (TempDir, Shard) {
        let dir = tempdir().unwrap();
        let shard = Shard::open(&config(dir.path(), buffered)).unwrap();
        (dir, shard)
    }

    fn random_object(cnr: ContainerId, len: usize) -> Object {
        let mut payload = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut payload);
        Object::seal(Header::new(cnr), payload).unwrap()
    }

    #[test]
    fn test_small_and_big_objects() {
        for buffered in [false, true] {
            let (_dir, shard) = open(buffered);
            let cnr = ContainerId::random();
            let small = random_object(cnr, 8);
            let big = random_object(cnr, 8 * 1024 * 1024);

            for obj in [&small, &big] {
                shard.put(obj).unwrap();
                let got = shard.get(&obj.address()).unwrap();
                assert_eq!(&got, obj);
                assert_eq!(shard.get_bytes(&obj.address()).unwrap(), obj.payload);
            }
            shard.flush_write_buffer().unwrap();
            assert_eq!(shard.get(&big.address()).unwrap(), big);
        }
    }

    #[test]
    fn test_parent_with_single_child_is_split_incomplete() {
        for buffered in [false, true] {
            let (_dir, shard) = open(buffered);
            let cnr = ContainerId::random();
            let parent = Header::new(cnr).with_attribute("parent", "attribute");
            let parent_id = parent.id().unwrap();
            let split_id = SplitId::new();

            let mut child = Header::new(cnr);
            child.split = Some(SplitHeader {
                split_id,
                parent_id,
                parent: Some(Box::new(parent)),
                previous: None,
                children: Vec::new(),
            });
            let child = Object::seal(child, vec![7u8; 32]).unwrap();
            shard.put(&child).unwrap();

            let err = shard.get(&Address::new(cnr, parent_id)).unwrap_err();
            let info = err.split_info().expect("split info");
            assert_eq!(info.last_part, Some(child.id));
            assert_eq!(info.split_id, Some(split_id));
            assert!(info.link.is_none());

            shard.flush_write_buffer().unwrap();
            let err = shard.get(&Address::new(cnr, parent_id)).unwrap_err();
            assert_eq!(err.split_info().and_then(|i| i.last_part), Some(child.id));
        }
    }

    #[test]
    fn test_link_with_huge_parent_size_fails_cleanly() {
        for buffered in [false, true] {
            let (_dir, shard) = open(buffered);
            let cnr = ContainerId::random();
            let mut parent = Header::new(cnr);
            parent.payload_size = u64::MAX;
            let parent_id = parent.id().unwrap();
            let split_id = SplitId::new();

            let mut child = Header::new(cnr);
            child.split = Some(SplitHeader {
                split_id,
                parent_id,
                parent: None,
                previous: None,
                children: Vec::new(),
            });
            let child = Object::seal(child, vec![1u8; 8]).unwrap();
            let mut link = Header::new(cnr);
            link.object_type = ObjectType::Link;
            link.split = Some(SplitHeader {
                split_id,
                parent_id,
                parent: Some(Box::new(parent)),
                previous: None,
                children: vec![child.id],
            });
            let link = Object::seal(link, Vec::new()).unwrap();

            shard.put(&child).unwrap();
            shard.put(&link).unwrap();
            let err = shard.get(&Address::new(cnr, parent_id)).unwrap_err();
            assert!(matches!(err, Error::DataCorruption(_)), "{err}");
        }
    }

    #[test]
    fn test_full_chain_reassembles() {
        let (_dir, shard) = open(true);
        let cnr = ContainerId::random();
        let mut payload = vec![0u8; 10_000];
        rand::thread_rng().fill_bytes(&mut payload);
        let chain = split_payload(Header::new(cnr).with_attribute("name", "big"), &payload, 3000)
            .unwrap();
        let parent = Address::new(cnr, chain.parent_id);

        // half buffered, half committed
        for (i, obj) in chain.objects().enumerate() {
            shard.put(obj).unwrap();
            if i == 1 {
                shard.flush_write_buffer().unwrap();
            }
        }

        let obj = shard.get(&parent).unwrap();
        assert_eq!(obj.payload.as_ref(), payload.as_slice());
        assert_eq!(obj.header, chain.parent);
        assert_eq!(shard.head(&parent).unwrap(), chain.parent);
        assert!(!shard.exists(&parent).unwrap());
    }

    #[test]
    fn test_missing_child_reports_link() {
        let (_dir, shard) = open(false);
        let cnr = ContainerId::random();
        let chain = split_payload(Header::new(cnr), &[5u8; 300], 100).unwrap();
        for obj in chain.objects().filter(|o| o.id != chain.parts[0].id) {
            shard.put(obj).unwrap();
        }

        let err = shard.get(&Address::new(cnr, chain.parent_id)).unwrap_err();
        let info = err.split_info().unwrap();
        assert_eq!(info.link, Some(chain.link.id));
        assert_eq!(info.last_part, Some(chain.parts[2].id));
    }

    #[test]
    fn test_metadata_lookup_flag() {
        let (_dir, shard) = open(true);
        let obj = random_object(ContainerId::random(), 64);
        shard.put(&obj).unwrap();

        let (payload, has_meta) = shard.get_bytes_with_metadata_lookup(&obj.address()).unwrap();
        assert_eq!(payload, obj.payload);
        assert!(!has_meta);

        assert_eq!(shard.flush_write_buffer().unwrap(), 1);
        let (payload, has_meta) = shard.get_bytes_with_metadata_lookup(&obj.address()).unwrap();
        assert_eq!(payload, obj.payload);
        assert!(has_meta);
    }

    #[test]
    fn test_delete_is_idempotent() {
        for buffered in [false, true] {
            let (_dir, shard) = open(buffered);
            let obj = random_object(ContainerId::random(), 100);
            let addr = obj.address();
            shard.put(&obj).unwrap();

            shard.delete(&addr).unwrap();
            shard.delete(&addr).unwrap();
            assert!(shard.get(&addr).unwrap_err().is_not_found());
            assert!(!shard.exists(&addr).unwrap());

            shard.flush_write_buffer().unwrap();
            assert!(shard.get(&addr).unwrap_err().is_not_found());
        }
    }

    #[test]
    fn test_delete_parent_removes_children() {
        let (_dir, shard) = open(true);
        let cnr = ContainerId::random();
        let chain = split_payload(Header::new(cnr), &[1u8; 100], 30).unwrap();
        for (i, obj) in chain.objects().enumerate() {
            shard.put(obj).unwrap();
            if i == 2 {
                shard.flush_write_buffer().unwrap();
            }
        }
        let parent = Address::new(cnr, chain.parent_id);
        shard.delete(&parent).unwrap();

        for obj in chain.objects() {
            assert!(!shard.exists(&obj.address()).unwrap());
        }
        assert!(shard.get(&parent).unwrap_err().is_not_found());
    }

    #[test]
    fn test_persistent_buffer_survives_reopen() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path(), true);
        cfg.write_buffer.flush_on_close = false;
        let obj = random_object(ContainerId::random(), 256);
        let id = {
            let shard = Shard::open(&cfg).unwrap();
            shard.put(&obj).unwrap();
            shard.id()
        };

        let shard = Shard::open(&cfg).unwrap();
        assert_eq!(shard.id(), id);
        assert_eq!(shard.stats().write_buffer.map(|s| s.entries), Some(1));
        assert_eq!(shard.get(&obj.address()).unwrap(), obj);

        assert_eq!(shard.flush_write_buffer().unwrap(), 1);
        let (_, has_meta) = shard.get_bytes_with_metadata_lookup(&obj.address()).unwrap();
        assert!(has_meta);
    }

    #[test]
    fn test_delete_racing_flush_never_resurrects() {
        let (_dir, shard) = open(true);
        let shard = Arc::new(shard);
        let cnr = ContainerId::random();
        let objs: Vec<_> = (0..64).map(|_| random_object(cnr, 32)).collect();
        for obj in &objs {
            shard.put(obj).unwrap();
        }

        let flusher = {
            let shard = Arc::clone(&shard);
            thread::spawn(move || shard.flush_write_buffer().unwrap())
        };
        for obj in &objs {
            shard.delete(&obj.address()).unwrap();
        }
        flusher.join().unwrap();
        shard.flush_write_buffer().unwrap();

        for obj in &objs {
            assert!(shard.get(&obj.address()).unwrap_err().is_not_found());
        }
    }

    #[test]
    fn test_search_reads_buffer_and_index() {
        let (_dir, shard) = open(true);
        let cnr = ContainerId::random();
        let objs: Vec<_> = (1..=6)
            .map(|n| {
                Object::seal(
                    Header::new(cnr).with_attribute("size", n.to_string()),
                    vec![0u8; n],
                )
                .unwrap()
            })
            .collect();
        for obj in &objs[..3] {
            shard.put(obj).unwrap();
        }
        shard.flush_write_buffer().unwrap();
        for obj in &objs[2..] {
            // objs[2] ends up in both tiers
            shard.put(obj).unwrap();
        }

        let query = SearchQuery::new(10)
            .filter("size", MatchType::NumGE, "2")
            .attribute("size");
        let page = shard.search(&cnr, &query).unwrap();
        let sizes: Vec<_> = page.items.iter().map(|i| i.attributes[0].as_str()).collect();
        assert_eq!(sizes, ["2", "3", "4", "5", "6"]);
        assert!(!page.more);

        let query = SearchQuery::new(2)
            .filter("size", MatchType::NumGE, "2")
            .attribute("size");
        let page = shard.search(&cnr, &query).unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.more);

        assert!(matches!(
            shard.search(&cnr, &SearchQuery::new(0)),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_read_only_mode() {
        let (_dir, shard) = open(true);
        let obj = random_object(ContainerId::random(), 10);
        shard.put(&obj).unwrap();

        shard.set_mode(ShardMode::ReadOnly);
        assert!(matches!(
            shard.put(&random_object(ContainerId::random(), 10)),
            Err(Error::ReadOnly)
        ));
        assert!(matches!(shard.delete(&obj.address()), Err(Error::ReadOnly)));
        assert_eq!(shard.get(&obj.address()).unwrap(), obj);

        shard.set_mode(ShardMode::ReadWrite);
        shard.delete(&obj.address()).unwrap();
    }

    #[test]
    fn test_oversized_object_writes_through() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path(), true);
        cfg.write_buffer.max_object_size = 1024;
        let shard = Shard::open(&cfg).unwrap();

        let small = random_object(ContainerId::random(), 100);
        let large = random_object(ContainerId::random(), 4096);
        shard.put(&small).unwrap();
        shard.put(&large).unwrap();

        let stats = shard.stats();
        assert_eq!(stats.puts, 2);
        assert_eq!(stats.direct_writes, 1);
        assert_eq!(stats.write_buffer.map(|s| s.entries), Some(1));
        assert!(shard.get_bytes_with_metadata_lookup(&large.address()).unwrap().1);
    }

    #[test]
    fn test_corrupted_object_rejected() {
        let (_dir, shard) = open(false);
        let mut obj = random_object(ContainerId::random(), 16);
        obj.payload = Bytes::from_static(b"not the payload!");
        assert!(shard.put(&obj).is_err());
        assert!(!shard.exists(&obj.address()).unwrap());
    }
}
