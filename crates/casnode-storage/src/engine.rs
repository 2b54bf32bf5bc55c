//! Storage engine: the shards of one node
//!
//! Objects are placed by rendezvous (HRW) hashing: every shard scores an
//! address with xxHash64 and the highest score is tried first. Reads walk the
//! same order, so an object is normally found on its first shard.

use crate::assembly::reassemble;
use crate::shard::Shard;
use casnode_common::{Address, ContainerId, EngineConfig, Error, Header, Object, Result, SplitInfo};
use casnode_search::{SearchPage, SearchQuery, merge_search_results};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Set of shards addressed as one store
pub struct StorageEngine {
    shards: Vec<Arc<Shard>>,
}

impl StorageEngine {
    /// Open every shard listed in `config`
    pub fn open(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let shards = config
            .shards
            .iter()
            .map(Shard::open)
            .collect::<Result<Vec<_>>>()?;
        let engine = Self::new(shards)?;
        info!("Storage engine opened with {} shards", engine.shards.len());
        Ok(engine)
    }

    pub fn new(shards: Vec<Shard>) -> Result<Self> {
        if shards.is_empty() {
            return Err(Error::Configuration("engine needs at least one shard".into()));
        }
        Ok(Self {
            shards: shards.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn shards(&self) -> &[Arc<Shard>] {
        &self.shards
    }

    /// Shards in placement order for `address`
    fn ordered(&self, address: &Address) -> Vec<&Arc<Shard>> {
        let address_hash = xxhash_rust::xxh64::xxh64(&address.to_key_bytes(), 0);
        let mut scored: Vec<(u64, &Arc<Shard>)> = self
            .shards
            .iter()
            .map(|shard| {
                let score = xxhash_rust::xxh64::xxh64(shard.id().as_bytes(), address_hash);
                (score, shard)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, shard)| shard).collect()
    }

    /// Store on the first shard that accepts the object
    pub fn put(&self, object: &Object) -> Result<()> {
        let address = object.address();
        let mut last_err = None;
        for shard in self.ordered(&address) {
            match shard.put(object) {
                Ok(()) => {
                    debug!("engine put: {} on shard {}", address, shard.id());
                    return Ok(());
                }
                Err(e) if e.is_storage_fault() || matches!(e, Error::ReadOnly) => {
                    warn!("Shard {} refused {}: {}", shard.id(), address, e);
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::internal("no shard accepted the object")))
    }

    /// Fetch an object, reassembling split parents across shards
    pub fn get(&self, address: &Address) -> Result<Object> {
        let mut split: Option<SplitInfo> = None;
        let mut fault = None;

        for shard in self.ordered(address) {
            match shard.get(address) {
                Ok(object) => return Ok(object),
                Err(Error::ObjectNotFound { .. }) => {}
                Err(Error::SplitIncomplete(info)) => {
                    split.get_or_insert_with(SplitInfo::default).merge(&info);
                }
                Err(e) if e.is_storage_fault() => {
                    warn!("Shard {} failed to read {}: {}", shard.id(), address, e);
                    fault = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(info) = split {
            if let Some(link) = info.link {
                if let Some(object) = reassemble(address, link, |a| self.fetch_any(a))? {
                    return Ok(object);
                }
            }
            return Err(Error::split_incomplete(info));
        }
        Err(fault.unwrap_or_else(|| Error::not_found(*address)))
    }

    fn fetch_any(&self, address: &Address) -> Result<Option<Object>> {
        for shard in self.ordered(address) {
            match shard.get(address) {
                Ok(object) => return Ok(Some(object)),
                Err(e) if e.is_not_found() || e.is_split_incomplete() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Header of an object or known split parent
    pub fn head(&self, address: &Address) -> Result<Header> {
        let mut split: Option<SplitInfo> = None;
        for shard in self.ordered(address) {
            match shard.head(address) {
                Ok(header) => return Ok(header),
                Err(Error::ObjectNotFound { .. }) => {}
                Err(Error::SplitIncomplete(info)) => {
                    split.get_or_insert_with(SplitInfo::default).merge(&info);
                }
                Err(e) => return Err(e),
            }
        }
        Err(split.map_or_else(|| Error::not_found(*address), Error::split_incomplete))
    }

    /// Delete from every shard; the first failure is returned after all ran
    pub fn delete(&self, address: &Address) -> Result<()> {
        let mut first_err = None;
        for shard in &self.shards {
            if let Err(e) = shard.delete(address) {
                warn!("Shard {} failed to delete {}: {}", shard.id(), address, e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Search every shard concurrently and merge the pages
    pub async fn search(&self, container: &ContainerId, query: &SearchQuery) -> Result<SearchPage> {
        query.validate()?;
        let tasks = self.shards.iter().map(|shard| {
            let shard = Arc::clone(shard);
            let container = *container;
            let query = query.clone();
            tokio::task::spawn_blocking(move || shard.search(&container, &query))
        });

        let mut pages = Vec::with_capacity(self.shards.len());
        for joined in join_all(tasks).await {
            let page = joined.map_err(|e| Error::internal(format!("shard search task: {e}")))??;
            pages.push(page);
        }
        merge_search_results(
            query.limit,
            query.with_attributes(),
            query.compares_integers(),
            &pages,
        )
    }

    pub fn close(&self) {
        for shard in &self.shards {
            shard.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casnode_common::{ShardConfig, split_payload};
    use casnode_search::MatchType;
    use tempfile::{TempDir, tempdir};

    fn shard_config(dir: &TempDir, name: &str) -> ShardConfig {
        let mut config = ShardConfig::with_path(dir.path().join(name));
        config.write_buffer.enabled = false;
        config.metabase.sync_on_write = false;
        config.metabase.background_compaction = false;
        config.blobstore.sync_on_write = false;
        config
    }

    fn engine(dir: &TempDir, n: usize) -> StorageEngine {
        let config = EngineConfig {
            shards: (0..n).map(|i| shard_config(dir, &format!("s{i}"))).collect(),
        };
        StorageEngine::open(&config).unwrap()
    }

    fn numbered(cnr: ContainerId, n: usize) -> Object {
        Object::seal(
            Header::new(cnr).with_attribute("seq", n.to_string()),
            n.to_le_bytes().to_vec(),
        )
        .unwrap()
    }

    #[test]
    fn test_placement_is_deterministic() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir, 4);
        let obj = numbered(ContainerId::random(), 1);
        let first: Vec<_> = engine.ordered(&obj.address()).iter().map(|s| s.id()).collect();
        let second: Vec<_> = engine.ordered(&obj.address()).iter().map(|s| s.id()).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);

        engine.put(&obj).unwrap();
        let holder = engine.ordered(&obj.address())[0];
        assert!(holder.exists(&obj.address()).unwrap());
    }

    #[test]
    fn test_put_get_delete() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir, 3);
        let obj = numbered(ContainerId::random(), 42);

        engine.put(&obj).unwrap();
        assert_eq!(engine.get(&obj.address()).unwrap(), obj);
        assert_eq!(engine.head(&obj.address()).unwrap(), obj.header);

        engine.delete(&obj.address()).unwrap();
        engine.delete(&obj.address()).unwrap();
        assert!(engine.get(&obj.address()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_cross_shard_reassembly() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir, 3);
        let cnr = ContainerId::random();
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let chain = split_payload(Header::new(cnr), &payload, 300).unwrap();

        // spread the chain round-robin regardless of placement
        for (i, obj) in chain.objects().enumerate() {
            engine.shards()[i % 3].put(obj).unwrap();
        }
        let parent = Address::new(cnr, chain.parent_id);
        let obj = engine.get(&parent).unwrap();
        assert_eq!(obj.payload.as_ref(), payload.as_slice());

        engine.shards()[0].delete(&chain.parts[0].address()).unwrap();
        let err = engine.get(&parent).unwrap_err();
        let info = err.split_info().unwrap();
        assert_eq!(info.link, Some(chain.link.id));
        assert_eq!(info.split_id, Some(chain.split_id));
    }

    #[test]
    fn test_read_only_shard_is_skipped() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir, 2);
        let obj = numbered(ContainerId::random(), 7);
        let preferred = engine.ordered(&obj.address())[0];
        preferred.set_mode(casnode_common::ShardMode::ReadOnly);

        engine.put(&obj).unwrap();
        assert!(!preferred.exists(&obj.address()).unwrap());
        assert_eq!(engine.get(&obj.address()).unwrap(), obj);
    }

    #[tokio::test]
    async fn test_fan_out_search_matches_single_shard() {
        let dir = tempdir().unwrap();
        let engine = engine(&dir, 3);
        let reference = Shard::open(&shard_config(&dir, "reference")).unwrap();
        let cnr = ContainerId::random();

        for n in 0..40 {
            let obj = numbered(cnr, n);
            engine.put(&obj).unwrap();
            reference.put(&obj).unwrap();
        }

        for limit in [1u16, 7, 25, 40, 100] {
            let query = SearchQuery::new(limit)
                .filter("seq", MatchType::NumGE, "5")
                .attribute("seq");
            let merged = engine.search(&cnr, &query).await.unwrap();
            let expected = reference.search(&cnr, &query).unwrap();
            assert_eq!(merged, expected, "limit {limit}");
        }

        let by_id = SearchQuery::new(10);
        let merged = engine.search(&cnr, &by_id).await.unwrap();
        assert_eq!(merged, reference.search(&cnr, &by_id).unwrap());
        assert!(merged.more);
    }
}
