//! Tier lookup chain
//!
//! A shard resolves reads by asking an ordered list of [`ObjectSource`]s: the
//! write buffer (when enabled) and then the indexed tiers. A source that only
//! knows part of a split parent answers with [`Error::SplitIncomplete`].

use crate::blobstore::BlobStore;
use crate::metabase::{IndexEntry, MetadataIndex};
use crate::writebuffer::{FlushTarget, WriteBuffer};
use casnode_common::{Address, Error, Header, Object, Result, Tier};
use std::sync::Arc;
use tracing::debug;

/// One tier of the read path
pub trait ObjectSource: Send + Sync {
    fn tier(&self) -> Tier;

    /// Full object, `None` when this tier has nothing under `address`
    fn get(&self, address: &Address) -> Result<Option<Object>>;

    /// Header only; split parents answer with their header when it is known
    fn head(&self, address: &Address) -> Result<Option<Header>>;

    /// Whether this tier physically holds `address`
    fn has(&self, address: &Address) -> Result<bool>;
}

impl ObjectSource for WriteBuffer {
    fn tier(&self) -> Tier {
        Tier::WriteBuffer
    }

    fn get(&self, address: &Address) -> Result<Option<Object>> {
        if let Some(object) = WriteBuffer::get(self, address) {
            return Ok(Some(object));
        }
        match self.split_info(address) {
            Some(info) => Err(Error::split_incomplete(info)),
            None => Ok(None),
        }
    }

    fn head(&self, address: &Address) -> Result<Option<Header>> {
        if let Some(object) = self.peek(address) {
            return Ok(Some(object.header));
        }
        if let Some(header) = self.parent_header(address) {
            return Ok(Some(header));
        }
        match self.split_info(address) {
            Some(info) => Err(Error::split_incomplete(info)),
            None => Ok(None),
        }
    }

    fn has(&self, address: &Address) -> Result<bool> {
        Ok(WriteBuffer::has(self, address))
    }
}

/// Metabase plus blob store: the durable tiers of a shard
pub struct IndexedStorage {
    metabase: Arc<dyn MetadataIndex>,
    blobstore: Arc<dyn BlobStore>,
}

impl IndexedStorage {
    pub fn new(metabase: Arc<dyn MetadataIndex>, blobstore: Arc<dyn BlobStore>) -> Self {
        Self {
            metabase,
            blobstore,
        }
    }

    pub fn metabase(&self) -> &Arc<dyn MetadataIndex> {
        &self.metabase
    }

    pub fn blobstore(&self) -> &Arc<dyn BlobStore> {
        &self.blobstore
    }

    fn lookup(&self, address: &Address) -> Result<Option<IndexEntry>> {
        self.metabase
            .lookup(address)
            .map_err(|e| e.with_tier(Tier::MetadataIndex))
    }

    /// Write payload, then index entry
    ///
    /// The index entry is the visibility point, so a crash in between leaves
    /// only an unreachable blob.
    pub fn commit(&self, object: &Object) -> Result<()> {
        let address = object.address();
        self.blobstore
            .put(&address, &object.payload)
            .map_err(|e| e.with_tier(Tier::BlobStore))?;
        self.metabase
            .put(object.id, &object.header)
            .map_err(|e| e.with_tier(Tier::MetadataIndex))?;
        debug!("committed {} to indexed storage", address);
        Ok(())
    }

    /// Remove index entry, then payload; returns whether either existed
    pub fn remove(&self, address: &Address) -> Result<bool> {
        let indexed = self
            .metabase
            .delete(address)
            .map_err(|e| e.with_tier(Tier::MetadataIndex))?;
        let stored = self
            .blobstore
            .delete(address)
            .map_err(|e| e.with_tier(Tier::BlobStore))?;
        Ok(indexed || stored)
    }
}

impl FlushTarget for IndexedStorage {
    fn commit(&self, object: &Object) -> Result<()> {
        Self::commit(self, object)
    }
}

impl ObjectSource for IndexedStorage {
    fn tier(&self) -> Tier {
        Tier::MetadataIndex
    }

    fn get(&self, address: &Address) -> Result<Option<Object>> {
        match self.lookup(address)? {
            None => Ok(None),
            Some(IndexEntry::Parent(record)) => Err(Error::split_incomplete(record.split_info())),
            Some(IndexEntry::Stored(header)) => {
                let payload = self
                    .blobstore
                    .get(address)
                    .map_err(|e| e.with_tier(Tier::BlobStore))?
                    .ok_or(Error::PayloadMissing { address: *address })?;
                Ok(Some(Object::from_parts(address.object, header, payload)))
            }
        }
    }

    fn head(&self, address: &Address) -> Result<Option<Header>> {
        match self.lookup(address)? {
            None => Ok(None),
            Some(IndexEntry::Stored(header)) => Ok(Some(header)),
            Some(IndexEntry::Parent(record)) => match record.header {
                Some(header) => Ok(Some(header)),
                None => Err(Error::split_incomplete(record.split_info())),
            },
        }
    }

    fn has(&self, address: &Address) -> Result<bool> {
        self.metabase
            .has(address)
            .map_err(|e| e.with_tier(Tier::MetadataIndex))
    }
}
