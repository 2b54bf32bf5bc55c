//! In-memory blob store

use super::BlobStore;
use bytes::Bytes;
use casnode_common::{Address, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Map-backed blob store; contents are lost when dropped
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<Address, Bytes>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, address: &Address, data: &[u8]) -> Result<()> {
        self.blobs
            .write()
            .insert(*address, Bytes::copy_from_slice(data));
        Ok(())
    }

    fn get(&self, address: &Address) -> Result<Option<Bytes>> {
        Ok(self.blobs.read().get(address).cloned())
    }

    fn delete(&self, address: &Address) -> Result<bool> {
        Ok(self.blobs.write().remove(address).is_some())
    }

    fn exists(&self, address: &Address) -> Result<bool> {
        Ok(self.blobs.read().contains_key(address))
    }

    fn addresses(&self) -> Result<Vec<Address>> {
        Ok(self.blobs.read().keys().copied().collect())
    }
}
