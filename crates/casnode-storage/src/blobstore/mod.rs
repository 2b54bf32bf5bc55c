//! Bulk payload storage
//!
//! A blob store maps an [`Address`] to an opaque byte string. It knows nothing
//! about headers, indexes or caching; small and multi-megabyte payloads go
//! through the same code path.

mod fs;
mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use bytes::Bytes;
use casnode_common::{Address, Result};

/// Durable address-keyed byte storage
pub trait BlobStore: Send + Sync {
    /// Store `data` under `address`, replacing any previous value
    fn put(&self, address: &Address, data: &[u8]) -> Result<()>;

    /// Fetch the value stored under `address`
    fn get(&self, address: &Address) -> Result<Option<Bytes>>;

    /// Remove `address`; returns whether a value was present
    fn delete(&self, address: &Address) -> Result<bool>;

    /// Check for a value without reading it
    fn exists(&self, address: &Address) -> Result<bool>;

    /// Every stored address, in no particular order
    fn addresses(&self) -> Result<Vec<Address>>;
}
