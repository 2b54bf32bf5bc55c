//! Metadata index ("metabase")
//!
//! Maps addresses to stored object headers and to split-parent records, and
//! answers attribute searches scoped to one container.
//!
//! # Design
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  Metabase                    │
//! │  ┌────────────────────────────────────────┐  │
//! │  │  IndexTree (BTreeMap<Address, Entry>)  │  │
//! │  │  • container range scans for search    │  │
//! │  │  • periodic checksummed snapshots      │  │
//! │  └────────────────────────────────────────┘  │
//! │                      │                       │
//! │  ┌────────────────────────────────────────┐  │
//! │  │  MetaWal (append-only)                 │  │
//! │  │  • every mutation logged first         │  │
//! │  │  • replayed after the snapshot LSN     │  │
//! │  │  • reset once a snapshot covers it     │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Write Path
//! 1. Build the operation (child entry plus its parent record, as one batch)
//! 2. Append to the WAL
//! 3. Apply to the index
//!
//! # Recovery
//! 1. Load the newest intact snapshot
//! 2. Replay WAL records after its LSN

mod index;
mod store;
mod types;
mod wal;

pub use store::{Metabase, MetabaseStats};
pub use types::{IndexEntry, ParentRecord};

use casnode_common::{Address, ContainerId, Header, ObjectId, Result};
use casnode_search::{SearchPage, SearchQuery};

/// Durable address index with attribute search
pub trait MetadataIndex: Send + Sync {
    /// Index a stored object; split children also update their parent record
    fn put(&self, id: ObjectId, header: &Header) -> Result<()>;

    /// Remove an address; returns whether anything was indexed under it
    fn delete(&self, address: &Address) -> Result<bool>;

    /// True only for physically stored objects
    fn has(&self, address: &Address) -> Result<bool>;

    /// Entry under `address`, stored object or parent record
    fn lookup(&self, address: &Address) -> Result<Option<IndexEntry>>;

    /// Evaluate `query` over one container
    fn search(&self, container: &ContainerId, query: &SearchQuery) -> Result<SearchPage>;

    /// Make every accepted mutation durable
    fn sync(&self) -> Result<()> {
        Ok(())
    }

    /// Stop background work; the index stays usable
    fn close(&self) {}
}
