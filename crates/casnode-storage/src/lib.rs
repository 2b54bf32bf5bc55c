//! casnode Storage - local object storage
//!
//! This crate implements the storage side of a casnode node:
//! - Blob store for payload bytes (file-backed and in-memory)
//! - Metabase: WAL + ordered index + snapshots, with attribute search
//! - Write buffer with a background flush worker
//! - Shard composing the three tiers, with split-object reassembly
//! - Storage engine placing objects over several shards

pub mod assembly;
pub mod blobstore;
pub mod engine;
pub mod lock;
pub mod metabase;
pub mod shard;
pub mod source;
pub mod writebuffer;

// Re-exports
pub use assembly::reassemble;
pub use blobstore::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use engine::StorageEngine;
pub use lock::AddressLocks;
pub use metabase::{IndexEntry, Metabase, MetabaseStats, MetadataIndex, ParentRecord};
pub use shard::{Shard, ShardStats, ShardTiers};
pub use source::{IndexedStorage, ObjectSource};
pub use writebuffer::{FlushTarget, FlushWorker, WriteBuffer, WriteBufferStats};
