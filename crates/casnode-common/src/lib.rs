//! casnode Common - Shared types and utilities
//!
//! This crate provides the object model, identifiers, error definitions and
//! configuration used across all casnode components.

pub mod checksum;
pub mod config;
pub mod error;
pub mod object;
pub mod split;
pub mod types;

pub use checksum::{ChecksumCalculator, PayloadChecksum};
pub use config::{BlobStoreConfig, EngineConfig, MetabaseConfig, ShardConfig, WriteBufferConfig};
pub use error::{Error, Result};
pub use object::{Header, Object, ObjectType, SplitHeader};
pub use split::{SplitChain, SplitInfo, split_payload};
pub use types::*;
