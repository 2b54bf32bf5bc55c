//! Error types for casnode
//!
//! One error enum shared by every crate in the workspace. Storage faults carry
//! the tier they came from so a shard-level caller can tell which layer failed.

use crate::split::SplitInfo;
use crate::types::{Address, IdParseError, Tier};
use thiserror::Error;

/// Common result type for casnode operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for casnode
#[derive(Debug, Error)]
pub enum Error {
    // Lookup outcomes
    #[error("object not found: {address}")]
    ObjectNotFound { address: Address },

    #[error("split object is incomplete: {0}")]
    SplitIncomplete(Box<SplitInfo>),

    // Storage faults
    #[error("{tier} I/O error: {source}")]
    Io {
        tier: Tier,
        #[source]
        source: std::io::Error,
    },

    #[error("{tier} error: {message}")]
    Storage { tier: Tier, message: String },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("data corruption detected: {0}")]
    DataCorruption(String),

    #[error("payload missing for indexed object {address}")]
    PayloadMissing { address: Address },

    #[error("write buffer is full")]
    BufferFull,

    // Request errors
    #[error("non-integer attribute in result #{source_index}: {value:?}")]
    MalformedAttribute { source_index: usize, value: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdParseError),

    #[error("shard is in read-only mode")]
    ReadOnly,

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a not found error for an address
    #[must_use]
    pub const fn not_found(address: Address) -> Self {
        Self::ObjectNotFound { address }
    }

    /// Create a split-incomplete error
    #[must_use]
    pub fn split_incomplete(info: SplitInfo) -> Self {
        Self::SplitIncomplete(Box::new(info))
    }

    /// Create a storage error attributed to a tier
    pub fn storage(tier: Tier, msg: impl Into<String>) -> Self {
        Self::Storage {
            tier,
            message: msg.into(),
        }
    }

    /// Wrap an I/O error with its tier
    #[must_use]
    pub const fn io(tier: Tier, source: std::io::Error) -> Self {
        Self::Io { tier, source }
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an invalid object error
    pub fn invalid_object(msg: impl Into<String>) -> Self {
        Self::InvalidObject(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound { .. })
    }

    /// Check if this is a split-incomplete error
    #[must_use]
    pub const fn is_split_incomplete(&self) -> bool {
        matches!(self, Self::SplitIncomplete(_))
    }

    /// Borrow the split info of a split-incomplete error
    #[must_use]
    pub fn split_info(&self) -> Option<&SplitInfo> {
        match self {
            Self::SplitIncomplete(info) => Some(info),
            _ => None,
        }
    }

    /// Check if this error is a fault of the underlying storage
    #[must_use]
    pub const fn is_storage_fault(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::Storage { .. }
                | Self::ChecksumMismatch { .. }
                | Self::DataCorruption(_)
                | Self::PayloadMissing { .. }
        )
    }

    /// Re-attribute a storage error to `tier`
    ///
    /// Only errors that already carry a tier are touched; a shard uses this to
    /// label errors bubbling out of an injected tier implementation.
    #[must_use]
    pub fn with_tier(self, tier: Tier) -> Self {
        match self {
            Self::Io { source, .. } => Self::Io { tier, source },
            Self::Storage { message, .. } => Self::Storage { tier, message },
            other => other,
        }
    }
}
