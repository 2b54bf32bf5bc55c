//! Metabase entry and log types

use casnode_common::{Address, Error, Header, ObjectId, Result, SplitId, SplitInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What the metabase knows about an address
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexEntry {
    /// A physically stored object
    Stored(Header),
    /// A split parent, known only through its children
    Parent(ParentRecord),
}

impl IndexEntry {
    /// Header of the entry, if known
    #[must_use]
    pub fn header(&self) -> Option<&Header> {
        match self {
            Self::Stored(header) => Some(header),
            Self::Parent(record) => record.header.as_ref(),
        }
    }

    #[must_use]
    pub const fn is_stored(&self) -> bool {
        matches!(self, Self::Stored(_))
    }
}

/// Locally known state of a split parent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRecord {
    /// Parent header, once a child carrying it has been stored
    pub header: Option<Header>,
    pub split_id: SplitId,
    /// Child carrying the parent header
    pub last_part: Option<ObjectId>,
    pub link: Option<ObjectId>,
    /// Stored children (link object excluded)
    pub children: BTreeSet<ObjectId>,
}

impl ParentRecord {
    #[must_use]
    pub const fn new(split_id: SplitId) -> Self {
        Self {
            header: None,
            split_id,
            last_part: None,
            link: None,
            children: BTreeSet::new(),
        }
    }

    #[must_use]
    pub const fn split_info(&self) -> SplitInfo {
        SplitInfo {
            split_id: Some(self.split_id),
            last_part: self.last_part,
            link: self.link,
        }
    }

    /// No stored object refers to this parent any more
    #[must_use]
    pub fn is_orphaned(&self) -> bool {
        self.children.is_empty() && self.link.is_none()
    }
}

/// Logged metabase mutation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MetaOp {
    Put { address: Address, entry: IndexEntry },
    Delete { address: Address },
    /// Applied atomically
    Batch { ops: Vec<MetaOp> },
}

impl MetaOp {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        bincode::deserialize(data).ok()
    }

    /// Flatten batches into their leaf operations
    pub fn leaves(self) -> Vec<Self> {
        match self {
            Self::Batch { ops } => ops.into_iter().flat_map(Self::leaves).collect(),
            leaf => vec![leaf],
        }
    }
}

/// Snapshot file header
#[derive(Clone, Debug)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// LSN covered by the snapshot
    pub lsn: u64,
    pub entry_count: u64,
    /// CRC32C of the snapshot body
    pub checksum: u32,
}

impl SnapshotHeader {
    pub const MAGIC: u32 = 0x4342_4D53; // "CBMS"
    pub const VERSION: u32 = 1;
    pub const SIZE: usize = 28;

    pub const fn new(lsn: u64, entry_count: u64, checksum: u32) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            lsn,
            entry_count,
            checksum,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.lsn.to_le_bytes());
        buf[16..24].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[24..28].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        let magic = u32::from_le_bytes(data[0..4].try_into().ok()?);
        if magic != Self::MAGIC {
            return None;
        }
        let version = u32::from_le_bytes(data[4..8].try_into().ok()?);
        if version != Self::VERSION {
            return None;
        }
        Some(Self {
            magic,
            version,
            lsn: u64::from_le_bytes(data[8..16].try_into().ok()?),
            entry_count: u64::from_le_bytes(data[16..24].try_into().ok()?),
            checksum: u32::from_le_bytes(data[24..28].try_into().ok()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casnode_common::ContainerId;

    #[test]
    fn test_batch_leaves() {
        let a = Address::new(ContainerId::random(), ObjectId::from_bytes([1; 32]));
        let op = MetaOp::Batch {
            ops: vec![
                MetaOp::Delete { address: a },
                MetaOp::Batch {
                    ops: vec![MetaOp::Delete { address: a }],
                },
            ],
        };
        let decoded = MetaOp::from_bytes(&op.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.leaves().len(), 2);
    }

    #[test]
    fn test_snapshot_header_rejects_bad_magic() {
        let header = SnapshotHeader::new(1000, 500, 0xdead_beef);
        let mut bytes = header.to_bytes();
        let parsed = SnapshotHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.lsn, 1000);
        assert_eq!(parsed.entry_count, 500);
        assert_eq!(parsed.checksum, 0xdead_beef);

        bytes[0] ^= 1;
        assert!(SnapshotHeader::from_bytes(&bytes).is_none());
    }

    #[test]
    fn test_parent_record_split_info() {
        let split_id = SplitId::new();
        let mut record = ParentRecord::new(split_id);
        assert!(record.is_orphaned());
        record.children.insert(ObjectId::from_bytes([2; 32]));
        record.last_part = Some(ObjectId::from_bytes([2; 32]));
        let info = record.split_info();
        assert_eq!(info.split_id, Some(split_id));
        assert_eq!(info.last_part, Some(ObjectId::from_bytes([2; 32])));
        assert!(info.link.is_none());
        assert!(!record.is_orphaned());
    }
}
