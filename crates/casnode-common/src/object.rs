//! Object model
//!
//! An object is an immutable header plus payload. Its ID is the SHA-256 of the
//! encoded header, and the header commits to the payload through its size and
//! checksum, so the ID covers the whole object.
//!
//! Large payloads are split into a chain of child objects sharing a
//! [`SplitId`]. The logical parent is never stored whole: its header rides on
//! the last child and on the link object, which lists every child in order.

use crate::checksum::PayloadChecksum;
use crate::error::{Error, Result};
use crate::types::{Address, Attribute, ContainerId, ObjectId, SplitId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of stored object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    /// Object carrying user payload
    #[default]
    Regular,
    /// Header-only object enumerating the children of a split parent
    Link,
}

/// Split linkage of a child or link object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitHeader {
    /// Identifier shared by the whole chain
    pub split_id: SplitId,
    /// ID of the logical parent
    pub parent_id: ObjectId,
    /// Full parent header, present on the last child and the link object
    pub parent: Option<Box<Header>>,
    /// Previous child in the chain
    pub previous: Option<ObjectId>,
    /// Ordered child list (link objects only)
    pub children: Vec<ObjectId>,
}

/// Object header
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub container_id: ContainerId,
    pub creation_epoch: u64,
    pub object_type: ObjectType,
    pub payload_size: u64,
    pub payload_checksum: PayloadChecksum,
    pub attributes: Vec<Attribute>,
    pub split: Option<SplitHeader>,
}

impl Header {
    /// Create a regular header for `container` with no payload committed yet
    #[must_use]
    pub fn new(container_id: ContainerId) -> Self {
        Self {
            container_id,
            creation_epoch: 0,
            object_type: ObjectType::Regular,
            payload_size: 0,
            payload_checksum: PayloadChecksum::compute(&[]),
            attributes: Vec::new(),
            split: None,
        }
    }

    #[must_use]
    pub const fn with_epoch(mut self, epoch: u64) -> Self {
        self.creation_epoch = epoch;
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute::new(key, value));
        self
    }

    /// Commit the header to `payload`
    pub fn set_payload(&mut self, payload: &[u8]) {
        self.payload_size = payload.len() as u64;
        self.payload_checksum = PayloadChecksum::compute(payload);
    }

    /// Encoded header bytes (the input of the object ID)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Object ID derived from this header
    pub fn id(&self) -> Result<ObjectId> {
        Ok(ObjectId::from_bytes(Sha256::digest(self.to_bytes()?).into()))
    }

    /// Value of the first attribute named `key`
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }

    /// ID of the logical parent, for split children and link objects
    #[must_use]
    pub fn parent_id(&self) -> Option<ObjectId> {
        self.split.as_ref().map(|s| s.parent_id)
    }

    /// Full parent header, when this object carries it
    #[must_use]
    pub fn parent_header(&self) -> Option<&Header> {
        self.split.as_ref().and_then(|s| s.parent.as_deref())
    }

    #[must_use]
    pub fn is_link(&self) -> bool {
        self.object_type == ObjectType::Link
    }

    /// Check the split linkage for internal consistency
    pub fn verify_split(&self) -> Result<()> {
        let Some(split) = &self.split else {
            if self.is_link() {
                return Err(Error::invalid_object("link object without split header"));
            }
            return Ok(());
        };
        if let Some(parent) = &split.parent {
            if parent.id()? != split.parent_id {
                return Err(Error::invalid_object(
                    "parent header does not match parent ID",
                ));
            }
            if parent.container_id != self.container_id {
                return Err(Error::invalid_object("parent belongs to another container"));
            }
        }
        if self.is_link() {
            if split.children.is_empty() {
                return Err(Error::invalid_object("link object lists no children"));
            }
            if self.payload_size != 0 {
                return Err(Error::invalid_object("link object carries payload"));
            }
        } else if !split.children.is_empty() {
            return Err(Error::invalid_object("only link objects list children"));
        }
        Ok(())
    }
}

/// Immutable object: ID, header and payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    pub id: ObjectId,
    pub header: Header,
    pub payload: Bytes,
}

impl Object {
    /// Commit `header` to `payload` and derive the object ID
    pub fn seal(mut header: Header, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        header.set_payload(&payload);
        Ok(Self {
            id: header.id()?,
            header,
            payload,
        })
    }

    /// Assemble an object from already-sealed parts without checking them
    #[must_use]
    pub const fn from_parts(id: ObjectId, header: Header, payload: Bytes) -> Self {
        Self {
            id,
            header,
            payload,
        }
    }

    #[must_use]
    pub const fn address(&self) -> Address {
        Address::new(self.header.container_id, self.id)
    }

    /// Check ID, payload size, payload checksum and split linkage
    pub fn verify(&self) -> Result<()> {
        if self.header.id()? != self.id {
            return Err(Error::invalid_object(format!(
                "ID {} does not match header",
                self.id
            )));
        }
        if self.header.payload_size != self.payload.len() as u64 {
            return Err(Error::invalid_object(format!(
                "payload size {} does not match header size {}",
                self.payload.len(),
                self.header.payload_size
            )));
        }
        if !self.header.payload_checksum.verify(&self.payload) {
            return Err(Error::ChecksumMismatch {
                expected: format!("{:?}", self.header.payload_checksum),
                actual: format!("{:?}", PayloadChecksum::compute(&self.payload)),
            });
        }
        self.header.verify_split()
    }

    /// Encode the whole object (header and payload)
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode an object produced by [`Object::encode`]
    pub fn decode(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| Error::Deserialization(e.to_string()))
    }
}
