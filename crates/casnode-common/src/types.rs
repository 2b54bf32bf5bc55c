//! Core type definitions for casnode
//!
//! Identifiers, addresses and small enums shared by every tier.

use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of container and object identifiers in bytes
pub const ID_LEN: usize = 32;

/// Errors produced when parsing identifiers and addresses from text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdParseError {
    #[error("identifier must be {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("identifier is not valid hex")]
    InvalidHex,
    #[error("address must have the form <container>/<object>")]
    MissingSeparator,
    #[error("split ID is not a valid UUID")]
    InvalidSplitId,
}

fn decode_id(s: &str) -> Result<[u8; ID_LEN], IdParseError> {
    if s.len() != ID_LEN * 2 {
        return Err(IdParseError::InvalidLength {
            expected: ID_LEN * 2,
            actual: s.len(),
        });
    }
    let mut out = [0u8; ID_LEN];
    hex::decode_to_slice(s, &mut out).map_err(|_| IdParseError::InvalidHex)?;
    Ok(out)
}

/// Identifier of a container (a namespace of objects)
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize, From, Into,
)]
pub struct ContainerId([u8; ID_LEN]);

impl ContainerId {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Generate a random container ID
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; ID_LEN];
        bytes[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        bytes[16..].copy_from_slice(Uuid::new_v4().as_bytes());
        Self(bytes)
    }
}

impl fmt::Debug for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerId({self})")
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContainerId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_id(s).map(Self)
    }
}

/// Identifier of an object: the SHA-256 of its encoded header
///
/// Ordering is byte-wise, which is the tiebreak order for search results.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize, From, Into,
)]
pub struct ObjectId([u8; ID_LEN]);

impl ObjectId {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// True for the all-zero ID
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ObjectId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_id(s).map(Self)
    }
}

/// Address of an object: container plus object ID
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pub container: ContainerId,
    pub object: ObjectId,
}

impl Address {
    #[must_use]
    pub const fn new(container: ContainerId, object: ObjectId) -> Self {
        Self { container, object }
    }

    /// Address as a flat byte string (container bytes then object bytes)
    #[must_use]
    pub fn to_key_bytes(&self) -> [u8; ID_LEN * 2] {
        let mut out = [0u8; ID_LEN * 2];
        out[..ID_LEN].copy_from_slice(self.container.as_bytes());
        out[ID_LEN..].copy_from_slice(self.object.as_bytes());
        out
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.object)
    }
}

impl FromStr for Address {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cnr, obj) = s.split_once('/').ok_or(IdParseError::MissingSeparator)?;
        Ok(Self {
            container: cnr.parse()?,
            object: obj.parse()?,
        })
    }
}

/// Identifier shared by every part of one split chain
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into)]
pub struct SplitId(Uuid);

impl SplitId {
    /// Generate a new random split ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SplitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SplitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SplitId({})", self.0)
    }
}

impl fmt::Display for SplitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SplitId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| IdParseError::InvalidSplitId)
    }
}

/// A single key/value attribute attached to an object header
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Storage tier of a shard, used to tag errors and log lines
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    WriteBuffer,
    MetadataIndex,
    BlobStore,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WriteBuffer => "write buffer",
            Self::MetadataIndex => "metabase",
            Self::BlobStore => "blobstore",
        };
        f.write_str(name)
    }
}

/// Operating mode of a shard
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

impl ShardMode {
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_hex_roundtrip() {
        let id = ObjectId::from_bytes([0xab; ID_LEN]);
        let text = id.to_string();
        assert_eq!(text.len(), 64);
        assert!(text.starts_with("abab"));
        assert_eq!(text.parse::<ObjectId>().unwrap(), id);
    }

    #[test]
    fn test_object_id_ordering_is_bytewise() {
        let mut low = [0u8; ID_LEN];
        let mut high = [0u8; ID_LEN];
        low[0] = 1;
        high[0] = 2;
        high[31] = 0;
        low[31] = 0xff;
        assert!(ObjectId::from_bytes(low) < ObjectId::from_bytes(high));
    }

    #[test]
    fn test_address_parse() {
        let addr = Address::new(ContainerId::random(), ObjectId::from_bytes([7; ID_LEN]));
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(parsed, addr);

        assert_eq!(
            "abc".parse::<Address>().unwrap_err(),
            IdParseError::MissingSeparator
        );
        assert!(matches!(
            "ab/cd".parse::<Address>().unwrap_err(),
            IdParseError::InvalidLength { .. }
        ));
    }

    #[test]
    fn test_invalid_hex() {
        let bad = "zz".repeat(ID_LEN);
        assert_eq!(bad.parse::<ObjectId>().unwrap_err(), IdParseError::InvalidHex);
    }

    #[test]
    fn test_zero_id() {
        assert!(ObjectId::default().is_zero());
        assert!(!ObjectId::from_bytes([1; ID_LEN]).is_zero());
    }

    #[test]
    fn test_split_id_parse() {
        let id = SplitId::new();
        assert_eq!(id.to_string().parse::<SplitId>().unwrap(), id);
        assert!("nope".parse::<SplitId>().is_err());
    }
}
