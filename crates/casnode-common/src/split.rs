//! Split chains
//!
//! [`SplitInfo`] describes how much of a split parent a node can see when it
//! cannot return the parent itself. [`split_payload`] cuts a payload into a
//! chain of children plus a link object.

use crate::error::{Error, Result};
use crate::object::{Header, Object, ObjectType, SplitHeader};
use crate::types::{ObjectId, SplitId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What is locally known about an incompletely retrievable split object
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitInfo {
    pub split_id: Option<SplitId>,
    /// Last child of the chain (the one carrying the parent header)
    pub last_part: Option<ObjectId>,
    /// Link object of the chain
    pub link: Option<ObjectId>,
}

impl SplitInfo {
    /// Fold another view of the same parent into this one
    ///
    /// Fields already set win; missing ones are filled from `other`.
    pub fn merge(&mut self, other: &Self) {
        if self.split_id.is_none() {
            self.split_id = other.split_id;
        }
        if self.last_part.is_none() {
            self.last_part = other.last_part;
        }
        if self.link.is_none() {
            self.link = other.link;
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.split_id.is_none() && self.last_part.is_none() && self.link.is_none()
    }
}

impl fmt::Display for SplitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(v: Option<&T>) -> String {
            v.map_or_else(|| "-".to_string(), ToString::to_string)
        }
        write!(
            f,
            "split_id={} last_part={} link={}",
            opt(self.split_id.as_ref()),
            opt(self.last_part.as_ref()),
            opt(self.link.as_ref())
        )
    }
}

/// Result of splitting one payload
#[derive(Clone, Debug)]
pub struct SplitChain {
    pub split_id: SplitId,
    pub parent_id: ObjectId,
    pub parent: Header,
    /// Children in payload order
    pub parts: Vec<Object>,
    pub link: Object,
}

impl SplitChain {
    /// Every stored object of the chain: children first, link last
    pub fn objects(&self) -> impl Iterator<Item = &Object> {
        self.parts.iter().chain(std::iter::once(&self.link))
    }
}

/// Split `payload` into children of at most `part_size` bytes
///
/// `parent` is committed to the full payload and becomes the logical object
/// that readers request. An empty payload still yields one (empty) child.
pub fn split_payload(mut parent: Header, payload: &[u8], part_size: usize) -> Result<SplitChain> {
    if part_size == 0 {
        return Err(Error::invalid_request("split part size must be positive"));
    }
    if parent.split.is_some() || parent.is_link() {
        return Err(Error::invalid_request("parent header must be a plain object"));
    }

    parent.set_payload(payload);
    let parent_id = parent.id()?;
    let split_id = SplitId::new();
    let container = parent.container_id;
    let epoch = parent.creation_epoch;

    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![payload]
    } else {
        payload.chunks(part_size).collect()
    };
    let last_index = chunks.len() - 1;

    let mut parts = Vec::with_capacity(chunks.len());
    let mut previous = None;
    for (i, chunk) in chunks.into_iter().enumerate() {
        let mut header = Header::new(container).with_epoch(epoch);
        header.split = Some(SplitHeader {
            split_id,
            parent_id,
            parent: (i == last_index).then(|| Box::new(parent.clone())),
            previous,
            children: Vec::new(),
        });
        let part = Object::seal(header, Bytes::copy_from_slice(chunk))?;
        previous = Some(part.id);
        parts.push(part);
    }

    let mut link_header = Header::new(container).with_epoch(epoch);
    link_header.object_type = ObjectType::Link;
    link_header.split = Some(SplitHeader {
        split_id,
        parent_id,
        parent: Some(Box::new(parent.clone())),
        previous: None,
        children: parts.iter().map(|p| p.id).collect(),
    });
    let link = Object::seal(link_header, Bytes::new())?;

    Ok(SplitChain {
        split_id,
        parent_id,
        parent,
        parts,
        link,
    })
}
