//! Search result types

use casnode_common::ObjectId;
use serde::{Deserialize, Serialize};

/// One search hit: object ID and the requested attribute values in order
///
/// Values are always strings, even when they are compared numerically. An
/// attribute the object lacks is returned as an empty string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub id: ObjectId,
    pub attributes: Vec<String>,
}

impl SearchResultItem {
    #[must_use]
    pub const fn new(id: ObjectId, attributes: Vec<String>) -> Self {
        Self { id, attributes }
    }

    /// Value that drives ordering, if any attribute was requested
    #[must_use]
    pub fn primary(&self) -> Option<&str> {
        self.attributes.first().map(String::as_str)
    }
}

/// A sorted, limited result sequence plus whether more results exist
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    pub items: Vec<SearchResultItem>,
    pub more: bool,
}

impl SearchPage {
    #[must_use]
    pub const fn new(items: Vec<SearchResultItem>, more: bool) -> Self {
        Self { items, more }
    }

    #[must_use]
    pub const fn empty() -> Self {
        Self {
            items: Vec::new(),
            more: false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Object IDs of the page, in order
    #[must_use]
    pub fn ids(&self) -> Vec<ObjectId> {
        self.items.iter().map(|i| i.id).collect()
    }
}
