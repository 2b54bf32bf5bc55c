//! Search query model and validation

use crate::int::{is_integer, parse_int};
use casnode_common::{Error, ObjectId, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Protocol maximum for a single search page
pub const MAX_SEARCH_LIMIT: u16 = 1000;

/// Maximum number of filters in one query
pub const MAX_FILTERS: usize = 8;

/// Maximum number of attributes returned per item
pub const MAX_ATTRIBUTES: usize = 4;

/// Filter operator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchType {
    StringEqual,
    /// Matches objects whose attribute differs or is absent
    StringNotEqual,
    NotPresent,
    CommonPrefix,
    NumGT,
    NumGE,
    NumLT,
    NumLE,
}

impl MatchType {
    /// True for the numeric-relational operators
    #[must_use]
    pub const fn is_integer_search_op(self) -> bool {
        matches!(self, Self::NumGT | Self::NumGE | Self::NumLT | Self::NumLE)
    }
}

/// One attribute filter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub key: String,
    pub match_type: MatchType,
    pub value: String,
}

impl SearchFilter {
    pub fn new(key: impl Into<String>, match_type: MatchType, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            match_type,
            value: value.into(),
        }
    }
}

/// Resume position: results strictly after (primary attribute, ID)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCursor {
    /// Primary attribute value of the last returned item; `None` when the
    /// query requests no attributes
    pub primary: Option<String>,
    pub id: ObjectId,
}

/// Search request over one container
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub filters: Vec<SearchFilter>,
    /// Attributes returned with each item, in order; the first one drives
    /// ordering and must be the key of the first filter
    pub attributes: Vec<String>,
    pub limit: u16,
    pub cursor: Option<SearchCursor>,
}

impl SearchQuery {
    #[must_use]
    pub const fn new(limit: u16) -> Self {
        Self {
            filters: Vec::new(),
            attributes: Vec::new(),
            limit,
            cursor: None,
        }
    }

    #[must_use]
    pub fn filter(
        mut self,
        key: impl Into<String>,
        match_type: MatchType,
        value: impl Into<String>,
    ) -> Self {
        self.filters.push(SearchFilter::new(key, match_type, value));
        self
    }

    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>) -> Self {
        self.attributes.push(key.into());
        self
    }

    #[must_use]
    pub fn after(mut self, cursor: SearchCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Whether result items carry attributes (and are ordered by them)
    #[must_use]
    pub fn with_attributes(&self) -> bool {
        !self.attributes.is_empty()
    }

    /// Whether the primary attribute is compared as an integer
    #[must_use]
    pub fn compares_integers(&self) -> bool {
        self.with_attributes()
            && self
                .filters
                .first()
                .is_some_and(|f| f.match_type.is_integer_search_op())
    }

    /// Reject malformed queries before any storage is touched
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(Error::invalid_request("zero search limit"));
        }
        if self.limit > MAX_SEARCH_LIMIT {
            return Err(Error::invalid_request(format!(
                "search limit {} exceeds maximum {MAX_SEARCH_LIMIT}",
                self.limit
            )));
        }
        if self.filters.len() > MAX_FILTERS {
            return Err(Error::invalid_request(format!(
                "more than {MAX_FILTERS} filters"
            )));
        }
        if self.attributes.len() > MAX_ATTRIBUTES {
            return Err(Error::invalid_request(format!(
                "more than {MAX_ATTRIBUTES} attributes"
            )));
        }

        let mut seen = HashSet::with_capacity(self.attributes.len());
        for attr in &self.attributes {
            if attr.is_empty() {
                return Err(Error::invalid_request("empty attribute name"));
            }
            if !seen.insert(attr.as_str()) {
                return Err(Error::invalid_request(format!(
                    "attribute {attr:?} requested twice"
                )));
            }
        }

        for (i, filter) in self.filters.iter().enumerate() {
            if filter.key.is_empty() {
                return Err(Error::invalid_request(format!("filter #{i} has empty key")));
            }
            if filter.match_type.is_integer_search_op() && !is_integer(&filter.value) {
                return Err(Error::invalid_request(format!(
                    "filter #{i} compares against non-integer {:?}",
                    filter.value
                )));
            }
        }

        if let Some(primary) = self.attributes.first() {
            let Some(first) = self.filters.first() else {
                return Err(Error::invalid_request(
                    "attributes requested without filters",
                ));
            };
            if &first.key != primary {
                return Err(Error::invalid_request(format!(
                    "first filter key {:?} differs from primary attribute {primary:?}",
                    first.key
                )));
            }
            if first.match_type == MatchType::NotPresent {
                return Err(Error::invalid_request(
                    "primary attribute filtered as not present",
                ));
            }
        }

        if let Some(cursor) = &self.cursor {
            match (&cursor.primary, self.with_attributes()) {
                (Some(primary), true) => {
                    if self.compares_integers() && parse_int(primary).is_none() {
                        return Err(Error::invalid_request("non-integer cursor value"));
                    }
                }
                (None, false) => {}
                _ => {
                    return Err(Error::invalid_request(
                        "cursor does not match requested attributes",
                    ));
                }
            }
        }

        Ok(())
    }
}
