//! Filter evaluation over object headers
//!
//! [`select`] is the single place where a [`SearchQuery`] is applied to a set
//! of headers, so every tier that answers searches orders and limits its
//! results the same way. That is what makes per-tier pages mergeable.

use crate::int::parse_int;
use crate::query::{MatchType, SearchCursor, SearchFilter, SearchQuery};
use crate::result::{SearchPage, SearchResultItem};
use casnode_common::{Header, ObjectId, ObjectType, Result};
use num_bigint::BigInt;
use std::borrow::Cow;

/// Payload length in bytes
pub const ATTR_PAYLOAD_LENGTH: &str = "$Object:payloadLength";
/// Creation epoch
pub const ATTR_CREATION_EPOCH: &str = "$Object:creationEpoch";
/// `REGULAR` or `LINK`
pub const ATTR_OBJECT_TYPE: &str = "$Object:objectType";
/// Split ID of a chain member
pub const ATTR_SPLIT_ID: &str = "$Object:split.splitID";
/// Parent ID of a chain member
pub const ATTR_SPLIT_PARENT: &str = "$Object:split.parent";

/// Value of `key` for `header`, including the `$Object:` header fields
#[must_use]
pub fn header_attribute<'a>(header: &'a Header, key: &str) -> Option<Cow<'a, str>> {
    match key {
        ATTR_PAYLOAD_LENGTH => Some(Cow::Owned(header.payload_size.to_string())),
        ATTR_CREATION_EPOCH => Some(Cow::Owned(header.creation_epoch.to_string())),
        ATTR_OBJECT_TYPE => Some(Cow::Borrowed(match header.object_type {
            ObjectType::Regular => "REGULAR",
            ObjectType::Link => "LINK",
        })),
        ATTR_SPLIT_ID => header
            .split
            .as_ref()
            .map(|s| Cow::Owned(s.split_id.to_string())),
        ATTR_SPLIT_PARENT => header.parent_id().map(|id| Cow::Owned(id.to_string())),
        _ => header.attribute(key).map(Cow::Borrowed),
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Primary {
    None,
    Str(String),
    Int(BigInt),
}

struct CompiledFilter<'q> {
    filter: &'q SearchFilter,
    int_value: Option<BigInt>,
}

impl CompiledFilter<'_> {
    fn matches(&self, header: &Header) -> bool {
        let value = header_attribute(header, &self.filter.key);
        match self.filter.match_type {
            MatchType::StringEqual => value.is_some_and(|v| v == self.filter.value),
            MatchType::StringNotEqual => value.is_none_or(|v| v != self.filter.value),
            MatchType::NotPresent => value.is_none(),
            MatchType::CommonPrefix => value.is_some_and(|v| v.starts_with(&self.filter.value)),
            op => {
                let (Some(v), Some(bound)) = (value, self.int_value.as_ref()) else {
                    return false;
                };
                let Some(v) = parse_int(&v) else {
                    return false;
                };
                match op {
                    MatchType::NumGT => &v > bound,
                    MatchType::NumGE => &v >= bound,
                    MatchType::NumLT => &v < bound,
                    _ => &v <= bound,
                }
            }
        }
    }
}

fn primary_key(value: Option<&str>, numeric: bool) -> Primary {
    match value {
        None => Primary::None,
        Some(v) if numeric => parse_int(v).map_or(Primary::None, Primary::Int),
        Some(v) => Primary::Str(v.to_string()),
    }
}

/// Evaluate `query` over `candidates` and return one sorted, limited page
///
/// Ordering is by the primary attribute (numeric when the first filter is an
/// integer operator) then by object ID; without requested attributes it is by
/// object ID alone. `more` reports matches beyond the limit.
pub fn select<'a, I>(query: &SearchQuery, candidates: I) -> Result<SearchPage>
where
    I: IntoIterator<Item = (ObjectId, &'a Header)>,
{
    query.validate()?;

    let filters: Vec<CompiledFilter<'_>> = query
        .filters
        .iter()
        .map(|filter| CompiledFilter {
            filter,
            int_value: filter
                .match_type
                .is_integer_search_op()
                .then(|| parse_int(&filter.value))
                .flatten(),
        })
        .collect();
    let numeric = query.compares_integers();

    let mut hits: Vec<(Primary, SearchResultItem)> = candidates
        .into_iter()
        .filter(|(_, header)| filters.iter().all(|f| f.matches(header)))
        .map(|(id, header)| {
            let attributes: Vec<String> = query
                .attributes
                .iter()
                .map(|key| header_attribute(header, key).map_or_else(String::new, Cow::into_owned))
                .collect();
            let item = SearchResultItem::new(id, attributes);
            (primary_key(item.primary(), numeric), item)
        })
        .collect();

    hits.sort_by(|(ka, a), (kb, b)| ka.cmp(kb).then_with(|| a.id.cmp(&b.id)));

    if let Some(SearchCursor { primary, id }) = &query.cursor {
        let cursor_key = primary_key(primary.as_deref(), numeric);
        hits.retain(|(key, item)| (key, &item.id) > (&cursor_key, id));
    }

    let limit = usize::from(query.limit);
    let more = hits.len() > limit;
    let items = hits.into_iter().take(limit).map(|(_, item)| item).collect();
    Ok(SearchPage::new(items, more))
}
