//! casnode Search - attribute search and result merging
//!
//! [`select`] evaluates a [`SearchQuery`] over object headers and produces a
//! sorted, limited [`SearchPage`]. [`merge_search_results`] combines pages
//! produced independently (by the tiers of one shard, by several shards, or
//! by remote nodes) into one globally ordered page.

pub mod int;
pub mod merge;
pub mod query;
pub mod result;
pub mod select;

pub use int::{is_integer, parse_int};
pub use merge::merge_search_results;
pub use query::{
    MAX_ATTRIBUTES, MAX_FILTERS, MAX_SEARCH_LIMIT, MatchType, SearchCursor, SearchFilter,
    SearchQuery,
};
pub use result::{SearchPage, SearchResultItem};
pub use select::{header_attribute, select};
