//! K-way merge of independently sorted search pages
//!
//! Every source is a page already sorted by (primary attribute, object ID) or
//! by object ID alone, limited on its own side, with a flag saying whether
//! that source holds more. The merge returns the globally smallest `limit`
//! distinct items and a `more` flag that is exact at the boundary, so a
//! caller can page through any number of sources without gaps or repeats.
//!
//! Sources are never mutated: each one is reduced to an offset cursor and
//! winners are cloned into the output.

use crate::int::parse_int;
use crate::result::{SearchPage, SearchResultItem};
use casnode_common::{Error, ObjectId, Result};
use num_bigint::BigInt;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Upper bound on the number of distinct items the sources can produce,
/// capped at `limit`
fn max_unique_results(limit: usize, sources: &[SearchPage]) -> usize {
    let first = sources[0].items.len();
    if first >= limit {
        return limit;
    }
    let mut seen: HashSet<ObjectId> = sources[0].items.iter().map(|i| i.id).collect();
    let mut n = first;
    for source in &sources[1..] {
        let fresh: Vec<ObjectId> = source
            .items
            .iter()
            .map(|i| i.id)
            .filter(|id| !seen.contains(id))
            .collect();
        for id in fresh {
            if seen.insert(id) {
                n += 1;
                if n == limit {
                    return n;
                }
            }
        }
    }
    n
}

/// Primary attribute of every item, checked up front
///
/// With `with_attr`, a missing primary attribute is malformed; with `cmp_int`
/// a non-integer one is too. Failing here means no partial result escapes.
fn parse_primaries(
    sources: &[SearchPage],
    with_attr: bool,
    cmp_int: bool,
) -> Result<Option<Vec<Vec<BigInt>>>> {
    if !with_attr {
        return Ok(None);
    }
    let mut parsed = Vec::with_capacity(if cmp_int { sources.len() } else { 0 });
    for (source_index, source) in sources.iter().enumerate() {
        let mut ints = Vec::with_capacity(if cmp_int { source.items.len() } else { 0 });
        for item in &source.items {
            let Some(value) = item.primary() else {
                return Err(Error::MalformedAttribute {
                    source_index,
                    value: String::new(),
                });
            };
            if cmp_int {
                let n = parse_int(value).ok_or_else(|| Error::MalformedAttribute {
                    source_index,
                    value: value.to_string(),
                })?;
                ints.push(n);
            }
        }
        if cmp_int {
            parsed.push(ints);
        }
    }
    Ok(cmp_int.then_some(parsed))
}

/// Merge per-source pages into one page of at most `limit` items
///
/// - `with_attr`: items are ordered by their first attribute, then by ID;
///   otherwise by ID only.
/// - `cmp_int`: the first attribute is compared as an arbitrary-precision
///   integer instead of byte-wise. Any non-integer value fails the whole call
///   with [`Error::MalformedAttribute`].
///
/// Items sharing an object ID are one object: the first source holding it
/// wins and the others are skipped.
pub fn merge_search_results(
    limit: u16,
    with_attr: bool,
    cmp_int: bool,
    sources: &[SearchPage],
) -> Result<SearchPage> {
    if limit == 0 || sources.is_empty() {
        return Ok(SearchPage::empty());
    }
    let limit = usize::from(limit);

    if let [only] = sources {
        let n = only.items.len().min(limit);
        return Ok(SearchPage::new(
            only.items[..n].to_vec(),
            only.items.len() > n || only.more,
        ));
    }

    let ints = parse_primaries(sources, with_attr, cmp_int)?;
    let cap = max_unique_results(limit, sources);
    let any_more = sources.iter().any(|s| s.more);

    let mut heads = vec![0usize; sources.len()];
    let mut merged: Vec<SearchResultItem> = Vec::with_capacity(cap);

    let compare_attr = |a: (usize, usize), b: (usize, usize)| -> Ordering {
        match &ints {
            Some(ints) => ints[a.0][a.1].cmp(&ints[b.0][b.1]),
            None => sources[a.0].items[a.1].attributes[0]
                .as_bytes()
                .cmp(sources[b.0].items[b.1].attributes[0].as_bytes()),
        }
    };

    loop {
        let mut min: Option<usize> = None;
        for (i, source) in sources.iter().enumerate() {
            let Some(item) = source.items.get(heads[i]) else {
                continue;
            };
            let Some(m) = min else {
                min = Some(i);
                continue;
            };
            let current = &sources[m].items[heads[m]];
            let cmp_id = item.id.cmp(&current.id);
            if cmp_id == Ordering::Equal {
                continue;
            }
            if with_attr {
                let cmp_attr = compare_attr((i, heads[i]), (m, heads[m]));
                if cmp_attr != Ordering::Equal {
                    if cmp_attr == Ordering::Less {
                        min = Some(i);
                    }
                    continue;
                }
            }
            if cmp_id == Ordering::Less {
                min = Some(i);
            }
        }

        let Some(w) = min else {
            break;
        };
        let winner = &sources[w].items[heads[w]];
        merged.push(winner.clone());

        if merged.len() == cap {
            let more = heads[w] + 1 < sources[w].items.len()
                || any_more
                || sources.iter().enumerate().any(|(i, source)| {
                    i != w
                        && source.items[heads[i]..]
                            .iter()
                            .any(|item| item.id != winner.id)
                });
            return Ok(SearchPage::new(merged, more));
        }

        for (i, source) in sources.iter().enumerate() {
            if i == w {
                continue;
            }
            if let Some(pos) = source.items[heads[i]..]
                .iter()
                .position(|item| item.id == winner.id)
            {
                heads[i] += pos + 1;
            }
        }
        heads[w] += 1;
    }

    Ok(SearchPage::new(merged, any_more))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn oid(n: u8) -> ObjectId {
        let mut bytes = [0u8; 32];
        bytes[31] = n;
        ObjectId::from_bytes(bytes)
    }

    fn item(n: u8, attr: &str) -> SearchResultItem {
        SearchResultItem::new(oid(n), vec![attr.to_string()])
    }

    fn page(items: Vec<SearchResultItem>, more: bool) -> SearchPage {
        SearchPage::new(items, more)
    }

    #[test]
    fn test_empty_inputs() {
        let src = page(vec![item(1, "1")], true);
        assert_eq!(
            merge_search_results(0, true, true, &[src.clone()]).unwrap(),
            SearchPage::empty()
        );
        assert_eq!(
            merge_search_results(10, true, true, &[]).unwrap(),
            SearchPage::empty()
        );
    }

    #[test]
    fn test_single_source_truncated() {
        let items: Vec<_> = (1..=12).map(|n| item(n, &n.to_string())).collect();
        let res = merge_search_results(5, true, true, &[page(items.clone(), false)]).unwrap();
        assert_eq!(res.items, items[..5]);
        assert!(res.more);
    }

    #[test]
    fn test_single_source_flags() {
        let items: Vec<_> = (1..=3).map(|n| item(n, "a")).collect();

        let exact = merge_search_results(3, true, false, &[page(items.clone(), false)]).unwrap();
        assert_eq!(exact.len(), 3);
        assert!(!exact.more);

        let flagged = merge_search_results(10, true, false, &[page(items, true)]).unwrap();
        assert_eq!(flagged.len(), 3);
        assert!(flagged.more);
    }

    #[test]
    fn test_dedup_across_sources() {
        let a = page(vec![item(0xA, "1"), item(0xB, "2")], false);
        let b = page(vec![item(0xA, "1"), item(0xC, "3")], false);

        let res = merge_search_results(3, true, true, &[a, b]).unwrap();
        assert_eq!(res.ids(), vec![oid(0xA), oid(0xB), oid(0xC)]);
        assert!(!res.more);
    }

    #[test]
    fn test_numeric_vs_lexicographic() {
        let nine = page(vec![item(1, "9")], false);
        let ten = page(vec![item(2, "10")], false);

        let numeric = merge_search_results(2, true, true, &[ten.clone(), nine.clone()]).unwrap();
        assert_eq!(numeric.ids(), vec![oid(1), oid(2)]);

        let lexical = merge_search_results(2, true, false, &[nine, ten]).unwrap();
        assert_eq!(lexical.ids(), vec![oid(2), oid(1)]);
    }

    #[test]
    fn test_more_false_at_exact_boundary() {
        let a = page(vec![item(1, "1"), item(3, "3")], false);
        let b = page(vec![item(2, "2"), item(3, "3")], false);

        let res = merge_search_results(3, true, true, &[a, b]).unwrap();
        assert_eq!(res.ids(), vec![oid(1), oid(2), oid(3)]);
        assert!(!res.more);
    }

    #[test]
    fn test_more_when_other_source_has_leftovers() {
        let a = page(vec![item(1, "1")], false);
        let b = page(vec![item(2, "2"), item(4, "4")], false);
        let c = page(vec![item(3, "3")], false);

        let res = merge_search_results(2, true, true, &[a, b, c]).unwrap();
        assert_eq!(res.ids(), vec![oid(1), oid(2)]);
        assert!(res.more);
    }

    #[test]
    fn test_more_from_source_flag() {
        let a = page(vec![item(1, "1")], true);
        let b = page(vec![item(2, "2")], false);

        let res = merge_search_results(5, true, true, &[a, b]).unwrap();
        assert_eq!(res.len(), 2);
        assert!(res.more);
    }

    #[test]
    fn test_malformed_integer_aborts() {
        let a = page(vec![item(1, "1"), item(2, "2")], false);
        let b = page(vec![item(3, "three")], false);

        let err = merge_search_results(5, true, true, &[a, b]).unwrap_err();
        match err {
            Error::MalformedAttribute {
                source_index,
                value,
            } => {
                assert_eq!(source_index, 1);
                assert_eq!(value, "three");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_attribute_is_malformed() {
        let a = page(vec![item(1, "1")], false);
        let b = page(vec![SearchResultItem::new(oid(2), Vec::new())], false);
        assert!(matches!(
            merge_search_results(5, true, false, &[a, b]),
            Err(Error::MalformedAttribute { .. })
        ));
    }

    #[test]
    fn test_merge_by_id() {
        let a = page(
            vec![
                SearchResultItem::new(oid(1), vec![]),
                SearchResultItem::new(oid(5), vec![]),
            ],
            false,
        );
        let b = page(
            vec![
                SearchResultItem::new(oid(2), vec![]),
                SearchResultItem::new(oid(5), vec![]),
                SearchResultItem::new(oid(7), vec![]),
            ],
            false,
        );

        let res = merge_search_results(10, false, false, &[a, b]).unwrap();
        assert_eq!(res.ids(), vec![oid(1), oid(2), oid(5), oid(7)]);
        assert!(!res.more);
    }

    #[test]
    fn test_equal_attribute_falls_back_to_id() {
        let a = page(vec![item(9, "5")], false);
        let b = page(vec![item(4, "5")], false);
        let res = merge_search_results(2, true, true, &[a, b]).unwrap();
        assert_eq!(res.ids(), vec![oid(4), oid(9)]);
    }

    #[test]
    fn test_big_integers() {
        let a = page(vec![item(1, "-99999999999999999999999999999")], false);
        let b = page(vec![item(2, "99999999999999999999999999999")], false);
        let c = page(vec![item(3, "0")], false);
        let res = merge_search_results(3, true, true, &[b, c, a]).unwrap();
        assert_eq!(res.ids(), vec![oid(1), oid(3), oid(2)]);
    }

    /// Sources drawn from one consistently ordered universe must merge into
    /// the sorted distinct union, and `more` must be exact.
    #[test]
    fn test_matches_reference_merge() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let universe: Vec<(i64, SearchResultItem)> = (0..40u8)
                .map(|n| {
                    let v: i64 = rng.gen_range(-20..20);
                    (v, item(n, &v.to_string()))
                })
                .collect();
            let mut ordered = universe.clone();
            ordered.sort_by(|(va, a), (vb, b)| va.cmp(vb).then(a.id.cmp(&b.id)));

            let source_count = rng.gen_range(2..5);
            let mut sources = Vec::new();
            for _ in 0..source_count {
                let picked: Vec<SearchResultItem> = ordered
                    .iter()
                    .filter(|_| rng.gen_bool(0.4))
                    .map(|(_, it)| it.clone())
                    .collect();
                let keep = rng.gen_range(0..=picked.len());
                let more = keep < picked.len();
                sources.push(page(picked[..keep].to_vec(), more));
            }
            let limit: u16 = rng.gen_range(1..30);

            let visible: HashSet<ObjectId> = sources
                .iter()
                .flat_map(|s| s.items.iter().map(|i| i.id))
                .collect();
            let expected: Vec<ObjectId> = ordered
                .iter()
                .map(|(_, it)| it.id)
                .filter(|id| visible.contains(id))
                .collect();
            let want = expected.len().min(usize::from(limit));
            let want_more = expected.len() > usize::from(limit) || sources.iter().any(|s| s.more);

            let res = merge_search_results(limit, true, true, &sources).unwrap();
            assert_eq!(res.ids(), expected[..want].to_vec());
            assert_eq!(res.more, want_more);
        }
    }
}
