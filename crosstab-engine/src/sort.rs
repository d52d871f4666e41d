//! FILENAME: crosstab-engine/src/sort.rs
//! Value Sorter - orders row siblings by the values of one data column.
//!
//! Every sibling list of the row tree is sorted independently. Totals and
//! pagers stay pinned at the ends, measure lists keep their natural order,
//! and a list whose values cannot be fetched is left untouched.

use std::cmp::Ordering;

use log::{debug, warn};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use cube::{CubeAddress, CubeSchema, CubeSource};

use crate::error::CrossTabError;
use crate::node::{NodeId, NodeKind, NodeTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// The data column rows are sorted by, identified by the unique names of
/// its column path so it survives rebuilds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSelection {
    pub column: Vec<String>,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Unique names along a node's member path.
pub fn path_names(schema: &CubeSchema, tree: &NodeTree, id: NodeId) -> Vec<String> {
    tree.path(id)
        .iter()
        .filter_map(|&m| schema.member(m))
        .map(|m| m.unique_name.clone())
        .collect()
}

/// Finds the column owning the selected path.
pub fn resolve_column(schema: &CubeSchema, columns: &NodeTree, selection: &SortSelection) -> Option<NodeId> {
    columns
        .line_owners()
        .into_iter()
        .find(|&id| path_names(schema, columns, id) == selection.column)
}

/// Ordering of two siblings. Siblings with a value come first; ties and
/// siblings without a value are ordered by caption in the same direction.
pub fn compare_entries(
    a: (Option<f64>, &str),
    b: (Option<f64>, &str),
    direction: SortDirection,
) -> Ordering {
    let directed = |o: Ordering| match direction {
        SortDirection::Ascending => o,
        SortDirection::Descending => o.reverse(),
    };
    match (a.0, b.0) {
        (Some(x), Some(y)) => directed(x.total_cmp(&y).then_with(|| a.1.cmp(b.1))),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => directed(a.1.cmp(b.1)),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    pub sorted: usize,
    pub skipped: usize,
}

/// Sorts every sibling list of `rows` by the column at `column_address`.
/// Sibling orders are renumbered; positions must be recomputed afterwards.
pub fn sort_rows(
    source: &mut dyn CubeSource,
    rows: &mut NodeTree,
    page_slice: &CubeAddress,
    column_address: &CubeAddress,
    direction: SortDirection,
) -> Result<SortStats, CrossTabError> {
    let base = page_slice.merged(source.schema(), column_address)?;
    let mut memo: FxHashMap<NodeId, Option<f64>> = FxHashMap::default();
    let mut stats = SortStats::default();

    let parents: Vec<NodeId> = rows
        .preorder()
        .into_iter()
        .filter(|&id| rows.node(id).map_or(false, |n| !n.is_leaf()))
        .collect();

    for parent in parents {
        let Some(children) = rows.node(parent).map(|n| n.children.clone()) else {
            continue;
        };
        let pinned = |id: &NodeId| rows.node(*id).map_or(true, |n| n.is_pinned());
        let lo = children.iter().take_while(|id| pinned(*id)).count();
        let hi = children.len() - children[lo..].iter().rev().take_while(|id| pinned(*id)).count();
        if hi - lo < 2 {
            continue;
        }
        let range: Vec<NodeId> = children[lo..hi].to_vec();

        let has_measures = {
            let schema = source.schema();
            range.iter().any(|&id| {
                rows.node(id)
                    .and_then(|n| n.member)
                    .and_then(|m| schema.member(m))
                    .map_or(false, |m| m.kind.is_pseudo())
            })
        };
        if has_measures {
            continue;
        }

        let missing: Vec<NodeId> = range.iter().copied().filter(|id| !memo.contains_key(id)).collect();
        if !missing.is_empty() {
            let addresses = {
                let schema = source.schema();
                let mut addresses = Vec::with_capacity(missing.len());
                for &id in &missing {
                    let mut address = base.clone();
                    for m in rows.path(id) {
                        address.push(schema, m)?;
                    }
                    addresses.push(address);
                }
                addresses
            };
            match source.values(&addresses) {
                Ok(values) => {
                    for (id, value) in missing.iter().zip(values) {
                        memo.insert(*id, value.as_number().filter(|v| !v.is_nan()));
                    }
                }
                Err(e) => {
                    warn!("sort values unavailable, keeping natural order: {}", e);
                    stats.skipped += 1;
                    continue;
                }
            }
        }

        let mut sorted = range.clone();
        sorted.sort_by(|&a, &b| {
            let entry = |id: NodeId| {
                let value = memo.get(&id).copied().flatten();
                let caption = rows.node(id).map_or("", |n| n.caption.as_str());
                (value, caption)
            };
            compare_entries(entry(a), entry(b), direction)
        });

        let mut order = 0;
        for &id in &sorted {
            if let Some(node) = rows.node_mut(id) {
                if node.kind == NodeKind::Member {
                    node.sibling_order = order;
                    order += 1;
                }
            }
        }
        if let Some(node) = rows.node_mut(parent) {
            node.children.splice(lo..hi, sorted);
        }
        stats.sorted += 1;
    }

    debug!("sorted {} sibling lists ({} skipped)", stats.sorted, stats.skipped);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_ascending_and_descending() {
        let a = (Some(1.0), "b");
        let b = (Some(2.0), "a");
        assert_eq!(compare_entries(a, b, SortDirection::Ascending), Ordering::Less);
        assert_eq!(compare_entries(a, b, SortDirection::Descending), Ordering::Greater);
    }

    #[test]
    fn test_compare_ties_fall_back_to_caption() {
        let a = (Some(5.0), "Apples");
        let b = (Some(5.0), "Pears");
        assert_eq!(compare_entries(a, b, SortDirection::Ascending), Ordering::Less);
        assert_eq!(compare_entries(a, b, SortDirection::Descending), Ordering::Greater);
    }

    #[test]
    fn test_missing_values_go_last() {
        let valued = (Some(-3.0), "Zucchini");
        let empty = (None, "Apples");
        assert_eq!(compare_entries(valued, empty, SortDirection::Ascending), Ordering::Less);
        assert_eq!(compare_entries(valued, empty, SortDirection::Descending), Ordering::Less);
        assert_eq!(
            compare_entries((None, "A"), (None, "B"), SortDirection::Descending),
            Ordering::Greater
        );
    }
}
