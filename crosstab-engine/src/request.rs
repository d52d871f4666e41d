//! FILENAME: crosstab-engine/src/request.rs
//! Request Mapper - tells the data engine what a rebuild is about to read.
//!
//! Before the trees are built, `plan_prefetch` collects the levels whose
//! members must be materialized (the outermost level of each axis plus every
//! level reachable through drill records) and one request per drill record
//! and opposite-axis level placed before the record's level. After the build, `grid_requests` summarizes the
//! grains the grid touches, with one level of lookahead for the next drill.

use std::collections::BTreeSet;

use rustc_hash::FxHashSet;

use cube::{CubeSchema, DataRequest, LevelId, MemberId};

use crate::definition::{Axis, CrossTabLayout};
use crate::drill::DrillRegistry;
use crate::error::CrossTabError;
use crate::node::{NodeKind, NodeTree};

/// What to fetch before building.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prefetch {
    /// Levels whose members the builder will enumerate.
    pub levels: Vec<LevelId>,
    pub requests: Vec<DataRequest>,
}

/// Visible levels of every hierarchy on a grid axis.
fn axis_levels(schema: &CubeSchema, layout: &CrossTabLayout, axis: Axis) -> Result<Vec<LevelId>, CrossTabError> {
    let mut levels = Vec::new();
    for placed in layout.axis_hierarchies(axis) {
        levels.extend(layout.visible_levels(schema, placed.hierarchy)?);
    }
    Ok(levels)
}

pub fn plan_prefetch(
    schema: &CubeSchema,
    layout: &CrossTabLayout,
    registry: &DrillRegistry,
) -> Result<Prefetch, CrossTabError> {
    let mut levels = Vec::new();
    let mut seen: FxHashSet<LevelId> = FxHashSet::default();
    for axis in [Axis::Row, Axis::Column] {
        if let Some(&first) = axis_levels(schema, layout, axis)?.first() {
            if seen.insert(first) {
                levels.push(first);
            }
        }
    }

    // Close over drill records: a record is reachable once its ParentLevel is.
    loop {
        let mut changed = false;
        for r in registry.records() {
            if seen.contains(&r.parent_level) && seen.insert(r.level) {
                levels.push(r.level);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let page_members = layout.page_members();
    let mut requests = BTreeSet::new();
    for r in registry.records().iter().filter(|r| seen.contains(&r.parent_level)) {
        let Some(axis) = schema.level(r.level).and_then(|l| layout.axis_of(l.hierarchy)) else {
            continue;
        };
        let position = axis_levels(schema, layout, axis)?
            .iter()
            .position(|&l| l == r.level)
            .unwrap_or(0);
        let path: Vec<MemberId> = page_members.iter().chain(r.path.iter()).copied().collect();
        requests.insert(DataRequest::new(path.iter().copied(), [r.level]));
        for opposite in axis_levels(schema, layout, axis.opposite())?.into_iter().take(position) {
            let Some(&first) = schema.level(opposite).and_then(|l| l.members.first()) else {
                continue;
            };
            requests.insert(DataRequest::new(
                path.iter().copied().chain(std::iter::once(first)),
                [r.level, opposite],
            ));
        }
    }

    Ok(Prefetch {
        levels,
        requests: requests.into_iter().collect(),
    })
}

/// Levels of the non-measure member nodes of a tree, plus the level after
/// each one on the axis.
fn grain_levels(schema: &CubeSchema, tree: &NodeTree) -> FxHashSet<LevelId> {
    let is_measure = |level: LevelId| {
        schema
            .level(level)
            .and_then(|l| schema.hierarchy(l.hierarchy))
            .map_or(false, |h| h.is_measures)
    };
    let mut out = FxHashSet::default();
    for node in tree.nodes().filter(|n| n.kind == NodeKind::Member) {
        let Some(al) = node.axis_level else {
            continue;
        };
        for level in tree.levels.get(al).into_iter().chain(tree.levels.get(al + 1)) {
            if !is_measure(level.level) {
                out.insert(level.level);
            }
        }
    }
    out
}

/// Grains touched by the built grid, deduplicated and sorted.
pub fn grid_requests(
    schema: &CubeSchema,
    layout: &CrossTabLayout,
    rows: &NodeTree,
    columns: &NodeTree,
) -> Vec<DataRequest> {
    let page_members = layout.page_members();
    let row_levels = grain_levels(schema, rows);
    let column_levels = grain_levels(schema, columns);

    let mut requests: FxHashSet<DataRequest> = FxHashSet::default();
    requests.insert(DataRequest::new(page_members.iter().copied(), std::iter::empty()));
    for &r in &row_levels {
        requests.insert(DataRequest::new(page_members.iter().copied(), [r]));
        for &c in &column_levels {
            requests.insert(DataRequest::new(page_members.iter().copied(), [r, c]));
        }
    }
    for &c in &column_levels {
        requests.insert(DataRequest::new(page_members.iter().copied(), [c]));
    }

    let mut out: Vec<DataRequest> = requests.into_iter().collect();
    out.sort();
    out
}
