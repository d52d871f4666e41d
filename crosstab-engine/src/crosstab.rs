//! FILENAME: crosstab-engine/src/crosstab.rs
//! The cross-tab itself: rebuild orchestration and user operations.
//!
//! A rebuild runs the stages in order:
//! 1. Plan and fetch members for the drilled levels, optimize the registry.
//! 2. Build the row and column trees.
//! 3. Submit the grid's data requests.
//! 4. Size and measure both strips, sort rows, place both strips.
//! 5. Fetch the data values and set up paging.
//!
//! The new generation replaces the old one only when every stage succeeds.
//! Operations that change the session (drill, collapse, sort, layout) trigger
//! a rebuild unless they happen inside a `begin_update`/`end_update` bracket,
//! in which case a single rebuild runs when the outermost bracket closes.

use std::rc::Rc;

use log::{debug, info, warn};
use rustc_hash::FxHashMap;

use cube::{CubeAddress, CubeSource, LevelId};

use crate::builder::{build_axis, BuildInput};
use crate::cell::{Cell, CellKind, Generation};
use crate::definition::{Axis, CrossTabLayout};
use crate::drill::DrillMethod;
use crate::error::CrossTabError;
use crate::host::CrossTabHost;
use crate::node::{NodeId, NodeKind, NodeTree, OutputNode};
use crate::paging::page_key;
use crate::request::{grid_requests, plan_prefetch};
use crate::session::SessionState;
use crate::sort::{path_names, resolve_column, sort_rows, SortDirection, SortSelection};
use crate::span;

/// What a rebuild reads and writes besides the cross-tab itself.
pub struct CrossTabContext<'a> {
    pub source: &'a mut dyn CubeSource,
    pub session: &'a mut SessionState,
    pub host: &'a dyn CrossTabHost,
}

impl<'a> CrossTabContext<'a> {
    pub fn new(
        source: &'a mut dyn CubeSource,
        session: &'a mut SessionState,
        host: &'a dyn CrossTabHost,
    ) -> Self {
        CrossTabContext { source, session, host }
    }
}

#[derive(Debug, Default)]
pub struct CrossTab {
    layout: CrossTabLayout,
    generation: Option<Generation>,
    update_depth: u32,
    rebuild_pending: bool,
    /// Session JSON of the last successful rebuild.
    last_good: Option<String>,
    next_generation: u64,
}

impl CrossTab {
    pub fn new(layout: CrossTabLayout) -> Self {
        CrossTab {
            layout,
            ..CrossTab::default()
        }
    }

    pub fn layout(&self) -> &CrossTabLayout {
        &self.layout
    }

    pub fn set_layout(&mut self, ctx: &mut CrossTabContext<'_>, layout: CrossTabLayout) -> Result<(), CrossTabError> {
        self.layout = layout;
        self.request_rebuild(ctx)
    }

    pub fn generation(&self) -> Option<&Generation> {
        self.generation.as_ref()
    }

    pub fn is_built(&self) -> bool {
        self.generation.is_some()
    }

    pub fn last_good_snapshot(&self) -> Option<&str> {
        self.last_good.as_deref()
    }

    fn built(&self) -> Result<&Generation, CrossTabError> {
        self.generation.as_ref().ok_or(CrossTabError::NotBuilt)
    }

    // ========================================================================
    // UPDATE BRACKET
    // ========================================================================

    pub fn begin_update(&mut self, ctx: &mut CrossTabContext<'_>) {
        self.update_depth += 1;
        ctx.session.drills.begin_batch();
    }

    /// Closes an update bracket; the outermost close runs the pending rebuild.
    pub fn end_update(&mut self, ctx: &mut CrossTabContext<'_>) -> Result<(), CrossTabError> {
        if self.update_depth == 0 {
            return Ok(());
        }
        self.update_depth -= 1;
        ctx.session.drills.end_batch();
        if self.update_depth == 0 && self.rebuild_pending {
            self.rebuild(ctx)
        } else {
            Ok(())
        }
    }

    pub fn is_updating(&self) -> bool {
        self.update_depth > 0
    }

    fn request_rebuild(&mut self, ctx: &mut CrossTabContext<'_>) -> Result<(), CrossTabError> {
        if self.update_depth > 0 {
            self.rebuild_pending = true;
            Ok(())
        } else {
            self.rebuild(ctx)
        }
    }

    // ========================================================================
    // REBUILD
    // ========================================================================

    /// Rebuilds the grid. On failure the host is notified and the previous
    /// generation stays in place.
    pub fn rebuild(&mut self, ctx: &mut CrossTabContext<'_>) -> Result<(), CrossTabError> {
        if self.update_depth > 0 {
            self.rebuild_pending = true;
            return Ok(());
        }
        self.rebuild_pending = false;

        match self.build_generation(ctx) {
            Ok(generation) => {
                info!(
                    "cross-tab generation {}: {} x {} cells",
                    generation.id,
                    generation.column_count(),
                    generation.row_count()
                );
                self.last_good = ctx.session.to_json(ctx.source.schema()).ok();
                self.generation = Some(generation);
                Ok(())
            }
            Err(err) => {
                ctx.host.on_rebuild_error(&err, self.last_good.as_deref());
                Err(err)
            }
        }
    }

    fn build_generation(&mut self, ctx: &mut CrossTabContext<'_>) -> Result<Generation, CrossTabError> {
        // Members first: the optimizer compares drilled counts with level sizes.
        let plan = plan_prefetch(ctx.source.schema(), &self.layout, &ctx.session.drills)?;
        for &level in &plan.levels {
            ctx.source.ensure_members(level)?;
        }
        ctx.session.drills.optimize(ctx.source.schema(), &self.layout);
        let plan = plan_prefetch(ctx.source.schema(), &self.layout, &ctx.session.drills)?;
        for &level in &plan.levels {
            ctx.source.ensure_members(level)?;
        }
        debug!("prefetch: {} levels, {} requests", plan.levels.len(), plan.requests.len());
        if !plan.requests.is_empty() {
            ctx.source.submit(&plan.requests)?;
        }

        let page_slice = CubeAddress::build(ctx.source.schema(), self.layout.page_members())?;
        let (mut rows, mut columns) = {
            let index = ctx.session.drills.index();
            let input = BuildInput {
                layout: &self.layout,
                drills: &index,
                pages: &ctx.session.pages,
                page_slice: &page_slice,
                host: ctx.host,
            };
            let rows = build_axis(&mut *ctx.source, &input, Axis::Row)?;
            let columns = build_axis(&mut *ctx.source, &input, Axis::Column)?;
            (rows, columns)
        };

        let requests = grid_requests(ctx.source.schema(), &self.layout, &rows, &columns);
        debug!("grid requests: {}", requests.len());
        ctx.source.submit(&requests)?;

        for tree in [&mut rows, &mut columns] {
            span::size_strip(tree);
            span::measure(tree);
        }

        let sort_column = match ctx.session.sort.clone() {
            Some(selection) => self.apply_sort(ctx, selection, &mut rows, &columns, &page_slice)?,
            None => None,
        };

        span::place(&mut rows);
        span::place(&mut columns);

        let (addresses, values, comments) = fetch_values(ctx, &rows, &columns, &page_slice)?;

        self.next_generation += 1;
        Ok(Generation::new(
            self.next_generation,
            rows,
            columns,
            addresses,
            values,
            comments,
            sort_column,
        ))
    }

    fn apply_sort(
        &self,
        ctx: &mut CrossTabContext<'_>,
        selection: SortSelection,
        rows: &mut NodeTree,
        columns: &NodeTree,
        page_slice: &CubeAddress,
    ) -> Result<Option<NodeId>, CrossTabError> {
        let Some(column) = resolve_column(ctx.source.schema(), columns, &selection) else {
            warn!("sort column {:?} not on the grid, rows keep natural order", selection.column);
            return Ok(None);
        };
        let address = CubeAddress::build(ctx.source.schema(), columns.path(column))?;
        sort_rows(&mut *ctx.source, rows, page_slice, &address, selection.direction)?;
        Ok(Some(column))
    }

    // ========================================================================
    // DRILL OPERATIONS
    // ========================================================================

    fn member_node(&self, axis: Axis, node: NodeId) -> Result<&OutputNode, CrossTabError> {
        let generation = self.built()?;
        let found = generation
            .tree(axis)
            .and_then(|t| t.node(node))
            .ok_or(CrossTabError::UnknownNode { axis, node })?;
        if found.kind != NodeKind::Member {
            return Err(CrossTabError::InvalidDrill(format!(
                "node {} on the {:?} axis is not a member",
                node, axis
            )));
        }
        Ok(found)
    }

    /// Expands a member node with one of its available drills.
    pub fn drill(
        &mut self,
        ctx: &mut CrossTabContext<'_>,
        axis: Axis,
        node: NodeId,
        method: DrillMethod,
    ) -> Result<(), CrossTabError> {
        let (parent_level, level, path) = {
            let found = self.member_node(axis, node)?;
            let option = found
                .drills
                .iter()
                .find(|o| o.method == method)
                .ok_or_else(|| CrossTabError::InvalidDrill(format!("{:?} is not available on node {}", method, node)))?;
            let member = found.member.ok_or(CrossTabError::UnknownNode { axis, node })?;
            let parent_level = ctx.source.schema().try_member(member)?.level;
            let path = self.built()?.tree(axis).map(|t| t.path(node)).unwrap_or_default();
            (parent_level, option.level, path)
        };
        ctx.session.drills.drill(ctx.source.schema(), parent_level, level, &path)?;
        self.request_rebuild(ctx)
    }

    pub fn collapse(&mut self, ctx: &mut CrossTabContext<'_>, axis: Axis, node: NodeId) -> Result<(), CrossTabError> {
        let (parent_level, path) = {
            let found = self.member_node(axis, node)?;
            let member = found.member.ok_or(CrossTabError::UnknownNode { axis, node })?;
            let parent_level = ctx.source.schema().try_member(member)?.level;
            let path = self.built()?.tree(axis).map(|t| t.path(node)).unwrap_or_default();
            (parent_level, path)
        };
        ctx.session.drills.collapse(parent_level, &path);
        self.request_rebuild(ctx)
    }

    /// Expands every member of `level`. Parent-child expansion records each
    /// currently shown member explicitly.
    pub fn expand_all(
        &mut self,
        ctx: &mut CrossTabContext<'_>,
        level: LevelId,
        method: DrillMethod,
    ) -> Result<(), CrossTabError> {
        let generation = self.built()?;
        let (axis, tree) = [Axis::Row, Axis::Column]
            .into_iter()
            .filter_map(|a| generation.tree(a).map(|t| (a, t)))
            .find(|(_, t)| t.levels.iter().any(|l| l.level == level && !l.implicit_measures))
            .ok_or(CrossTabError::LevelNotOnAxis(level))?;
        debug!("expand all {:?} on {:?} axis level {}", method, axis, level);

        if method == DrillMethod::ParentChild {
            let targets: Vec<_> = tree
                .nodes()
                .filter(|n| n.kind == NodeKind::Member)
                .filter(|n| n.axis_level.map_or(false, |al| tree.levels[al].level == level))
                .filter(|n| n.drills.iter().any(|o| o.method == DrillMethod::ParentChild))
                .map(|n| tree.path(n.id))
                .collect();
            for path in targets {
                ctx.session.drills.drill(ctx.source.schema(), level, level, &path)?;
            }
        } else {
            let al = tree
                .levels
                .iter()
                .position(|l| l.level == level)
                .ok_or(CrossTabError::LevelNotOnAxis(level))?;
            let current = &tree.levels[al];
            let target = tree.levels[al + 1..]
                .iter()
                .filter(|l| !l.implicit_measures)
                .find(|l| match method {
                    DrillMethod::NextLevel => l.hierarchy == current.hierarchy,
                    _ => l.hierarchy != current.hierarchy,
                })
                .filter(|l| method != DrillMethod::NextLevel || l.index == al + 1)
                .map(|l| l.level)
                .ok_or_else(|| CrossTabError::InvalidDrill(format!("{:?} has no target below level {}", method, level)))?;
            ctx.session.drills.expand_all(level, target)?;
        }
        self.request_rebuild(ctx)
    }

    pub fn collapse_all(&mut self, ctx: &mut CrossTabContext<'_>, level: LevelId) -> Result<(), CrossTabError> {
        ctx.session.drills.collapse_all(level);
        self.request_rebuild(ctx)
    }

    /// Forgets all session state and rebuilds.
    pub fn reset(&mut self, ctx: &mut CrossTabContext<'_>) -> Result<(), CrossTabError> {
        ctx.session.reset();
        self.request_rebuild(ctx)
    }

    // ========================================================================
    // PAGING, SORT, COMMENTS
    // ========================================================================

    /// Moves the sibling list of a pager node to `page` (1-based). Geometry
    /// is unchanged, so no rebuild runs.
    pub fn set_page(
        &mut self,
        ctx: &mut CrossTabContext<'_>,
        axis: Axis,
        pager: NodeId,
        page: u32,
    ) -> Result<(), CrossTabError> {
        let generation = self.generation.as_mut().ok_or(CrossTabError::NotBuilt)?;
        let key = {
            let tree = generation.tree(axis).ok_or(CrossTabError::UnknownNode { axis, node: pager })?;
            let node = tree
                .node(pager)
                .filter(|n| n.is_pager())
                .ok_or(CrossTabError::UnknownNode { axis, node: pager })?;
            let page_count = node.window.map_or(1, |w| w.page_count);
            if page == 0 || page > page_count {
                return Err(CrossTabError::InvalidPage { page, page_count });
            }
            let level = node
                .axis_level
                .and_then(|al| tree.levels.get(al))
                .map(|l| l.level)
                .ok_or(CrossTabError::UnknownNode { axis, node: pager })?;
            let parent_path = node.parent.map(|p| tree.path(p)).unwrap_or_default();
            page_key(ctx.source.schema(), level, &parent_path)
        };
        ctx.session.pages.insert(key, page);
        generation.set_page(axis, pager, page);
        Ok(())
    }

    /// Sorts rows by the data column owned by `column`, or restores the
    /// natural order when `None`.
    pub fn set_sort(
        &mut self,
        ctx: &mut CrossTabContext<'_>,
        column: Option<NodeId>,
        direction: SortDirection,
    ) -> Result<(), CrossTabError> {
        ctx.session.sort = match column {
            Some(id) => {
                let columns = &self.built()?.columns;
                let node = columns.node(id).ok_or(CrossTabError::UnknownNode {
                    axis: Axis::Column,
                    node: id,
                })?;
                if !node.owns_line() {
                    return Err(CrossTabError::UnknownNode {
                        axis: Axis::Column,
                        node: id,
                    });
                }
                Some(SortSelection {
                    column: path_names(ctx.source.schema(), columns, id),
                    direction,
                })
            }
            None => None,
        };
        self.request_rebuild(ctx)
    }

    /// Attaches a comment to a data cell; an empty or `None` text removes it.
    pub fn set_comment(
        &mut self,
        ctx: &mut CrossTabContext<'_>,
        col: u32,
        row: u32,
        text: Option<String>,
    ) -> Result<(), CrossTabError> {
        let generation = self.generation.as_mut().ok_or(CrossTabError::NotBuilt)?;
        let index = generation
            .data_index(col, row)
            .ok_or(CrossTabError::CoordinateOutOfRange {
                col,
                row,
                col_count: generation.column_count(),
                row_count: generation.row_count(),
            })?;
        let key = generation
            .addresses
            .get(index)
            .map(|a| a.key(ctx.source.schema()))
            .unwrap_or_default();
        ctx.session.set_comment(key, text.clone());
        generation.set_comment(index, text);
        Ok(())
    }

    // ========================================================================
    // GRID ACCESS
    // ========================================================================

    pub fn cell(&self, col: u32, row: u32) -> Result<Rc<Cell>, CrossTabError> {
        self.built()?.cell(col, row)
    }

    /// Value of a data cell, `None` for header cells.
    pub fn value(&self, col: u32, row: u32) -> Result<Option<f64>, CrossTabError> {
        Ok(match &self.cell(col, row)?.kind {
            CellKind::Data(data) => data.value.as_number(),
            _ => None,
        })
    }

    pub fn row_count(&self) -> u32 {
        self.generation.as_ref().map_or(0, |g| g.row_count())
    }

    pub fn column_count(&self) -> u32 {
        self.generation.as_ref().map_or(0, |g| g.column_count())
    }

    pub fn fixed_rows(&self) -> u32 {
        self.generation.as_ref().map_or(0, |g| g.fixed_rows())
    }

    pub fn fixed_columns(&self) -> u32 {
        self.generation.as_ref().map_or(0, |g| g.fixed_columns())
    }

    pub fn paged_row(&self, row: u32) -> Option<u32> {
        self.generation.as_ref().and_then(|g| g.paged_row(row))
    }

    pub fn paged_column(&self, col: u32) -> Option<u32> {
        self.generation.as_ref().and_then(|g| g.paged_column(col))
    }

    pub fn is_row_visible(&self, row: u32) -> bool {
        self.generation.as_ref().map_or(false, |g| g.is_row_visible(row))
    }

    pub fn is_column_visible(&self, col: u32) -> bool {
        self.generation.as_ref().map_or(false, |g| g.is_column_visible(col))
    }

    pub fn tree(&self, axis: Axis) -> Option<&NodeTree> {
        self.generation.as_ref().and_then(|g| g.tree(axis))
    }

    pub fn node(&self, axis: Axis, id: NodeId) -> Option<&OutputNode> {
        self.tree(axis).and_then(|t| t.node(id))
    }

    /// First member node on `axis` showing the member with this unique name.
    pub fn find_member(&self, ctx: &CrossTabContext<'_>, axis: Axis, unique_name: &str) -> Option<NodeId> {
        let member = ctx.source.schema().member_by_unique_name(unique_name)?.id;
        self.tree(axis)?
            .nodes()
            .find(|n| n.kind == NodeKind::Member && n.member == Some(member))
            .map(|n| n.id)
    }
}

/// Fetches every data value of the grid, row-major, and matches comments.
#[allow(clippy::type_complexity)]
fn fetch_values(
    ctx: &mut CrossTabContext<'_>,
    rows: &NodeTree,
    columns: &NodeTree,
    page_slice: &CubeAddress,
) -> Result<(Vec<CubeAddress>, Vec<cube::CubeValue>, FxHashMap<usize, String>), CrossTabError> {
    let row_owners = rows.line_owners();
    let column_owners = columns.line_owners();
    let mut addresses = Vec::with_capacity(row_owners.len() * column_owners.len());
    {
        let schema = ctx.source.schema();
        let column_paths: Vec<_> = column_owners.iter().map(|&c| columns.path(c)).collect();
        for &r in &row_owners {
            let mut row_address = page_slice.clone();
            for m in rows.path(r) {
                row_address.push(schema, m)?;
            }
            for path in &column_paths {
                let mut address = row_address.clone();
                for &m in path {
                    address.push(schema, m)?;
                }
                addresses.push(address);
            }
        }
    }
    let values = ctx.source.values(&addresses)?;

    let mut comments = FxHashMap::default();
    if !ctx.session.comments.is_empty() {
        let schema = ctx.source.schema();
        for (index, address) in addresses.iter().enumerate() {
            if let Some(text) = ctx.session.comments.get(&address.key(schema)) {
                comments.insert(index, text.clone());
            }
        }
    }
    Ok((addresses, values, comments))
}
