//! FILENAME: crosstab-engine/src/cell.rs
//! Cell Façade - renderable cells over one built generation.
//!
//! A `Generation` is everything a rebuild produced: both axis trees with
//! their geometry, the data values and the paging state. It is immutable
//! apart from paging and comments; the next rebuild replaces it whole.
//!
//! The grid is split into four regions:
//! - corner (level captions)
//! - row header strip (left)
//! - column header strip (top)
//! - data region
//!
//! Cells are created on first access and memoized by their anchor, so every
//! coordinate covered by a spanned cell yields the same `Rc<Cell>`.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde::Serialize;

use cube::{CubeAddress, CubeValue, LevelId, MemberId};

use crate::definition::Axis;
use crate::error::CrossTabError;
use crate::node::{DrillOption, ExpandStatus, NodeId, NodeKind, NodeTree, OutputNode, PageWindow};
use crate::paging::AxisPaging;
use crate::span::StripLookup;

// ============================================================================
// CELL TYPES
// ============================================================================

/// A corner cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelCell {
    pub axis: Option<Axis>,
    pub level: Option<LevelId>,
    pub caption: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MemberRole {
    Member,
    Total,
    Pager,
    Attribute,
    Placeholder,
}

/// A header cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberCell {
    pub axis: Axis,
    pub node: NodeId,
    pub member: Option<MemberId>,
    pub caption: String,
    pub role: MemberRole,
    pub status: ExpandStatus,
    /// Drills the user may apply.
    pub drills: Vec<DrillOption>,
    pub indent: u32,
    /// Page window, on pager cells.
    pub window: Option<PageWindow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataCell {
    pub row_node: NodeId,
    pub column_node: NodeId,
    pub address: CubeAddress,
    pub value: CubeValue,
    pub comment: Option<String>,
}

/// A data cell whose value lookup failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorCell {
    pub address: CubeAddress,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CellKind {
    Level(LevelCell),
    Member(MemberCell),
    Data(DataCell),
    Error(ErrorCell),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    /// Anchor (top-left) column.
    pub col: u32,
    /// Anchor (top-left) row.
    pub row: u32,
    pub col_span: u32,
    pub row_span: u32,
    /// Anchor column after paging, `None` if paged out.
    pub paged_col: Option<u32>,
    /// Anchor row after paging, `None` if paged out.
    pub paged_row: Option<u32>,
    pub kind: CellKind,
}

// ============================================================================
// GENERATION
// ============================================================================

#[derive(Debug)]
pub struct Generation {
    pub id: u64,
    pub rows: NodeTree,
    pub columns: NodeTree,
    pub(crate) row_lookup: StripLookup,
    pub(crate) column_lookup: StripLookup,
    pub(crate) row_owners: Vec<NodeId>,
    pub(crate) column_owners: Vec<NodeId>,
    pub(crate) row_paging: AxisPaging,
    pub(crate) column_paging: AxisPaging,
    /// Data addresses and values, row-major.
    pub(crate) addresses: Vec<CubeAddress>,
    pub(crate) values: Vec<CubeValue>,
    /// Comments by data index.
    pub(crate) comments: FxHashMap<usize, String>,
    /// Column the rows were sorted by.
    pub sort_column: Option<NodeId>,
    cells: RefCell<FxHashMap<(u32, u32), Rc<Cell>>>,
}

impl Generation {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        rows: NodeTree,
        columns: NodeTree,
        addresses: Vec<CubeAddress>,
        values: Vec<CubeValue>,
        comments: FxHashMap<usize, String>,
        sort_column: Option<NodeId>,
    ) -> Self {
        let row_lookup = StripLookup::build(&rows);
        let column_lookup = StripLookup::build(&columns);
        let row_owners = rows.line_owners();
        let column_owners = columns.line_owners();
        Generation {
            id,
            row_paging: AxisPaging::new(row_owners.len()),
            column_paging: AxisPaging::new(column_owners.len()),
            rows,
            columns,
            row_lookup,
            column_lookup,
            row_owners,
            column_owners,
            addresses,
            values,
            comments,
            sort_column,
            cells: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn tree(&self, axis: Axis) -> Option<&NodeTree> {
        match axis {
            Axis::Row => Some(&self.rows),
            Axis::Column => Some(&self.columns),
            Axis::Page => None,
        }
    }

    pub(crate) fn tree_mut(&mut self, axis: Axis) -> Option<&mut NodeTree> {
        match axis {
            Axis::Row => Some(&mut self.rows),
            Axis::Column => Some(&mut self.columns),
            Axis::Page => None,
        }
    }

    /// Header rows on top (column strip size).
    pub fn fixed_rows(&self) -> u32 {
        self.columns.strip_size
    }

    /// Header columns on the left (row strip size).
    pub fn fixed_columns(&self) -> u32 {
        self.rows.strip_size
    }

    pub fn data_rows(&self) -> u32 {
        self.rows.line_count
    }

    pub fn data_columns(&self) -> u32 {
        self.columns.line_count
    }

    pub fn row_count(&self) -> u32 {
        self.fixed_rows() + self.data_rows()
    }

    pub fn column_count(&self) -> u32 {
        self.fixed_columns() + self.data_columns()
    }

    /// Node owning a data row.
    pub fn row_owner(&self, row: u32) -> Option<NodeId> {
        row.checked_sub(self.fixed_rows())
            .and_then(|line| self.row_owners.get(line as usize).copied())
    }

    /// Node owning a data column.
    pub fn column_owner(&self, col: u32) -> Option<NodeId> {
        col.checked_sub(self.fixed_columns())
            .and_then(|line| self.column_owners.get(line as usize).copied())
    }

    // ------------------------------------------------------------------
    // Paging
    // ------------------------------------------------------------------

    pub fn paged_row(&self, row: u32) -> Option<u32> {
        let fixed = self.fixed_rows();
        if row < fixed {
            return Some(row);
        }
        self.row_paging
            .paged(&self.rows, &self.row_owners, row - fixed)
            .map(|p| p + fixed)
    }

    pub fn paged_column(&self, col: u32) -> Option<u32> {
        let fixed = self.fixed_columns();
        if col < fixed {
            return Some(col);
        }
        self.column_paging
            .paged(&self.columns, &self.column_owners, col - fixed)
            .map(|p| p + fixed)
    }

    /// Original row shown at a paged row.
    pub fn original_row(&self, paged: u32) -> Option<u32> {
        let fixed = self.fixed_rows();
        if paged < fixed {
            return Some(paged);
        }
        self.row_paging
            .original(&self.rows, &self.row_owners, paged - fixed)
            .map(|r| r + fixed)
    }

    pub fn original_column(&self, paged: u32) -> Option<u32> {
        let fixed = self.fixed_columns();
        if paged < fixed {
            return Some(paged);
        }
        self.column_paging
            .original(&self.columns, &self.column_owners, paged - fixed)
            .map(|c| c + fixed)
    }

    pub fn is_row_visible(&self, row: u32) -> bool {
        let fixed = self.fixed_rows();
        row < fixed || self.row_paging.is_visible(&self.rows, &self.row_owners, row - fixed)
    }

    pub fn is_column_visible(&self, col: u32) -> bool {
        let fixed = self.fixed_columns();
        col < fixed || self.column_paging.is_visible(&self.columns, &self.column_owners, col - fixed)
    }

    /// Rows left after paging.
    pub fn paged_row_count(&self) -> u32 {
        self.fixed_rows() + self.row_paging.visible_count(&self.rows, &self.row_owners)
    }

    pub fn paged_column_count(&self) -> u32 {
        self.fixed_columns() + self.column_paging.visible_count(&self.columns, &self.column_owners)
    }

    /// Moves the sibling list of `pager` to `page` and resets paging caches.
    pub(crate) fn set_page(&mut self, axis: Axis, pager: NodeId, page: u32) {
        if let Some(node) = self.tree_mut(axis).and_then(|t| t.node_mut(pager)) {
            if let Some(window) = node.window.as_mut() {
                window.current = page;
                node.caption = format!("Page {} of {}", page, window.page_count);
            }
        }
        match axis {
            Axis::Row => self.row_paging.reset(),
            Axis::Column => self.column_paging.reset(),
            Axis::Page => {}
        }
        self.invalidate_cells();
    }

    pub(crate) fn set_comment(&mut self, index: usize, text: Option<String>) {
        match text {
            Some(text) if !text.is_empty() => {
                self.comments.insert(index, text);
            }
            _ => {
                self.comments.remove(&index);
            }
        }
        self.invalidate_cells();
    }

    pub(crate) fn invalidate_cells(&mut self) {
        self.cells.get_mut().clear();
    }

    /// Index into the data arrays of a grid coordinate in the data region.
    pub(crate) fn data_index(&self, col: u32, row: u32) -> Option<usize> {
        let line = row.checked_sub(self.fixed_rows())?;
        let column = col.checked_sub(self.fixed_columns())?;
        if line >= self.data_rows() || column >= self.data_columns() {
            return None;
        }
        Some(line as usize * self.data_columns() as usize + column as usize)
    }

    // ------------------------------------------------------------------
    // Cells
    // ------------------------------------------------------------------

    /// The cell covering `(col, row)`.
    pub fn cell(&self, col: u32, row: u32) -> Result<Rc<Cell>, CrossTabError> {
        let (col_count, row_count) = (self.column_count(), self.row_count());
        if col >= col_count || row >= row_count {
            return Err(CrossTabError::CoordinateOutOfRange {
                col,
                row,
                col_count,
                row_count,
            });
        }

        let anchor = self.anchor(col, row);
        if let Some(cell) = self.cells.borrow().get(&anchor) {
            return Ok(Rc::clone(cell));
        }
        let cell = Rc::new(self.make_cell(anchor.0, anchor.1));
        self.cells.borrow_mut().insert(anchor, Rc::clone(&cell));
        Ok(cell)
    }

    /// Header node covering a strip coordinate.
    fn strip_node(&self, col: u32, row: u32) -> Option<(Axis, &OutputNode)> {
        let (fixed_rows, fixed_cols) = (self.fixed_rows(), self.fixed_columns());
        if col < fixed_cols && row >= fixed_rows {
            let id = self.row_lookup.get(row - fixed_rows, col)?;
            self.rows.node(id).map(|n| (Axis::Row, n))
        } else if row < fixed_rows && col >= fixed_cols {
            let id = self.column_lookup.get(col - fixed_cols, row)?;
            self.columns.node(id).map(|n| (Axis::Column, n))
        } else {
            None
        }
    }

    /// Top-left coordinate of the cell covering `(col, row)`.
    fn anchor(&self, col: u32, row: u32) -> (u32, u32) {
        let (fixed_rows, fixed_cols) = (self.fixed_rows(), self.fixed_columns());
        match self.strip_node(col, row) {
            Some((Axis::Row, node)) => (node.fixed_start, fixed_rows + node.start),
            Some((_, node)) => (fixed_cols + node.start, node.fixed_start),
            None => (col, row),
        }
    }

    fn make_cell(&self, col: u32, row: u32) -> Cell {
        let (fixed_rows, fixed_cols) = (self.fixed_rows(), self.fixed_columns());
        let (col_span, row_span, kind) = if col < fixed_cols && row < fixed_rows {
            (1, 1, CellKind::Level(self.corner(col, row)))
        } else if let Some((axis, node)) = self.strip_node(col, row) {
            let lines = if node.indented { 1 } else { node.span };
            let kind = CellKind::Member(member_cell(axis, node));
            match axis {
                Axis::Row => (node.fixed_span, lines, kind),
                _ => (lines, node.fixed_span, kind),
            }
        } else if let Some(index) = self.data_index(col, row) {
            (1, 1, self.data_kind(col, row, index))
        } else {
            let empty = LevelCell {
                axis: None,
                level: None,
                caption: String::new(),
            };
            (1, 1, CellKind::Level(empty))
        };
        Cell {
            col,
            row,
            col_span,
            row_span,
            paged_col: self.paged_column(col),
            paged_row: self.paged_row(row),
            kind,
        }
    }

    /// Corner cells: the bottom row names the row levels, the rightmost
    /// column names the column levels.
    fn corner(&self, col: u32, row: u32) -> LevelCell {
        let bottom = row + 1 == self.fixed_rows();
        let rightmost = col + 1 == self.fixed_columns();
        if bottom && !self.rows.levels.is_empty() {
            if let Some(cell) = strip_caption(&self.rows, Axis::Row, col) {
                return cell;
            }
        }
        if rightmost {
            if let Some(cell) = strip_caption(&self.columns, Axis::Column, row) {
                return cell;
            }
        }
        LevelCell {
            axis: None,
            level: None,
            caption: String::new(),
        }
    }

    fn data_kind(&self, col: u32, row: u32, index: usize) -> CellKind {
        let address = self.addresses.get(index).cloned().unwrap_or_default();
        match self.values.get(index).cloned().unwrap_or_default() {
            CubeValue::Error(message) => CellKind::Error(ErrorCell { address, message }),
            value => CellKind::Data(DataCell {
                row_node: self.row_owner(row).unwrap_or_default(),
                column_node: self.column_owner(col).unwrap_or_default(),
                address,
                value,
                comment: self.comments.get(&index).cloned(),
            }),
        }
    }
}

/// Caption of the level (or attribute) occupying a strip slot.
fn strip_caption(tree: &NodeTree, axis: Axis, slot: u32) -> Option<LevelCell> {
    if tree.indented {
        return if slot == 0 {
            Some(LevelCell {
                axis: Some(axis),
                level: tree.levels.first().map(|l| l.level),
                caption: tree
                    .levels
                    .iter()
                    .map(|l| l.caption.as_str())
                    .collect::<Vec<_>>()
                    .join(" / "),
            })
        } else {
            let index = (slot - 1) as usize;
            tree.levels
                .iter()
                .find(|l| index < l.attribute_names.len())
                .map(|l| LevelCell {
                    axis: Some(axis),
                    level: Some(l.level),
                    caption: l.attribute_names[index].clone(),
                })
        };
    }
    let level = tree
        .levels
        .iter()
        .find(|l| slot >= l.offset && slot < l.offset + l.extent())?;
    let caption = if slot < level.offset + level.width {
        level.caption.clone()
    } else {
        let index = (slot - level.offset - level.width) as usize;
        level.attribute_names.get(index).cloned().unwrap_or_default()
    };
    Some(LevelCell {
        axis: Some(axis),
        level: Some(level.level),
        caption,
    })
}

fn member_cell(axis: Axis, node: &OutputNode) -> MemberCell {
    let role = match node.kind {
        NodeKind::Total => MemberRole::Total,
        NodeKind::Pager => MemberRole::Pager,
        NodeKind::Attribute(_) => MemberRole::Attribute,
        NodeKind::Placeholder | NodeKind::Root => MemberRole::Placeholder,
        NodeKind::Member => MemberRole::Member,
    };
    MemberCell {
        axis,
        node: node.id,
        member: node.member,
        caption: node.caption.clone(),
        role,
        status: node.status,
        drills: if role == MemberRole::Member {
            node.drills.to_vec()
        } else {
            Vec::new()
        },
        indent: if node.indented { node.indent } else { 0 },
        window: node.window,
    }
}
