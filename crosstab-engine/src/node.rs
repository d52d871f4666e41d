//! FILENAME: crosstab-engine/src/node.rs
//! Output nodes - the per-axis tree the grid is laid out from.
//!
//! Each axis owns an arena of `OutputNode`s addressed by `NodeId`. Nodes are
//! never removed during a generation; a rebuild creates a fresh arena.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use cube::{HierarchyId, LevelId, MemberId};

use crate::definition::Axis;
use crate::drill::DrillMethod;

/// Index of a node within its axis arena.
pub type NodeId = u32;

/// The synthetic root of every axis tree.
pub const ROOT: NodeId = 0;

// ============================================================================
// AXIS LEVELS
// ============================================================================

/// A level as it is placed on an axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisLevel {
    /// Position along the axis (0 = outermost).
    pub index: usize,
    pub level: LevelId,
    pub hierarchy: HierarchyId,
    /// Caption shown in the corner cell.
    pub caption: String,
    /// First fixed column (rows) or row (columns) of this level.
    pub offset: u32,
    /// Number of depth slots; more than 1 for parent-child levels.
    pub width: u32,
    /// Member depth mapped to `offset`.
    pub min_depth: u32,
    /// Indices of the member attributes shown after the level.
    pub attributes: Vec<usize>,
    /// Names of those attributes, for corner captions.
    pub attribute_names: Vec<String>,
    /// The measures sublevel appended automatically.
    pub implicit_measures: bool,
}

impl AxisLevel {
    /// Fixed slots used by the level and its attributes.
    pub fn extent(&self) -> u32 {
        self.width + self.attributes.len() as u32
    }
}

// ============================================================================
// NODES
// ============================================================================

/// Expansion state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ExpandStatus {
    #[default]
    Collapsed,
    ParentChild,
    NextLevel,
    NextHierarchy,
}

impl From<DrillMethod> for ExpandStatus {
    fn from(method: DrillMethod) -> Self {
        match method {
            DrillMethod::ParentChild => ExpandStatus::ParentChild,
            DrillMethod::NextLevel => ExpandStatus::NextLevel,
            DrillMethod::NextHierarchy => ExpandStatus::NextHierarchy,
        }
    }
}

impl ExpandStatus {
    pub fn is_expanded(self) -> bool {
        self != ExpandStatus::Collapsed
    }
}

/// What a node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Root,
    Member,
    /// Aggregate of the parent's children.
    Total,
    /// "More items" pseudo-node of a paged sibling list.
    Pager,
    /// Attribute cell of its parent member; holds the attribute index.
    Attribute(usize),
    /// Stand-in for an axis without any member.
    Placeholder,
}

/// A drill that may be applied to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrillOption {
    pub method: DrillMethod,
    /// Level whose members the drill reveals.
    pub level: LevelId,
    /// Axis level index the revealed nodes are placed at.
    pub axis_level: usize,
}

/// Page window of a paged sibling list, stored on the pager node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWindow {
    pub page_size: u32,
    pub page_count: u32,
    /// Current page (1-based).
    pub current: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub member: Option<MemberId>,
    /// Index into the tree's axis levels. `None` for the root.
    pub axis_level: Option<usize>,
    pub parent: Option<NodeId>,
    /// Child nodes in display order.
    pub children: Vec<NodeId>,
    /// Attribute nodes, in attribute order.
    pub attributes: Vec<NodeId>,
    pub caption: String,
    /// Member depth within its hierarchy.
    pub depth: u32,
    pub status: ExpandStatus,
    /// Drills structurally available on the node.
    pub drills: SmallVec<[DrillOption; 3]>,
    /// Position among member siblings; -1 for totals and pagers.
    pub sibling_order: i32,
    /// Row-axis node drawn as an indented tree row.
    pub indented: bool,
    /// Nesting depth below the root (0 for top nodes).
    pub indent: u32,
    pub window: Option<PageWindow>,

    // Geometry, filled by the span calculator.
    /// First slot in the fixed strip.
    pub fixed_start: u32,
    /// Slots covered by the node's own cell in the fixed strip.
    pub fixed_span: u32,
    /// First data row (rows) or column (columns) of the envelope.
    pub start: u32,
    /// Envelope length along the varying dimension.
    pub span: u32,
}

impl OutputNode {
    fn new(id: NodeId, kind: NodeKind, parent: Option<NodeId>) -> Self {
        OutputNode {
            id,
            kind,
            member: None,
            axis_level: None,
            parent,
            children: Vec::new(),
            attributes: Vec::new(),
            caption: String::new(),
            depth: 0,
            status: ExpandStatus::Collapsed,
            drills: SmallVec::new(),
            sibling_order: -1,
            indented: false,
            indent: 0,
            window: None,
            fixed_start: 0,
            fixed_span: 0,
            start: 0,
            span: 0,
        }
    }

    pub fn is_total(&self) -> bool {
        self.kind == NodeKind::Total
    }

    pub fn is_pager(&self) -> bool {
        self.kind == NodeKind::Pager
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self.kind, NodeKind::Attribute(_))
    }

    /// Totals, pagers and placeholders never move or page out.
    pub fn is_pinned(&self) -> bool {
        matches!(self.kind, NodeKind::Total | NodeKind::Pager | NodeKind::Placeholder)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True if the node occupies a data row (or column) of its own.
    pub fn owns_line(&self) -> bool {
        !self.is_attribute() && (self.is_leaf() || self.indented)
    }
}

// ============================================================================
// TREE
// ============================================================================

/// The arena of one axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTree {
    pub axis: Axis,
    pub levels: Vec<AxisLevel>,
    nodes: Vec<OutputNode>,
    /// Row axis drawn as an indented tree.
    pub indented: bool,
    /// Size of the fixed strip (header columns for rows, header rows for columns).
    pub strip_size: u32,
    /// Number of data lines along the varying dimension.
    pub line_count: u32,
}

impl NodeTree {
    pub fn new(axis: Axis, levels: Vec<AxisLevel>) -> Self {
        NodeTree {
            axis,
            levels,
            nodes: vec![OutputNode::new(ROOT, NodeKind::Root, None)],
            indented: false,
            strip_size: 1,
            line_count: 0,
        }
    }

    pub fn root(&self) -> &OutputNode {
        &self.nodes[ROOT as usize]
    }

    pub fn node(&self, id: NodeId) -> Option<&OutputNode> {
        self.nodes.get(id as usize)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut OutputNode> {
        self.nodes.get_mut(id as usize)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn nodes(&self) -> impl Iterator<Item = &OutputNode> {
        self.nodes.iter()
    }

    pub fn axis_level(&self, node: &OutputNode) -> Option<&AxisLevel> {
        node.axis_level.and_then(|i| self.levels.get(i))
    }

    /// Allocates a node under `parent` without linking it into `children`.
    pub(crate) fn alloc(&mut self, kind: NodeKind, parent: NodeId) -> NodeId {
        let id = self.nodes.len() as NodeId;
        let mut node = OutputNode::new(id, kind, Some(parent));
        node.indent = match self.nodes.get(parent as usize) {
            Some(p) if p.kind == NodeKind::Root => 0,
            Some(p) => p.indent + 1,
            None => 0,
        };
        self.nodes.push(node);
        id
    }

    /// Member path from the root down to `id`. Totals and pagers share
    /// their parent's path.
    pub fn path(&self, id: NodeId) -> SmallVec<[MemberId; 8]> {
        let mut path = SmallVec::new();
        let mut current = self.node(id);
        while let Some(node) = current {
            if node.kind == NodeKind::Member {
                if let Some(m) = node.member {
                    path.push(m);
                }
            }
            current = node.parent.and_then(|p| self.node(p));
        }
        path.reverse();
        path
    }

    /// Node ids in pre-order (parents before children), attributes excluded.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.node(id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Nodes owning a data line, in line order.
    pub fn line_owners(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&id| id != ROOT && self.node(id).map_or(false, |n| n.owns_line()))
            .collect()
    }

    /// Member children (totals and pagers excluded).
    pub fn member_children(&self, id: NodeId) -> impl Iterator<Item = &OutputNode> {
        self.node(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter_map(move |&c| self.node(c))
            .filter(|c| c.kind == NodeKind::Member)
    }

    /// Pager among the children of `id`, if the sibling list is paged.
    pub fn pager_of(&self, id: NodeId) -> Option<&OutputNode> {
        self.node(id)?
            .children
            .iter()
            .rev()
            .filter_map(|&c| self.node(c))
            .find(|c| c.is_pager())
    }
}
