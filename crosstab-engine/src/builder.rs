//! FILENAME: crosstab-engine/src/builder.rs
//! Tree Builder - turns the layout and the drill registry into axis trees.
//!
//! For each grid axis the builder resolves the visible levels, then walks
//! members depth-first. A node's expansion comes from the drill registry
//! (or is forced for measures), totals and pagers are appended per sibling
//! list, and leaves of the measures axis receive the implicit measures.

use std::collections::BTreeMap;

use log::debug;
use smallvec::SmallVec;

use cube::{CubeAddress, CubeSchema, CubeSource, MemberId, MemberKind, TotalAppearance};

use crate::definition::{Axis, CrossTabLayout, DisplayMode};
use crate::drill::{DrillIndex, DrillMethod};
use crate::error::CrossTabError;
use crate::host::CrossTabHost;
use crate::node::{AxisLevel, DrillOption, ExpandStatus, NodeId, NodeKind, NodeTree, PageWindow, ROOT};
use crate::paging::page_key;

/// Everything the builder reads besides the cube.
pub struct BuildInput<'a> {
    pub layout: &'a CrossTabLayout,
    pub drills: &'a DrillIndex<'a>,
    /// Current page per sibling list, keyed by `page_key`.
    pub pages: &'a BTreeMap<String, u32>,
    /// Members fixed by the page axis.
    pub page_slice: &'a CubeAddress,
    pub host: &'a dyn CrossTabHost,
}

// ============================================================================
// AXIS LEVELS
// ============================================================================

/// Resolves the levels shown on a grid axis, with their fixed-strip offsets.
pub fn resolve_levels(
    schema: &CubeSchema,
    layout: &CrossTabLayout,
    axis: Axis,
) -> Result<Vec<AxisLevel>, CrossTabError> {
    let mut ids = Vec::new();
    for placed in layout.axis_hierarchies(axis) {
        for level in layout.visible_levels(schema, placed.hierarchy)? {
            ids.push((level, false));
        }
    }
    if layout.implicit_measures_axis(schema) == Some(axis) {
        let measures = schema
            .measures_hierarchy()
            .and_then(|h| schema.hierarchy(h))
            .and_then(|h| h.levels.first().copied());
        if let Some(level) = measures {
            ids.push((level, true));
        }
    }

    let indented = axis == Axis::Row && layout.display_mode == DisplayMode::Indented;
    let mut offset = 0;
    let mut levels = Vec::with_capacity(ids.len());
    for (index, (id, implicit)) in ids.into_iter().enumerate() {
        let level = schema.try_level(id)?;
        let attributes = layout.attribute_indices(schema, id);
        let attribute_names = attributes
            .iter()
            .filter_map(|&i| level.attributes.get(i).cloned())
            .collect();
        let mut axis_level = AxisLevel {
            index,
            level: id,
            hierarchy: level.hierarchy,
            caption: level.name.clone(),
            offset: 0,
            // Depth slots are sized from the built nodes by the span calculator.
            width: 1,
            min_depth: level.index,
            attributes,
            attribute_names,
            implicit_measures: implicit,
        };
        if !indented {
            axis_level.offset = offset;
            offset += axis_level.extent();
        }
        levels.push(axis_level);
    }
    Ok(levels)
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builds the output tree of one axis.
pub fn build_axis(
    source: &mut dyn CubeSource,
    input: &BuildInput<'_>,
    axis: Axis,
) -> Result<NodeTree, CrossTabError> {
    let levels = resolve_levels(source.schema(), input.layout, axis)?;
    let measures_level = levels.iter().position(|l| l.implicit_measures);
    let mut tree = NodeTree::new(axis, levels);
    tree.indented = axis == Axis::Row && input.layout.display_mode == DisplayMode::Indented;
    let mut builder = AxisBuilder {
        source,
        input,
        indented: tree.indented,
        tree,
        cap: input.layout.cap(axis),
        leaves: 0,
        measures_level,
        truncated: false,
    };
    builder.build()?;
    debug!(
        "built {:?} axis: {} nodes, {} leaves{}",
        axis,
        builder.tree.len(),
        builder.leaves,
        if builder.truncated { " (capped)" } else { "" }
    );
    Ok(builder.tree)
}

struct AxisBuilder<'s, 'i> {
    source: &'s mut dyn CubeSource,
    input: &'i BuildInput<'i>,
    tree: NodeTree,
    cap: Option<usize>,
    /// Running count of leaves, checked against `cap`.
    leaves: usize,
    measures_level: Option<usize>,
    indented: bool,
    truncated: bool,
}

impl AxisBuilder<'_, '_> {
    fn build(&mut self) -> Result<(), CrossTabError> {
        if let Some(first) = self.tree.levels.first().map(|l| l.level) {
            self.source.ensure_members(first)?;
            let roots = self.source.schema().root_members(first);
            self.build_children(ROOT, 0, roots)?;
        }
        if self.tree.root().children.is_empty() {
            let id = self.tree.alloc(NodeKind::Placeholder, ROOT);
            if let Some(node) = self.tree.node_mut(id) {
                node.indented = self.indented;
            }
            if let Some(root) = self.tree.node_mut(ROOT) {
                root.children.push(id);
            }
            self.leaves += 1;
        }
        Ok(())
    }

    /// Soft cap: iteration stops once the leaf count exceeds the maximum,
    /// so an axis may end one leaf over it.
    fn cap_reached(&self) -> bool {
        self.cap.map_or(false, |max| self.leaves > max)
    }

    /// Builds the sibling list of `parent` from `candidates` placed at axis
    /// level `al`, then adds totals and the pager.
    fn build_children(
        &mut self,
        parent: NodeId,
        al: usize,
        candidates: Vec<MemberId>,
    ) -> Result<(), CrossTabError> {
        let (totals, pager) = {
            let schema = self.source.schema();
            let level = schema.try_level(self.tree.levels[al].level)?;
            let suppress = match self.tree.node(parent) {
                Some(p) if p.is_total() => true,
                Some(p) => p
                    .member
                    .and_then(|m| schema.member(m))
                    .map_or(false, |m| m.ragged),
                None => true,
            };
            let totals = if suppress { TotalAppearance::None } else { level.totals };
            (totals, level.pager)
        };
        let parent_path = self.tree.path(parent);
        let capped = Some(al) != self.measures_level;

        let mut members = Vec::new();
        for member in candidates {
            if capped && self.cap_reached() {
                self.truncated = true;
                break;
            }
            if !self.admit(member, &parent_path)? {
                continue;
            }
            let id = self.add_member(parent, al, member, members.len() as i32)?;
            members.push(id);
        }
        if members.is_empty() {
            return Ok(());
        }

        let mut children = Vec::with_capacity(members.len() + 3);
        if totals.shows_first() {
            children.push(self.add_total(parent, al)?);
        }
        children.extend(members.iter().copied());
        if totals.shows_last() {
            children.push(self.add_total(parent, al)?);
        }
        if let Some(size) = pager.size() {
            if members.len() > size as usize {
                let page_count = pager.page_count(members.len());
                children.push(self.add_pager(parent, al, size, page_count));
            }
        }
        if let Some(p) = self.tree.node_mut(parent) {
            p.children = children;
        }
        Ok(())
    }

    /// Non-empty check followed by the host filter.
    fn admit(&mut self, member: MemberId, parent_path: &[MemberId]) -> Result<bool, CrossTabError> {
        let probe = {
            let schema = self.source.schema();
            let m = schema.try_member(member)?;
            if !m.visible {
                return Ok(false);
            }
            let show_empty = schema.try_level(m.level)?.show_empty;
            if m.kind.is_pseudo() || show_empty {
                None
            } else {
                let mut address = self.input.page_slice.clone();
                for &p in parent_path {
                    address.push(schema, p)?;
                }
                address.push(schema, member)?;
                Some(address)
            }
        };
        if let Some(address) = probe {
            if !self.source.has_data(&address)? {
                return Ok(false);
            }
        }
        let schema = self.source.schema();
        Ok(self.input.host.admit_member(self.tree.axis, schema.try_member(member)?))
    }

    fn add_member(
        &mut self,
        parent: NodeId,
        al: usize,
        member: MemberId,
        order: i32,
    ) -> Result<NodeId, CrossTabError> {
        let id = self.tree.alloc(NodeKind::Member, parent);
        let (caption, kind, level, depth, attributes) = {
            let schema = self.source.schema();
            let m = schema.try_member(member)?;
            let attributes: Vec<String> = self.tree.levels[al]
                .attributes
                .iter()
                .map(|&i| m.attribute(i).unwrap_or_default().to_string())
                .collect();
            (m.display_name.clone(), m.kind, m.level, m.depth, attributes)
        };
        let options = self.drill_options(al, member);
        if let Some(node) = self.tree.node_mut(id) {
            node.member = Some(member);
            node.axis_level = Some(al);
            node.caption = caption;
            node.depth = depth;
            node.sibling_order = order;
            node.indented = self.indented;
            node.drills = options.clone();
        }

        let target = match kind {
            MemberKind::Measure => first_option(&options, DrillMethod::ParentChild)
                .or_else(|| first_option(&options, DrillMethod::NextHierarchy)),
            MemberKind::MeasureMode => first_option(&options, DrillMethod::NextHierarchy),
            _ => {
                let path = self.tree.path(id);
                self.input.drills.find(level, &path, &options)
            }
        };
        let status = target.map_or(ExpandStatus::Collapsed, |o| ExpandStatus::from(o.method));
        if let Some(node) = self.tree.node_mut(id) {
            node.status = status;
        }

        // Tabular parent-child parents hand their columns to the children.
        if self.indented || status != ExpandStatus::ParentChild {
            for (index, value) in attributes.into_iter().enumerate() {
                let attr = self.tree.alloc(NodeKind::Attribute(index), id);
                if let Some(node) = self.tree.node_mut(attr) {
                    node.member = Some(member);
                    node.axis_level = Some(al);
                    node.caption = value;
                    node.indented = self.indented;
                }
                if let Some(node) = self.tree.node_mut(id) {
                    node.attributes.push(attr);
                }
            }
        }

        if let Some(option) = target {
            self.expand(id, member, option)?;
        }
        self.finish_leaf(id, al)?;
        Ok(id)
    }

    /// Drills structurally available on a member, in lookup priority order.
    fn drill_options(&self, al: usize, member: MemberId) -> SmallVec<[DrillOption; 3]> {
        let schema = self.source.schema();
        let levels = &self.tree.levels;
        let current = &levels[al];
        let mut options = SmallVec::new();

        let has_children = schema
            .same_level_children(member)
            .iter()
            .any(|&c| schema.member(c).map_or(false, |c| c.visible));
        if has_children {
            options.push(DrillOption {
                method: DrillMethod::ParentChild,
                level: current.level,
                axis_level: al,
            });
        }
        if let Some(next) = levels.get(al + 1) {
            if next.hierarchy == current.hierarchy && !next.implicit_measures {
                options.push(DrillOption {
                    method: DrillMethod::NextLevel,
                    level: next.level,
                    axis_level: al + 1,
                });
            }
        }
        let next_hierarchy = (al + 1..levels.len())
            .find(|&j| levels[j].hierarchy != current.hierarchy && !levels[j].implicit_measures);
        if let Some(j) = next_hierarchy {
            options.push(DrillOption {
                method: DrillMethod::NextHierarchy,
                level: levels[j].level,
                axis_level: j,
            });
        }
        options
    }

    fn expand(&mut self, id: NodeId, member: MemberId, option: DrillOption) -> Result<(), CrossTabError> {
        self.source.ensure_members(option.level)?;
        let candidates = {
            let schema = self.source.schema();
            match option.method {
                DrillMethod::ParentChild => schema.same_level_children(member),
                // Only the topmost descendants; deeper ones hang below them.
                DrillMethod::NextLevel => schema
                    .descendants_at_level(member, option.level)
                    .into_iter()
                    .filter(|&c| {
                        schema
                            .member(c)
                            .and_then(|c| c.parent)
                            .and_then(|p| schema.member(p))
                            .map_or(true, |p| p.level != option.level)
                    })
                    .collect(),
                DrillMethod::NextHierarchy => schema.root_members(option.level),
            }
        };
        self.build_children(id, option.axis_level, candidates)
    }

    /// Appends the implicit measures under a childless node and counts it
    /// as a leaf if it stays childless.
    fn finish_leaf(&mut self, id: NodeId, al: usize) -> Result<(), CrossTabError> {
        let is_leaf = |tree: &NodeTree| tree.node(id).map_or(false, |n| n.is_leaf());
        if is_leaf(&self.tree) {
            if let Some(mal) = self.measures_level.filter(|&mal| al < mal) {
                let measures = self.source.schema().measures();
                self.build_children(id, mal, measures)?;
            }
        }
        if is_leaf(&self.tree) {
            self.leaves += 1;
        }
        Ok(())
    }

    fn add_total(&mut self, parent: NodeId, al: usize) -> Result<NodeId, CrossTabError> {
        let id = self.tree.alloc(NodeKind::Total, parent);
        let caption = match self.tree.node(parent) {
            Some(p) if p.kind == NodeKind::Root => "Grand Total".to_string(),
            Some(p) => format!("{} Total", p.caption),
            None => "Total".to_string(),
        };
        if let Some(node) = self.tree.node_mut(id) {
            node.axis_level = Some(al);
            node.caption = caption;
            node.indented = self.indented;
        }
        self.finish_leaf(id, al)?;
        Ok(id)
    }

    fn add_pager(&mut self, parent: NodeId, al: usize, page_size: u32, page_count: u32) -> NodeId {
        let key = page_key(self.source.schema(), self.tree.levels[al].level, &self.tree.path(parent));
        let current = self
            .input
            .pages
            .get(&key)
            .copied()
            .unwrap_or(1)
            .clamp(1, page_count.max(1));
        let id = self.tree.alloc(NodeKind::Pager, parent);
        if let Some(node) = self.tree.node_mut(id) {
            node.axis_level = Some(al);
            node.caption = format!("Page {} of {}", current, page_count);
            node.indented = self.indented;
            node.window = Some(PageWindow {
                page_size,
                page_count,
                current,
            });
        }
        id
    }
}

fn first_option(options: &[DrillOption], method: DrillMethod) -> Option<DrillOption> {
    options.iter().copied().find(|o| o.method == method)
}
