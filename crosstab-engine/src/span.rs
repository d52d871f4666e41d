//! FILENAME: crosstab-engine/src/span.rs
//! Span Calculator - geometry of the header strips.
//!
//! Each axis tree is laid out along two dimensions:
//! - the fixed strip (header columns for rows, header rows for columns)
//! - the varying dimension (data rows for rows, data columns for columns)
//!
//! Passes:
//! 1. `size_strip`: depth slots per level, level offsets and strip size
//! 2. `measure`: envelope spans (post-order) and fixed cell extents
//! 3. `place`: absolute starts (pre-order)
//!
//! `StripLookup` then maps every (line, slot) of the strip to its node.

use crate::node::{NodeId, NodeKind, NodeTree, ROOT};

// ============================================================================
// PASS 1: STRIP
// ============================================================================

/// Sizes depth slots from the built nodes and lays out level offsets.
pub fn size_strip(tree: &mut NodeTree) {
    let mut ranges: Vec<Option<(u32, u32)>> = vec![None; tree.levels.len()];
    for node in tree.nodes().filter(|n| n.kind == NodeKind::Member) {
        if let Some(range) = node.axis_level.and_then(|al| ranges.get_mut(al)) {
            *range = Some(match *range {
                None => (node.depth, node.depth),
                Some((lo, hi)) => (lo.min(node.depth), hi.max(node.depth)),
            });
        }
    }

    let mut offset = 0;
    for (level, range) in tree.levels.iter_mut().zip(ranges) {
        if let Some((lo, hi)) = range {
            level.min_depth = lo;
            level.width = hi - lo + 1;
        }
        if tree.indented {
            level.offset = 0;
        } else {
            level.offset = offset;
            offset += level.extent();
        }
    }

    let size = if tree.indented {
        1 + tree.levels.iter().map(|l| l.attributes.len() as u32).max().unwrap_or(0)
    } else {
        offset
    };
    tree.strip_size = size.max(1);
}

// ============================================================================
// PASS 2: SPANS AND FIXED EXTENTS
// ============================================================================

/// Computes fixed starts, fixed cell spans and envelope spans.
pub fn measure(tree: &mut NodeTree) {
    let order = tree.preorder();

    // Fixed starts depend on the parent, so parents go first.
    for &id in &order {
        let start = fixed_start(tree, id);
        if let Some(node) = tree.node_mut(id) {
            node.fixed_start = start;
        }
    }

    // Spans depend on the children, so children go first.
    for &id in order.iter().rev() {
        let Some(node) = tree.node(id) else {
            continue;
        };
        let children: Vec<NodeId> = node.children.clone();
        let own_line = u32::from(node.indented && !node.is_leaf());
        let span = if node.is_leaf() {
            1
        } else {
            own_line
                + children
                    .iter()
                    .filter_map(|&c| tree.node(c))
                    .map(|c| c.span)
                    .sum::<u32>()
        };
        // The node's block ends where its children's begins.
        let block_end = if tree.indented || node.is_leaf() {
            tree.strip_size
        } else {
            children
                .iter()
                .filter_map(|&c| tree.node(c))
                .map(|c| c.fixed_start)
                .min()
                .unwrap_or(tree.strip_size)
        };
        let fixed_start = node.fixed_start;
        let attributes = node.attributes.clone();
        let attribute_slots = attribute_slots(tree, id);

        let first_attr = attribute_slots.first().copied().unwrap_or(block_end);
        if let Some(node) = tree.node_mut(id) {
            node.span = span;
            node.fixed_span = first_attr.saturating_sub(fixed_start).max(1);
        }
        for (i, (&attr, &slot)) in attributes.iter().zip(attribute_slots.iter()).enumerate() {
            let end = if i + 1 == attributes.len() {
                block_end
            } else {
                slot + 1
            };
            if let Some(a) = tree.node_mut(attr) {
                a.fixed_start = slot;
                a.fixed_span = end.saturating_sub(slot).max(1);
            }
        }
    }
}

fn fixed_start(tree: &NodeTree, id: NodeId) -> u32 {
    let Some(node) = tree.node(id) else {
        return 0;
    };
    if tree.indented || node.kind == NodeKind::Root {
        return 0;
    }
    let Some(level) = tree.axis_level(node) else {
        return 0;
    };
    let parent = node.parent.and_then(|p| tree.node(p));
    match node.kind {
        NodeKind::Member => {
            let slot = node.depth.saturating_sub(level.min_depth).min(level.width - 1);
            level.offset + slot
        }
        NodeKind::Total | NodeKind::Pager => {
            let start = match parent {
                // A total of a parent-child list sits one slot right of its parent.
                Some(p) if p.kind == NodeKind::Member && p.axis_level == node.axis_level => {
                    p.fixed_start + 1
                }
                _ => level.offset,
            };
            match parent {
                Some(p) if p.kind != NodeKind::Root => start.max(p.fixed_start + 1),
                _ => start,
            }
        }
        _ => 0,
    }
}

/// Fixed slots of a node's attribute cells.
fn attribute_slots(tree: &NodeTree, id: NodeId) -> Vec<u32> {
    let Some(node) = tree.node(id) else {
        return Vec::new();
    };
    let Some(level) = tree.axis_level(node) else {
        return Vec::new();
    };
    (0..node.attributes.len() as u32)
        .map(|i| {
            if tree.indented {
                1 + i
            } else {
                level.offset + level.width + i
            }
        })
        .collect()
}

// ============================================================================
// PASS 3: POSITIONS
// ============================================================================

/// Assigns absolute starts along the varying dimension.
pub fn place(tree: &mut NodeTree) {
    let mut stack = vec![(ROOT, 0u32)];
    while let Some((id, start)) = stack.pop() {
        let Some(node) = tree.node_mut(id) else {
            continue;
        };
        node.start = start;
        let cell_lines = if node.indented { 1 } else { node.span };
        let mut next = start + u32::from(node.indented && !node.is_leaf());
        let children = node.children.clone();
        let attributes = node.attributes.clone();

        for attr in attributes {
            if let Some(a) = tree.node_mut(attr) {
                a.start = start;
                a.span = cell_lines;
            }
        }
        let mut placed = Vec::with_capacity(children.len());
        for child in children {
            placed.push((child, next));
            next += tree.node(child).map_or(0, |c| c.span);
        }
        stack.extend(placed.into_iter().rev());
    }
    tree.line_count = tree.root().span;
}

/// Runs all three passes.
pub fn layout(tree: &mut NodeTree) {
    size_strip(tree);
    measure(tree);
    place(tree);
}

// ============================================================================
// LOOKUP
// ============================================================================

/// Dense map from strip coordinates to the node whose cell covers them.
#[derive(Debug, Clone, Default)]
pub struct StripLookup {
    pub strip: u32,
    pub lines: u32,
    cells: Vec<Option<NodeId>>,
}

impl StripLookup {
    pub fn build(tree: &NodeTree) -> Self {
        let strip = tree.strip_size;
        let lines = tree.line_count;
        let mut cells = vec![None; strip as usize * lines as usize];
        for node in tree.nodes().filter(|n| n.kind != NodeKind::Root) {
            let cell_lines = if node.indented { 1 } else { node.span };
            for line in node.start..(node.start + cell_lines).min(lines) {
                let end = (node.fixed_start + node.fixed_span).min(strip);
                for slot in node.fixed_start..end {
                    cells[(line * strip + slot) as usize] = Some(node.id);
                }
            }
        }
        StripLookup { strip, lines, cells }
    }

    pub fn get(&self, line: u32, slot: u32) -> Option<NodeId> {
        if line >= self.lines || slot >= self.strip {
            return None;
        }
        self.cells.get((line * self.strip + slot) as usize).copied().flatten()
    }
}
