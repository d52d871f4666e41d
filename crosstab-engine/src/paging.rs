//! FILENAME: crosstab-engine/src/paging.rs
//! Paging Adjuster - maps grid lines to their paged positions.
//!
//! A sibling list longer than its level's page size shows one page at a
//! time. Lines owned by nodes outside the current page stay in the grid but
//! are hidden; the adjuster translates between original and paged indices.
//! Visibility is computed lazily per line and cached until reset.

use std::cell::RefCell;

use once_cell::unsync::OnceCell;

use cube::{CubeSchema, LevelId, MemberId};

use crate::node::{NodeId, NodeKind, NodeTree, OutputNode};

/// Session key of a sibling list: the level plus the parent's member path.
pub fn page_key(schema: &CubeSchema, level: LevelId, parent_path: &[MemberId]) -> String {
    let mut key = match schema.level(level) {
        Some(l) => l.unique_name.clone(),
        None => format!("#{}", level),
    };
    for &m in parent_path {
        key.push('|');
        match schema.member(m) {
            Some(member) => key.push_str(&member.unique_name),
            None => key.push_str(&format!("#{}", m)),
        }
    }
    key
}

/// True if the node belongs to the current page of its sibling list.
pub fn in_frame(tree: &NodeTree, node: &OutputNode) -> bool {
    if node.is_pinned() || node.kind == NodeKind::Root || node.sibling_order < 0 {
        return true;
    }
    let window = node.parent.and_then(|p| tree.pager_of(p)).and_then(|p| p.window);
    match window {
        None => true,
        Some(w) => node.sibling_order as u32 / w.page_size == w.current.saturating_sub(1),
    }
}

/// True if the node and all its ancestors are in frame.
pub fn is_node_visible(tree: &NodeTree, id: NodeId) -> bool {
    let mut current = tree.node(id);
    while let Some(node) = current {
        if !in_frame(tree, node) {
            return false;
        }
        current = node.parent.and_then(|p| tree.node(p));
    }
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visibility {
    Unknown,
    Visible,
    Hidden,
}

#[derive(Debug)]
struct PagedIndex {
    to_paged: Vec<Option<u32>>,
    to_original: Vec<u32>,
}

/// Paging state of one axis.
#[derive(Debug)]
pub struct AxisPaging {
    visibility: RefCell<Vec<Visibility>>,
    index: OnceCell<PagedIndex>,
}

impl AxisPaging {
    pub fn new(line_count: usize) -> Self {
        AxisPaging {
            visibility: RefCell::new(vec![Visibility::Unknown; line_count]),
            index: OnceCell::new(),
        }
    }

    /// Drops cached visibility after a page change.
    pub fn reset(&mut self) {
        let lines = self.visibility.get_mut().len();
        *self.visibility.get_mut() = vec![Visibility::Unknown; lines];
        self.index = OnceCell::new();
    }

    /// Visibility of a data line owned by `owners[line]`.
    pub fn is_visible(&self, tree: &NodeTree, owners: &[NodeId], line: u32) -> bool {
        let Some(&owner) = owners.get(line as usize) else {
            return false;
        };
        let mut cache = self.visibility.borrow_mut();
        match cache.get(line as usize).copied() {
            Some(Visibility::Visible) => true,
            Some(Visibility::Hidden) => false,
            Some(Visibility::Unknown) | None => {
                let visible = is_node_visible(tree, owner);
                if let Some(slot) = cache.get_mut(line as usize) {
                    *slot = if visible { Visibility::Visible } else { Visibility::Hidden };
                }
                visible
            }
        }
    }

    fn index(&self, tree: &NodeTree, owners: &[NodeId]) -> &PagedIndex {
        self.index.get_or_init(|| {
            let mut to_paged = Vec::with_capacity(owners.len());
            let mut to_original = Vec::new();
            for line in 0..owners.len() as u32 {
                if self.is_visible(tree, owners, line) {
                    to_paged.push(Some(to_original.len() as u32));
                    to_original.push(line);
                } else {
                    to_paged.push(None);
                }
            }
            PagedIndex { to_paged, to_original }
        })
    }

    /// Paged position of an original line, `None` if it is paged out.
    pub fn paged(&self, tree: &NodeTree, owners: &[NodeId], line: u32) -> Option<u32> {
        self.index(tree, owners).to_paged.get(line as usize).copied().flatten()
    }

    /// Original line at a paged position.
    pub fn original(&self, tree: &NodeTree, owners: &[NodeId], paged: u32) -> Option<u32> {
        self.index(tree, owners).to_original.get(paged as usize).copied()
    }

    /// Number of lines on the current pages.
    pub fn visible_count(&self, tree: &NodeTree, owners: &[NodeId]) -> u32 {
        self.index(tree, owners).to_original.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Axis;
    use crate::node::{PageWindow, ROOT};

    /// 25 member leaves under the root with a page size of 10, plus a total
    /// and the pager.
    fn paged_tree(current: u32) -> (NodeTree, Vec<NodeId>) {
        let mut tree = NodeTree::new(Axis::Row, Vec::new());
        let mut children = Vec::new();
        for i in 0..25 {
            let id = tree.alloc(NodeKind::Member, ROOT);
            tree.node_mut(id).unwrap().sibling_order = i;
            children.push(id);
        }
        children.push(tree.alloc(NodeKind::Total, ROOT));
        let pager = tree.alloc(NodeKind::Pager, ROOT);
        tree.node_mut(pager).unwrap().window = Some(PageWindow {
            page_size: 10,
            page_count: 3,
            current,
        });
        children.push(pager);
        tree.node_mut(ROOT).unwrap().children = children;
        let owners = tree.line_owners();
        (tree, owners)
    }

    #[test]
    fn test_page_key_uses_unique_names() {
        let mut schema = CubeSchema::new();
        let h = schema.add_hierarchy("Time");
        let year = schema.add_level(h, "Year").unwrap();
        let month = schema.add_level(h, "Month").unwrap();
        let y = schema.add_member(year, None, "2000").unwrap();
        assert_eq!(page_key(&schema, month, &[y]), "[Time].[Month]|[Time].[Year].[2000]");
        assert_eq!(page_key(&schema, year, &[]), "[Time].[Year]");
    }

    #[test]
    fn test_third_page_shows_last_five() {
        let (tree, owners) = paged_tree(3);
        let paging = AxisPaging::new(owners.len());
        assert_eq!(owners.len(), 27);
        // 5 members + total + pager.
        assert_eq!(paging.visible_count(&tree, &owners), 7);
        assert_eq!(paging.original(&tree, &owners, 0), Some(20));
        assert_eq!(paging.paged(&tree, &owners, 19), None);
        assert_eq!(paging.paged(&tree, &owners, 24), Some(4));
        assert!(paging.is_visible(&tree, &owners, 25));
    }

    #[test]
    fn test_reset_after_page_change() {
        let (mut tree, owners) = paged_tree(1);
        let mut paging = AxisPaging::new(owners.len());
        assert!(paging.is_visible(&tree, &owners, 0));
        assert_eq!(paging.visible_count(&tree, &owners), 12);

        let pager = *tree.root().children.last().unwrap();
        tree.node_mut(pager).unwrap().window.as_mut().unwrap().current = 2;
        paging.reset();
        assert!(!paging.is_visible(&tree, &owners, 0));
        assert!(paging.is_visible(&tree, &owners, 10));
    }
}
