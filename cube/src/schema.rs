//! FILENAME: cube/src/schema.rs
//! Cube Schema - The metadata side of the cube.
//!
//! This module describes the SHAPE of a cube: hierarchies, their levels and
//! the members living on each level. Measures are modelled as members of a
//! dedicated measures hierarchy so that the cross-tab can place them on an
//! axis exactly like any other hierarchy.
//!
//! Ids are dense indices into the schema's vectors, so lookups are O(1).

use serde::{Deserialize, Serialize};

use crate::error::CubeError;

/// Index of a hierarchy within the schema.
pub type HierarchyId = u32;

/// Index of a level within the schema.
pub type LevelId = u32;

/// Index of a member within the schema.
pub type MemberId = u32;

// ============================================================================
// PRESENTATION SETTINGS
// ============================================================================

/// Where a level places its total pseudo-member among the siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TotalAppearance {
    /// No total is generated.
    None,
    /// Total precedes the siblings.
    First,
    /// Total follows the siblings (default).
    #[default]
    Last,
    /// One total before and one after the siblings.
    Both,
}

impl TotalAppearance {
    pub fn shows_first(self) -> bool {
        matches!(self, TotalAppearance::First | TotalAppearance::Both)
    }

    pub fn shows_last(self) -> bool {
        matches!(self, TotalAppearance::Last | TotalAppearance::Both)
    }
}

/// Paging of a level's sibling lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PagerSettings {
    /// Number of siblings per page. `None` disables paging.
    pub page_size: Option<u32>,
}

impl PagerSettings {
    pub fn paged(page_size: u32) -> Self {
        PagerSettings { page_size: Some(page_size.max(1)) }
    }

    /// Returns the page size if the level is paged.
    pub fn size(&self) -> Option<u32> {
        self.page_size.filter(|&s| s > 0)
    }

    /// Number of pages needed for `count` siblings.
    pub fn page_count(&self, count: usize) -> u32 {
        match self.size() {
            Some(size) => ((count as u32) + size - 1) / size,
            None => 1,
        }
    }
}

// ============================================================================
// MEMBERS
// ============================================================================

/// The closed set of member variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberKind {
    /// A regular member coming from the dimension data.
    Common,
    /// A user-defined group of sibling members.
    Group,
    /// A member computed from an expression.
    Calculated,
    /// A measure of the measures hierarchy.
    Measure,
    /// A display mode of a measure (child of a Measure member).
    MeasureMode,
}

impl MemberKind {
    /// Measures and measure modes are pseudo-members: they never carry data
    /// of their own dimension and always expand fully.
    pub fn is_pseudo(self) -> bool {
        matches!(self, MemberKind::Measure | MemberKind::MeasureMode)
    }
}

/// A hierarchy node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub level: LevelId,
    pub hierarchy: HierarchyId,
    pub parent: Option<MemberId>,
    /// Direct children, on the same level (parent-child hierarchies and
    /// groups) or on the next level.
    pub children: Vec<MemberId>,
    /// Depth within the hierarchy (0 = top).
    pub depth: u32,
    pub display_name: String,
    pub unique_name: String,
    pub kind: MemberKind,
    pub visible: bool,
    /// Placeholder member of a ragged hierarchy.
    pub ragged: bool,
    /// Attribute values, aligned with the level's attribute names.
    pub attributes: Vec<String>,
}

impl Member {
    pub fn attribute(&self, index: usize) -> Option<&str> {
        self.attributes.get(index).map(String::as_str)
    }
}

// ============================================================================
// LEVELS AND HIERARCHIES
// ============================================================================

/// One step of a hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level {
    pub id: LevelId,
    pub hierarchy: HierarchyId,
    /// Position within the hierarchy (0 = top level).
    pub index: u32,
    pub name: String,
    pub unique_name: String,
    /// All members of this level, in natural order.
    pub members: Vec<MemberId>,
    pub pager: PagerSettings,
    pub totals: TotalAppearance,
    /// Show members even when they carry no data.
    pub show_empty: bool,
    /// Names of the member attributes available on this level.
    pub attributes: Vec<String>,
    /// Whether the data engine has materialized all members of this level.
    pub fetched: bool,
}

/// An ordered chain of levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hierarchy {
    pub id: HierarchyId,
    pub name: String,
    pub unique_name: String,
    pub levels: Vec<LevelId>,
    pub is_measures: bool,
}

// ============================================================================
// SCHEMA
// ============================================================================

/// The complete metadata of a cube.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CubeSchema {
    pub hierarchies: Vec<Hierarchy>,
    pub levels: Vec<Level>,
    pub members: Vec<Member>,
    measures: Option<HierarchyId>,
}

impl CubeSchema {
    pub fn new() -> Self {
        CubeSchema::default()
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn hierarchy(&self, id: HierarchyId) -> Option<&Hierarchy> {
        self.hierarchies.get(id as usize)
    }

    pub fn level(&self, id: LevelId) -> Option<&Level> {
        self.levels.get(id as usize)
    }

    pub fn level_mut(&mut self, id: LevelId) -> Option<&mut Level> {
        self.levels.get_mut(id as usize)
    }

    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.get(id as usize)
    }

    pub fn try_hierarchy(&self, id: HierarchyId) -> Result<&Hierarchy, CubeError> {
        self.hierarchy(id).ok_or(CubeError::UnknownHierarchy(id))
    }

    pub fn try_level(&self, id: LevelId) -> Result<&Level, CubeError> {
        self.level(id).ok_or(CubeError::UnknownLevel(id))
    }

    pub fn try_member(&self, id: MemberId) -> Result<&Member, CubeError> {
        self.member(id).ok_or(CubeError::UnknownMember(id))
    }

    pub fn level_by_unique_name(&self, name: &str) -> Option<&Level> {
        self.levels.iter().find(|l| l.unique_name == name)
    }

    pub fn member_by_unique_name(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.unique_name == name)
    }

    /// The measures hierarchy, if any measure was defined.
    pub fn measures_hierarchy(&self) -> Option<HierarchyId> {
        self.measures
    }

    /// Visible measure members (modes excluded).
    pub fn measures(&self) -> Vec<MemberId> {
        let Some(h) = self.measures.and_then(|h| self.hierarchy(h)) else {
            return Vec::new();
        };
        h.levels
            .iter()
            .filter_map(|&l| self.level(l))
            .flat_map(|l| l.members.iter().copied())
            .filter(|&m| {
                self.member(m)
                    .map(|m| m.visible && m.kind == MemberKind::Measure)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Members of `level` whose parent is not on the same level.
    pub fn root_members(&self, level: LevelId) -> Vec<MemberId> {
        let Some(l) = self.level(level) else {
            return Vec::new();
        };
        l.members
            .iter()
            .copied()
            .filter(|&m| {
                self.member(m)
                    .map(|m| {
                        m.parent
                            .and_then(|p| self.member(p))
                            .map_or(true, |p| p.level != level)
                    })
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Direct children of `member` living on the member's own level.
    pub fn same_level_children(&self, member: MemberId) -> Vec<MemberId> {
        let Some(m) = self.member(member) else {
            return Vec::new();
        };
        m.children
            .iter()
            .copied()
            .filter(|&c| self.member(c).map_or(false, |c| c.level == m.level))
            .collect()
    }

    /// Descendants of `member` located on `level`, in level order.
    pub fn descendants_at_level(&self, member: MemberId, level: LevelId) -> Vec<MemberId> {
        let Some(l) = self.level(level) else {
            return Vec::new();
        };
        l.members
            .iter()
            .copied()
            .filter(|&c| c != member && self.is_ancestor_or_self(member, c))
            .collect()
    }

    /// True if `ancestor` is `member` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, ancestor: MemberId, member: MemberId) -> bool {
        let mut current = Some(member);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.member(id).and_then(|m| m.parent);
        }
        false
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Adds a hierarchy and returns its id.
    pub fn add_hierarchy(&mut self, name: impl Into<String>) -> HierarchyId {
        let name = name.into();
        let id = self.hierarchies.len() as HierarchyId;
        self.hierarchies.push(Hierarchy {
            id,
            unique_name: format!("[{}]", name),
            name,
            levels: Vec::new(),
            is_measures: false,
        });
        id
    }

    /// Appends a level to `hierarchy`.
    pub fn add_level(
        &mut self,
        hierarchy: HierarchyId,
        name: impl Into<String>,
    ) -> Result<LevelId, CubeError> {
        let name = name.into();
        let id = self.levels.len() as LevelId;
        let h = self
            .hierarchies
            .get_mut(hierarchy as usize)
            .ok_or(CubeError::UnknownHierarchy(hierarchy))?;
        let index = h.levels.len() as u32;
        h.levels.push(id);
        let unique_name = format!("{}.[{}]", h.unique_name, name);
        self.levels.push(Level {
            id,
            hierarchy,
            index,
            name,
            unique_name,
            members: Vec::new(),
            pager: PagerSettings::default(),
            totals: TotalAppearance::default(),
            show_empty: false,
            attributes: Vec::new(),
            fetched: true,
        });
        Ok(id)
    }

    /// Adds a common member to `level` under an optional parent.
    pub fn add_member(
        &mut self,
        level: LevelId,
        parent: Option<MemberId>,
        name: impl Into<String>,
    ) -> Result<MemberId, CubeError> {
        self.add_member_of_kind(level, parent, name, MemberKind::Common)
    }

    /// Adds a member of an explicit kind.
    pub fn add_member_of_kind(
        &mut self,
        level: LevelId,
        parent: Option<MemberId>,
        name: impl Into<String>,
        kind: MemberKind,
    ) -> Result<MemberId, CubeError> {
        let name = name.into();
        let (hierarchy, level_unique, level_index) = {
            let l = self.try_level(level)?;
            (l.hierarchy, l.unique_name.clone(), l.index)
        };
        let (depth, prefix) = match parent {
            Some(p) => {
                let pm = self.try_member(p)?;
                if pm.hierarchy != hierarchy {
                    return Err(CubeError::InvalidParent { member: p, level });
                }
                (pm.depth + 1, pm.unique_name.clone())
            }
            None => (level_index, level_unique),
        };
        let id = self.members.len() as MemberId;
        self.members.push(Member {
            id,
            level,
            hierarchy,
            parent,
            children: Vec::new(),
            depth,
            unique_name: format!("{}.[{}]", prefix, name),
            display_name: name,
            kind,
            visible: true,
            ragged: false,
            attributes: Vec::new(),
        });
        if let Some(p) = parent {
            self.members[p as usize].children.push(id);
        }
        self.levels[level as usize].members.push(id);
        Ok(id)
    }

    /// Adds a measure, creating the measures hierarchy on first use.
    pub fn add_measure(&mut self, name: impl Into<String>) -> Result<MemberId, CubeError> {
        let level = self.measures_level()?;
        self.add_member_of_kind(level, None, name, MemberKind::Measure)
    }

    /// Adds a display mode under a measure.
    pub fn add_measure_mode(
        &mut self,
        measure: MemberId,
        name: impl Into<String>,
    ) -> Result<MemberId, CubeError> {
        let m = self.try_member(measure)?;
        if m.kind != MemberKind::Measure {
            return Err(CubeError::NotAMeasure(measure));
        }
        let level = m.level;
        self.add_member_of_kind(level, Some(measure), name, MemberKind::MeasureMode)
    }

    fn measures_level(&mut self) -> Result<LevelId, CubeError> {
        if let Some(level) = self
            .measures
            .and_then(|h| self.hierarchy(h))
            .and_then(|h| h.levels.first().copied())
        {
            return Ok(level);
        }
        let h = self.add_hierarchy("Measures");
        self.hierarchies[h as usize].is_measures = true;
        self.measures = Some(h);
        let level = self.add_level(h, "Measures")?;
        let l = &mut self.levels[level as usize];
        l.totals = TotalAppearance::None;
        l.show_empty = true;
        Ok(level)
    }

    /// Sets attribute values on a member.
    pub fn set_attributes(&mut self, member: MemberId, values: Vec<String>) -> Result<(), CubeError> {
        let m = self
            .members
            .get_mut(member as usize)
            .ok_or(CubeError::UnknownMember(member))?;
        m.attributes = values;
        Ok(())
    }
}
