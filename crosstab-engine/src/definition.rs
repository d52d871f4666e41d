//! FILENAME: crosstab-engine/src/definition.rs
//! Cross-Tab Definition - The serializable layout configuration.
//!
//! This module contains all the types needed to DESCRIBE a cross-tab:
//! which hierarchies sit on which axis, how the row header is drawn, where
//! the measures go and how large the grid may grow.
//! These structures are designed to be:
//! - Serializable (for saving alongside a report)
//! - Immutable snapshots of user intent

use serde::{Deserialize, Serialize};

use cube::{CubeError, CubeSchema, HierarchyId, LevelId, MemberId};

// ============================================================================
// AXES
// ============================================================================

/// Where a hierarchy is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    Row,
    Column,
    Page,
}

impl Axis {
    /// The other grid axis. Page maps to itself.
    pub fn opposite(self) -> Axis {
        match self {
            Axis::Row => Axis::Column,
            Axis::Column => Axis::Row,
            Axis::Page => Axis::Page,
        }
    }
}

/// A hierarchy placed on the row or column axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisHierarchy {
    pub hierarchy: HierarchyId,

    /// Levels shown on the axis. Empty means all levels of the hierarchy.
    #[serde(default)]
    pub visible_levels: Vec<LevelId>,
}

impl AxisHierarchy {
    pub fn new(hierarchy: HierarchyId) -> Self {
        AxisHierarchy {
            hierarchy,
            visible_levels: Vec::new(),
        }
    }
}

/// A hierarchy on the page axis, slicing every value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageFilter {
    pub hierarchy: HierarchyId,

    /// Selected member. `None` keeps the hierarchy rolled up.
    #[serde(default)]
    pub member: Option<MemberId>,
}

/// Attribute columns requested for a level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelAttributes {
    pub level: LevelId,
    pub attributes: Vec<String>,
}

// ============================================================================
// LAYOUT OPTIONS
// ============================================================================

/// How the row header strip is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DisplayMode {
    /// Each row level gets its own header column.
    #[default]
    Tabular,
    /// All row levels share one indented tree column.
    Indented,
}

/// The axis receiving the implicit measures sublevel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MeasurePosition {
    #[default]
    Columns,
    Rows,
}

impl MeasurePosition {
    pub fn axis(self) -> Axis {
        match self {
            MeasurePosition::Columns => Axis::Column,
            MeasurePosition::Rows => Axis::Row,
        }
    }
}

// ============================================================================
// MAIN LAYOUT STRUCT
// ============================================================================

/// The complete, serializable layout of a cross-tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CrossTabLayout {
    /// Hierarchies on the row axis (outer to inner).
    #[serde(default)]
    pub rows: Vec<AxisHierarchy>,

    /// Hierarchies on the column axis (outer to inner).
    #[serde(default)]
    pub columns: Vec<AxisHierarchy>,

    /// Slicers.
    #[serde(default)]
    pub pages: Vec<PageFilter>,

    #[serde(default)]
    pub display_mode: DisplayMode,

    #[serde(default)]
    pub measure_position: MeasurePosition,

    /// Soft cap on leaf rows.
    #[serde(default)]
    pub max_rows: Option<usize>,

    /// Soft cap on leaf columns.
    #[serde(default)]
    pub max_columns: Option<usize>,

    /// Attribute columns per level.
    #[serde(default)]
    pub attributes: Vec<LevelAttributes>,
}

impl CrossTabLayout {
    pub fn new() -> Self {
        CrossTabLayout::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Hierarchies placed on a grid axis.
    pub fn axis_hierarchies(&self, axis: Axis) -> &[AxisHierarchy] {
        match axis {
            Axis::Row => &self.rows,
            Axis::Column => &self.columns,
            Axis::Page => &[],
        }
    }

    /// Axis of a hierarchy, if it is active.
    pub fn axis_of(&self, hierarchy: HierarchyId) -> Option<Axis> {
        if self.rows.iter().any(|h| h.hierarchy == hierarchy) {
            Some(Axis::Row)
        } else if self.columns.iter().any(|h| h.hierarchy == hierarchy) {
            Some(Axis::Column)
        } else if self.pages.iter().any(|p| p.hierarchy == hierarchy) {
            Some(Axis::Page)
        } else {
            None
        }
    }

    /// True if the hierarchy sits on the row or column axis.
    pub fn is_on_grid(&self, hierarchy: HierarchyId) -> bool {
        matches!(self.axis_of(hierarchy), Some(Axis::Row | Axis::Column))
    }

    /// True if the hierarchy is the outermost one of its grid axis.
    pub fn is_outermost(&self, hierarchy: HierarchyId) -> bool {
        self.rows.first().map(|h| h.hierarchy) == Some(hierarchy)
            || self.columns.first().map(|h| h.hierarchy) == Some(hierarchy)
    }

    /// Soft leaf cap of an axis.
    pub fn cap(&self, axis: Axis) -> Option<usize> {
        match axis {
            Axis::Row => self.max_rows,
            Axis::Column => self.max_columns,
            Axis::Page => None,
        }
    }

    /// Levels shown for a hierarchy on a grid axis.
    pub fn visible_levels(
        &self,
        schema: &CubeSchema,
        hierarchy: HierarchyId,
    ) -> Result<Vec<LevelId>, CubeError> {
        let h = schema.try_hierarchy(hierarchy)?;
        let placed = self
            .rows
            .iter()
            .chain(self.columns.iter())
            .find(|a| a.hierarchy == hierarchy);
        match placed {
            Some(a) if !a.visible_levels.is_empty() => {
                // Keep hierarchy order whatever order the user listed them in.
                Ok(h.levels
                    .iter()
                    .copied()
                    .filter(|l| a.visible_levels.contains(l))
                    .collect())
            }
            _ => Ok(h.levels.clone()),
        }
    }

    /// Whether the measures hierarchy is placed explicitly on an axis.
    pub fn has_explicit_measures(&self, schema: &CubeSchema) -> bool {
        match schema.measures_hierarchy() {
            Some(m) => self.is_on_grid(m),
            None => false,
        }
    }

    /// The axis that receives the implicit measures sublevel, if any.
    pub fn implicit_measures_axis(&self, schema: &CubeSchema) -> Option<Axis> {
        if schema.measures().is_empty() || self.has_explicit_measures(schema) {
            None
        } else {
            Some(self.measure_position.axis())
        }
    }

    /// Indices of the attributes displayed for a level.
    pub fn attribute_indices(&self, schema: &CubeSchema, level: LevelId) -> Vec<usize> {
        let Some(l) = schema.level(level) else {
            return Vec::new();
        };
        self.attributes
            .iter()
            .filter(|a| a.level == level)
            .flat_map(|a| a.attributes.iter())
            .filter_map(|name| l.attributes.iter().position(|n| n == name))
            .collect()
    }

    /// Members fixed by the page axis.
    pub fn page_members(&self) -> Vec<MemberId> {
        self.pages.iter().filter_map(|p| p.member).collect()
    }
}
