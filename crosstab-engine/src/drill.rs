//! FILENAME: crosstab-engine/src/drill.rs
//! Drill Registry - the persistent record of user expansions.
//!
//! A `DrillRecord` says "members of ParentLevel reached by Path are expanded
//! to show Level". An empty path means every member of ParentLevel is
//! expanded except the listed exceptions. The registry survives rebuilds;
//! output trees are rebuilt from it every time.
//!
//! `optimize` keeps the registry small:
//! - records that can no longer resolve are dropped
//! - explicit records covered by an all-record are folded into it
//! - clusters covering nearly every member are promoted to an all-record
//! - all-records with too many exceptions are decomposed again

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use cube::{CubeError, CubeSchema, LevelId, MemberId};

use crate::definition::CrossTabLayout;
use crate::error::CrossTabError;
use crate::node::DrillOption;

/// Share of ParentLevel members that explicit records must cover before the
/// cluster is replaced by a single all-record.
pub const PROMOTE_RATIO: f64 = 0.99;

/// Share of ParentLevel members excluded from an all-record above which it
/// is replaced by explicit records again.
pub const DECOMPOSE_RATIO: f64 = 0.5;

// ============================================================================
// METHOD
// ============================================================================

/// How a node is expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DrillMethod {
    /// Reveal same-level children of a parent-child member.
    ParentChild,
    /// Reveal the next level of the same hierarchy.
    NextLevel,
    /// Reveal the first level of the next hierarchy on the axis.
    NextHierarchy,
}

impl DrillMethod {
    /// Derives the method from a (ParentLevel, Level) pair.
    pub fn between(
        schema: &CubeSchema,
        parent_level: LevelId,
        level: LevelId,
    ) -> Result<DrillMethod, CubeError> {
        if parent_level == level {
            return Ok(DrillMethod::ParentChild);
        }
        let p = schema.try_level(parent_level)?;
        let l = schema.try_level(level)?;
        if p.hierarchy == l.hierarchy {
            Ok(DrillMethod::NextLevel)
        } else {
            Ok(DrillMethod::NextHierarchy)
        }
    }
}

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrillRecord {
    pub parent_level: LevelId,
    pub level: LevelId,
    /// Member path from the axis root to the expanded member. Empty means
    /// "all members of ParentLevel".
    pub path: SmallVec<[MemberId; 8]>,
    /// Members excluded from an all-record.
    pub exceptions: BTreeSet<MemberId>,
}

impl DrillRecord {
    pub fn explicit(parent_level: LevelId, level: LevelId, path: &[MemberId]) -> Self {
        DrillRecord {
            parent_level,
            level,
            path: SmallVec::from_slice(path),
            exceptions: BTreeSet::new(),
        }
    }

    /// An all-record. Parent-child drills have no all form.
    pub fn all(parent_level: LevelId, level: LevelId) -> Result<Self, CrossTabError> {
        if parent_level == level {
            return Err(CrossTabError::InvalidDrill(format!(
                "level {} cannot be expanded all at once into itself",
                level
            )));
        }
        Ok(DrillRecord {
            parent_level,
            level,
            path: SmallVec::new(),
            exceptions: BTreeSet::new(),
        })
    }

    pub fn is_all(&self) -> bool {
        self.path.is_empty()
    }

    pub fn method(&self, schema: &CubeSchema) -> Result<DrillMethod, CubeError> {
        DrillMethod::between(schema, self.parent_level, self.level)
    }

    /// True if the record expands the node reached by `path` into `level`.
    pub fn matches(&self, level: LevelId, path: &[MemberId]) -> bool {
        if self.level != level {
            return false;
        }
        if self.is_all() {
            path.last().map_or(false, |m| !self.exceptions.contains(m))
        } else {
            self.path.as_slice() == path
        }
    }

    fn is_resolvable(&self, schema: &CubeSchema, layout: &CrossTabLayout) -> bool {
        let (Some(p), Some(l)) = (schema.level(self.parent_level), schema.level(self.level)) else {
            return false;
        };
        if self.is_all() && self.parent_level == self.level {
            return false;
        }
        layout.is_on_grid(p.hierarchy)
            && layout.is_on_grid(l.hierarchy)
            && self.path.iter().all(|&m| schema.member(m).is_some())
    }

    /// Serializable form keyed by unique names.
    pub fn to_state(&self, schema: &CubeSchema) -> Option<DrillRecordState> {
        let name = |m: &MemberId| schema.member(*m).map(|m| m.unique_name.clone());
        Some(DrillRecordState {
            parent_level: schema.level(self.parent_level)?.unique_name.clone(),
            level: schema.level(self.level)?.unique_name.clone(),
            path: self.path.iter().map(name).collect::<Option<Vec<_>>>()?,
            exceptions: self.exceptions.iter().map(name).collect::<Option<Vec<_>>>()?,
        })
    }
}

/// A drill record as stored in a session snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrillRecordState {
    pub parent_level: String,
    pub level: String,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub exceptions: Vec<String>,
}

impl DrillRecordState {
    /// Resolves unique names against the schema. Exceptions that no longer
    /// exist are ignored; any other unresolved name voids the record.
    pub fn resolve(&self, schema: &CubeSchema) -> Option<DrillRecord> {
        let parent_level = schema.level_by_unique_name(&self.parent_level)?.id;
        let level = schema.level_by_unique_name(&self.level)?.id;
        let path = self
            .path
            .iter()
            .map(|n| schema.member_by_unique_name(n).map(|m| m.id))
            .collect::<Option<SmallVec<[MemberId; 8]>>>()?;
        if path.is_empty() && parent_level == level {
            return None;
        }
        let exceptions = self
            .exceptions
            .iter()
            .filter_map(|n| schema.member_by_unique_name(n).map(|m| m.id))
            .collect();
        Some(DrillRecord {
            parent_level,
            level,
            path,
            exceptions,
        })
    }
}

/// What an `optimize` pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeReport {
    pub dropped: usize,
    pub folded: usize,
    pub promoted: usize,
    pub decomposed: usize,
}

impl OptimizeReport {
    pub fn is_noop(&self) -> bool {
        *self == OptimizeReport::default()
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct DrillRegistry {
    records: Vec<DrillRecord>,
    batch_depth: u32,
}

impl DrillRegistry {
    pub fn new() -> Self {
        DrillRegistry::default()
    }

    pub fn records(&self) -> &[DrillRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub(crate) fn push(&mut self, record: DrillRecord) {
        self.records.push(record);
    }

    // ------------------------------------------------------------------
    // Batches
    // ------------------------------------------------------------------

    pub fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    pub fn end_batch(&mut self) {
        self.batch_depth = self.batch_depth.saturating_sub(1);
    }

    pub fn in_batch(&self) -> bool {
        self.batch_depth > 0
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    /// Expands the node reached by `path` (ending on a member of
    /// `parent_level`) into `level`. Records of other methods on the same
    /// node are replaced.
    pub fn drill(
        &mut self,
        schema: &CubeSchema,
        parent_level: LevelId,
        level: LevelId,
        path: &[MemberId],
    ) -> Result<DrillMethod, CrossTabError> {
        let method = DrillMethod::between(schema, parent_level, level)?;
        let Some(&member) = path.last() else {
            return Err(CrossTabError::InvalidDrill("empty node path".to_string()));
        };

        self.records
            .retain(|r| !(r.parent_level == parent_level && r.path.as_slice() == path));

        let mut covered = false;
        for r in self.records.iter_mut().filter(|r| r.parent_level == parent_level && r.is_all()) {
            if r.level == level {
                r.exceptions.remove(&member);
                covered = true;
            } else {
                r.exceptions.insert(member);
            }
        }
        if !covered {
            self.records.push(DrillRecord::explicit(parent_level, level, path));
        }
        debug!("drill {:?} {:?} -> level {}", method, path, level);
        Ok(method)
    }

    /// Collapses the node reached by `path` (ending on a member of
    /// `parent_level`).
    pub fn collapse(&mut self, parent_level: LevelId, path: &[MemberId]) {
        self.records
            .retain(|r| !(r.parent_level == parent_level && r.path.as_slice() == path));
        if let Some(&member) = path.last() {
            for r in self.records.iter_mut().filter(|r| r.parent_level == parent_level && r.is_all()) {
                r.exceptions.insert(member);
            }
        }
    }

    /// Expands every member of `parent_level` into `level`.
    pub fn expand_all(&mut self, parent_level: LevelId, level: LevelId) -> Result<(), CrossTabError> {
        let record = DrillRecord::all(parent_level, level)?;
        self.records.retain(|r| r.parent_level != parent_level);
        self.records.push(record);
        Ok(())
    }

    /// Removes every expansion of members of `parent_level`.
    pub fn collapse_all(&mut self, parent_level: LevelId) {
        self.records.retain(|r| r.parent_level != parent_level);
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Groups records by ParentLevel for the duration of a build.
    pub fn index(&self) -> DrillIndex<'_> {
        let mut by_parent: FxHashMap<LevelId, Vec<&DrillRecord>> = FxHashMap::default();
        for r in &self.records {
            by_parent.entry(r.parent_level).or_default().push(r);
        }
        DrillIndex { by_parent }
    }

    // ------------------------------------------------------------------
    // Optimization
    // ------------------------------------------------------------------

    /// Compresses the registry. Does nothing while a batch is open.
    pub fn optimize(&mut self, schema: &CubeSchema, layout: &CrossTabLayout) -> OptimizeReport {
        let mut report = OptimizeReport::default();
        if self.in_batch() {
            return report;
        }

        let before = self.records.len();
        self.records.retain(|r| r.is_resolvable(schema, layout));
        report.dropped = before - self.records.len();

        let mut clusters: BTreeMap<(LevelId, LevelId), Vec<DrillRecord>> = BTreeMap::new();
        for r in self.records.drain(..) {
            clusters.entry((r.parent_level, r.level)).or_default().push(r);
        }

        let mut out = Vec::new();
        for ((parent_level, level), records) in clusters {
            let (alls, explicit): (Vec<_>, Vec<_>) = records.into_iter().partition(|r| r.is_all());
            let merged = alls.into_iter().reduce(|mut a, b| {
                a.exceptions = a.exceptions.intersection(&b.exceptions).copied().collect();
                a
            });

            match merged {
                Some(mut all) => {
                    for r in &explicit {
                        if let Some(m) = r.path.last() {
                            all.exceptions.remove(m);
                        }
                    }
                    report.folded += explicit.len();
                    match decompose(schema, layout, &all) {
                        Some(records) => {
                            report.decomposed += 1;
                            out.extend(records);
                        }
                        None => out.push(all),
                    }
                }
                None => match promote(schema, layout, parent_level, level, &explicit) {
                    Some(all) => {
                        report.promoted += 1;
                        out.push(all);
                    }
                    None => out.extend(explicit),
                },
            }
        }
        self.records = out;

        if !report.is_noop() {
            info!("drill registry optimized: {:?}", report);
        }
        report
    }
}

/// Visible member count of a level.
fn member_count(schema: &CubeSchema, level: LevelId) -> usize {
    schema.level(level).map_or(0, |l| {
        l.members
            .iter()
            .filter(|&&m| schema.member(m).map_or(false, |m| m.visible))
            .count()
    })
}

/// Replaces a cluster of explicit records with one all-record when it
/// covers nearly every member of ParentLevel. Only members of an outermost
/// hierarchy qualify: deeper in the axis the same member repeats under
/// every outer member, and the all-record would expand all of them.
fn promote(
    schema: &CubeSchema,
    layout: &CrossTabLayout,
    parent_level: LevelId,
    level: LevelId,
    explicit: &[DrillRecord],
) -> Option<DrillRecord> {
    if parent_level == level || explicit.is_empty() {
        return None;
    }
    if !layout.is_outermost(schema.level(parent_level)?.hierarchy) {
        return None;
    }
    let count = member_count(schema, parent_level);
    if count == 0 {
        return None;
    }
    let covered: BTreeSet<MemberId> = explicit.iter().filter_map(|r| r.path.last().copied()).collect();
    if (covered.len() as f64) < PROMOTE_RATIO * count as f64 {
        return None;
    }
    let mut all = DrillRecord::all(parent_level, level).ok()?;
    if let Some(l) = schema.level(parent_level) {
        all.exceptions = l
            .members
            .iter()
            .copied()
            .filter(|m| !covered.contains(m) && schema.member(*m).map_or(false, |m| m.visible))
            .collect();
    }
    Some(all)
}

fn decompose(schema: &CubeSchema, layout: &CrossTabLayout, all: &DrillRecord) -> Option<Vec<DrillRecord>> {
    let count = member_count(schema, all.parent_level);
    if count == 0 || (all.exceptions.len() as f64) <= DECOMPOSE_RATIO * count as f64 {
        return None;
    }
    let level = schema.level(all.parent_level)?;
    if !layout.is_outermost(level.hierarchy) {
        debug!(
            "all-record on level {} excludes {} of {} members; kept, paths are not derivable below the outer hierarchy",
            all.parent_level,
            all.exceptions.len(),
            count
        );
        return None;
    }
    let mut records = Vec::new();
    for &m in &level.members {
        if all.exceptions.contains(&m) || !schema.member(m).map_or(false, |m| m.visible) {
            continue;
        }
        let path = outer_path(schema, layout, m)?;
        records.push(DrillRecord::explicit(all.parent_level, all.level, &path));
    }
    Some(records)
}

/// Axis path of a member of the outermost hierarchy: its visible ancestors
/// followed by the member itself.
pub(crate) fn outer_path(
    schema: &CubeSchema,
    layout: &CrossTabLayout,
    member: MemberId,
) -> Option<SmallVec<[MemberId; 8]>> {
    let m = schema.member(member)?;
    let visible = layout.visible_levels(schema, m.hierarchy).ok()?;
    let mut path = SmallVec::new();
    let mut current = Some(member);
    while let Some(id) = current {
        let node = schema.member(id)?;
        if visible.contains(&node.level) {
            path.push(id);
        }
        current = node.parent;
    }
    path.reverse();
    Some(path)
}

/// Records grouped by ParentLevel.
pub struct DrillIndex<'a> {
    by_parent: FxHashMap<LevelId, Vec<&'a DrillRecord>>,
}

impl DrillIndex<'_> {
    /// First option (in the given priority order) a record expands the
    /// node into.
    pub fn find(&self, parent_level: LevelId, path: &[MemberId], options: &[DrillOption]) -> Option<DrillOption> {
        let records = self.by_parent.get(&parent_level)?;
        options
            .iter()
            .copied()
            .find(|o| records.iter().any(|r| r.matches(o.level, path)))
    }
}
