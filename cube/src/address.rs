//! FILENAME: cube/src/address.rs
//! Cube addresses, values and data requests.
//!
//! An address identifies one aggregate of the cube: at most one member per
//! hierarchy (hierarchies not mentioned are rolled up to "All"), plus an
//! optional measure and measure mode.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::CubeError;
use crate::schema::{CubeSchema, HierarchyId, LevelId, MemberId, MemberKind};

// ============================================================================
// VALUES
// ============================================================================

/// A value returned by the data engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum CubeValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Error(String),
}

impl CubeValue {
    /// Returns the numeric payload, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CubeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CubeValue::Empty)
    }
}

impl From<f64> for CubeValue {
    fn from(value: f64) -> Self {
        CubeValue::Number(value)
    }
}

// ============================================================================
// ADDRESS
// ============================================================================

/// A normalized cube address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CubeAddress {
    /// (hierarchy, member) pairs sorted by hierarchy, one per hierarchy.
    members: SmallVec<[(HierarchyId, MemberId); 8]>,
    measure: Option<MemberId>,
    mode: Option<MemberId>,
}

impl CubeAddress {
    /// The address of the grand total.
    pub fn all() -> Self {
        CubeAddress::default()
    }

    /// Builds an address from members given outer to inner.
    /// When a hierarchy appears more than once the deepest member wins.
    pub fn build<I>(schema: &CubeSchema, members: I) -> Result<Self, CubeError>
    where
        I: IntoIterator<Item = MemberId>,
    {
        let mut address = CubeAddress::default();
        for id in members {
            address.push(schema, id)?;
        }
        Ok(address)
    }

    /// Adds a member to the address, replacing a shallower member of the
    /// same hierarchy.
    pub fn push(&mut self, schema: &CubeSchema, id: MemberId) -> Result<(), CubeError> {
        let member = schema.try_member(id)?;
        match member.kind {
            MemberKind::Measure => {
                self.measure = Some(id);
                self.mode = None;
            }
            MemberKind::MeasureMode => {
                self.measure = member.parent;
                self.mode = Some(id);
            }
            MemberKind::Common | MemberKind::Group | MemberKind::Calculated => {
                let h = member.hierarchy;
                match self.members.binary_search_by_key(&h, |&(hh, _)| hh) {
                    Ok(pos) => {
                        let current = schema.try_member(self.members[pos].1)?;
                        if member.depth >= current.depth {
                            self.members[pos].1 = id;
                        }
                    }
                    Err(pos) => self.members.insert(pos, (h, id)),
                }
            }
        }
        Ok(())
    }

    /// Returns a copy of this address with another address merged in.
    pub fn merged(&self, schema: &CubeSchema, other: &CubeAddress) -> Result<Self, CubeError> {
        let mut out = self.clone();
        for id in other.member_ids() {
            out.push(schema, id)?;
        }
        if other.measure.is_some() {
            out.measure = other.measure;
            out.mode = other.mode;
        }
        Ok(out)
    }

    /// Non-measure members, ordered by hierarchy.
    pub fn member_ids(&self) -> impl Iterator<Item = MemberId> + '_ {
        self.members.iter().map(|&(_, m)| m)
    }

    /// The member fixed for `hierarchy`, if any.
    pub fn member_of(&self, hierarchy: HierarchyId) -> Option<MemberId> {
        self.members
            .binary_search_by_key(&hierarchy, |&(h, _)| h)
            .ok()
            .map(|pos| self.members[pos].1)
    }

    pub fn measure(&self) -> Option<MemberId> {
        self.measure
    }

    pub fn mode(&self) -> Option<MemberId> {
        self.mode
    }

    /// The same address without measure and mode.
    pub fn without_measure(&self) -> Self {
        CubeAddress {
            members: self.members.clone(),
            measure: None,
            mode: None,
        }
    }

    /// A stable textual key built from member unique names.
    pub fn key(&self, schema: &CubeSchema) -> String {
        let mut parts: Vec<&str> = self
            .member_ids()
            .filter_map(|m| schema.member(m))
            .map(|m| m.unique_name.as_str())
            .collect();
        for m in self.measure.iter().chain(self.mode.iter()) {
            if let Some(member) = schema.member(*m) {
                parts.push(member.unique_name.as_str());
            }
        }
        parts.join("|")
    }
}

// ============================================================================
// REQUESTS
// ============================================================================

/// A request for the data engine to prepare aggregates at a grain.
///
/// `path` fixes members (the slice to compute), `grain` lists the levels
/// whose members must be enumerable inside that slice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataRequest {
    pub path: SmallVec<[MemberId; 8]>,
    pub grain: SmallVec<[LevelId; 4]>,
}

impl DataRequest {
    pub fn new(path: impl IntoIterator<Item = MemberId>, grain: impl IntoIterator<Item = LevelId>) -> Self {
        let mut grain: SmallVec<[LevelId; 4]> = grain.into_iter().collect();
        grain.sort_unstable();
        grain.dedup();
        DataRequest {
            path: path.into_iter().collect(),
            grain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deepest_member_per_hierarchy_wins() {
        let mut schema = CubeSchema::new();
        let time = schema.add_hierarchy("Time");
        let year = schema.add_level(time, "Year").unwrap();
        let month = schema.add_level(time, "Month").unwrap();
        let geo = schema.add_hierarchy("Geo");
        let country = schema.add_level(geo, "Country").unwrap();
        let y = schema.add_member(year, None, "2000").unwrap();
        let jan = schema.add_member(month, Some(y), "Jan").unwrap();
        let fr = schema.add_member(country, None, "France").unwrap();

        let a = CubeAddress::build(&schema, [fr, y, jan]).unwrap();
        let b = CubeAddress::build(&schema, [jan, y, fr]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.member_of(time), Some(jan));
        assert_eq!(a.member_of(geo), Some(fr));
    }

    #[test]
    fn test_measure_mode_implies_measure() {
        let mut schema = CubeSchema::new();
        let sales = schema.add_measure("Sales").unwrap();
        let share = schema.add_measure_mode(sales, "Share").unwrap();
        let a = CubeAddress::build(&schema, [share]).unwrap();
        assert_eq!(a.measure(), Some(sales));
        assert_eq!(a.mode(), Some(share));
        assert_eq!(a.key(&schema), "[Measures].[Measures].[Sales]|[Measures].[Measures].[Sales].[Share]");
        assert_eq!(a.without_measure(), CubeAddress::all());
    }

    #[test]
    fn test_unknown_member_is_an_error() {
        let schema = CubeSchema::new();
        assert_eq!(
            CubeAddress::build(&schema, [7]),
            Err(CubeError::UnknownMember(7))
        );
    }

    #[test]
    fn test_request_grain_is_normalized() {
        let r = DataRequest::new([3, 1], [5, 2, 5]);
        assert_eq!(r.grain.as_slice(), &[2, 5]);
        assert_eq!(r.path.as_slice(), &[3, 1]);
    }
}
