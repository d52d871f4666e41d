//! FILENAME: cube/src/memory.rs
//! Memory Cube - An in-memory implementation of `CubeSource`.
//!
//! The memory cube is designed for:
//! - Hosts without an external OLAP engine
//! - Deterministic tests of the cross-tab engine
//!
//! Architecture:
//! - Fact records store one leaf member per hierarchy plus measure values
//! - Aggregates are computed lazily per address and memoized until the
//!   facts change
//! - Levels can be deferred to emulate engines that materialize members
//!   on demand

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::address::{CubeAddress, CubeValue, DataRequest};
use crate::error::CubeError;
use crate::schema::{CubeSchema, HierarchyId, LevelId, MemberId};
use crate::source::CubeSource;

// ============================================================================
// AGGREGATION
// ============================================================================

/// Supported aggregation functions for measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Aggregation {
    #[default]
    Sum,
    Count,
    Average,
    Min,
    Max,
    Var,
    StdDev,
}

/// How a measure mode transforms the raw aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ShowValuesAs {
    #[default]
    Normal,
    PercentOfGrandTotal,
}

/// Running state for one measure over one address.
/// Variance uses Welford's algorithm for numerical stability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Accumulator {
    pub sum: f64,
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    mean: f64,
    m2: f64,
}

impl Accumulator {
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));

        let delta = value - self.mean;
        self.mean += delta / (self.count as f64);
        self.m2 += delta * (value - self.mean);
    }

    /// Final value, or `None` when nothing was accumulated.
    pub fn compute(&self, aggregation: Aggregation) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as f64;
        Some(match aggregation {
            Aggregation::Sum => self.sum,
            Aggregation::Count => n,
            Aggregation::Average => self.sum / n,
            Aggregation::Min => self.min.unwrap_or(0.0),
            Aggregation::Max => self.max.unwrap_or(0.0),
            Aggregation::Var => {
                if self.count > 1 {
                    self.m2 / (n - 1.0)
                } else {
                    0.0
                }
            }
            Aggregation::StdDev => {
                if self.count > 1 {
                    (self.m2 / (n - 1.0)).sqrt()
                } else {
                    0.0
                }
            }
        })
    }
}

// ============================================================================
// FACTS
// ============================================================================

/// One fact row: a leaf coordinate per hierarchy and one value per measure.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FactRecord {
    coords: SmallVec<[(HierarchyId, MemberId); 8]>,
    values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MeasureDef {
    member: MemberId,
    aggregation: Aggregation,
}

/// Statistics about the cube, useful in tests and benches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CubeStats {
    pub fact_count: usize,
    pub aggregate_groups: usize,
    pub value_lookups: usize,
    pub submitted_requests: usize,
    pub member_fetches: usize,
}

// ============================================================================
// MEMORY CUBE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryCube {
    schema: CubeSchema,
    measures: Vec<MeasureDef>,
    modes: FxHashMap<MemberId, ShowValuesAs>,
    records: Vec<FactRecord>,
    /// Memoized accumulators keyed by measure-less address.
    aggregates: FxHashMap<CubeAddress, Vec<Accumulator>>,
    /// Members of deferred levels, restored by `ensure_members`.
    pending: FxHashMap<LevelId, Vec<MemberId>>,
    requests: Vec<DataRequest>,
    offline: bool,
    pub stats: CubeStats,
}

impl MemoryCube {
    pub fn new(schema: CubeSchema) -> Self {
        MemoryCube {
            schema,
            ..MemoryCube::default()
        }
    }

    /// Mutable schema access. Invalidates memoized aggregates.
    pub fn schema_mut(&mut self) -> &mut CubeSchema {
        self.aggregates.clear();
        &mut self.schema
    }

    /// Registers a measure with its aggregation function.
    pub fn add_measure(
        &mut self,
        name: impl Into<String>,
        aggregation: Aggregation,
    ) -> Result<MemberId, CubeError> {
        let member = self.schema.add_measure(name)?;
        self.measures.push(MeasureDef { member, aggregation });
        for record in &mut self.records {
            record.values.push(None);
        }
        Ok(member)
    }

    /// Registers a display mode under a measure.
    pub fn add_measure_mode(
        &mut self,
        measure: MemberId,
        name: impl Into<String>,
        show_as: ShowValuesAs,
    ) -> Result<MemberId, CubeError> {
        let mode = self.schema.add_measure_mode(measure, name)?;
        self.modes.insert(mode, show_as);
        Ok(mode)
    }

    /// Adds a fact row. `values` is aligned with measure registration order.
    pub fn add_fact(&mut self, coords: &[MemberId], values: &[f64]) -> Result<(), CubeError> {
        if values.len() != self.measures.len() {
            return Err(CubeError::MeasureCountMismatch {
                expected: self.measures.len(),
                got: values.len(),
            });
        }
        let mut pairs: SmallVec<[(HierarchyId, MemberId); 8]> = SmallVec::new();
        for &id in coords {
            let member = self.schema.try_member(id)?;
            pairs.push((member.hierarchy, id));
        }
        pairs.sort_unstable();
        self.records.push(FactRecord {
            coords: pairs,
            values: values.iter().copied().map(Some).collect(),
        });
        self.stats.fact_count = self.records.len();
        self.aggregates.clear();
        Ok(())
    }

    /// Hides the members of `level` until `ensure_members` is called.
    pub fn defer_level(&mut self, level: LevelId) -> Result<(), CubeError> {
        let l = self
            .schema
            .level_mut(level)
            .ok_or(CubeError::UnknownLevel(level))?;
        let members = std::mem::take(&mut l.members);
        l.fetched = false;
        self.pending.entry(level).or_default().extend(members);
        Ok(())
    }

    /// Simulates an unreachable engine: value lookups fail while set.
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    /// Requests submitted so far.
    pub fn submitted_requests(&self) -> &[DataRequest] {
        &self.requests
    }

    pub fn clear_requests(&mut self) {
        self.requests.clear();
    }

    fn record_matches(&self, record: &FactRecord, address: &CubeAddress) -> bool {
        address.member_ids().all(|m| {
            let Some(member) = self.schema.member(m) else {
                return false;
            };
            match record
                .coords
                .binary_search_by_key(&member.hierarchy, |&(h, _)| h)
            {
                Ok(pos) => self.schema.is_ancestor_or_self(m, record.coords[pos].1),
                Err(_) => false,
            }
        })
    }

    /// Gets or computes the accumulators for a measure-less address.
    fn accumulators(&mut self, address: &CubeAddress) -> &[Accumulator] {
        let key = address.without_measure();
        if !self.aggregates.contains_key(&key) {
            let mut accs = vec![Accumulator::default(); self.measures.len()];
            for record in self.records.iter().filter(|r| self.record_matches(r, &key)) {
                for (acc, value) in accs.iter_mut().zip(record.values.iter()) {
                    if let Some(v) = value {
                        acc.add(*v);
                    }
                }
            }
            self.aggregates.insert(key.clone(), accs);
            self.stats.aggregate_groups = self.aggregates.len();
        }
        self.aggregates.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn measure_index(&self, measure: Option<MemberId>) -> Option<usize> {
        match measure {
            Some(m) => self.measures.iter().position(|d| d.member == m),
            None if !self.measures.is_empty() => Some(0),
            None => None,
        }
    }

    fn compute_value(&mut self, address: &CubeAddress) -> Result<CubeValue, CubeError> {
        if self.offline {
            return Err(CubeError::Fetch("cube is offline".to_string()));
        }
        let Some(index) = self.measure_index(address.measure()) else {
            return Ok(CubeValue::Empty);
        };
        let aggregation = self.measures[index].aggregation;
        let raw = self
            .accumulators(address)
            .get(index)
            .and_then(|acc| acc.compute(aggregation));
        let Some(raw) = raw else {
            return Ok(CubeValue::Empty);
        };
        let show_as = address
            .mode()
            .and_then(|m| self.modes.get(&m).copied())
            .unwrap_or_default();
        match show_as {
            ShowValuesAs::Normal => Ok(CubeValue::Number(raw)),
            ShowValuesAs::PercentOfGrandTotal => {
                let grand = self
                    .accumulators(&CubeAddress::all())
                    .get(index)
                    .and_then(|acc| acc.compute(aggregation))
                    .unwrap_or(0.0);
                Ok(CubeValue::Number(if grand != 0.0 { raw / grand } else { 0.0 }))
            }
        }
    }
}

impl CubeSource for MemoryCube {
    fn schema(&self) -> &CubeSchema {
        &self.schema
    }

    fn ensure_members(&mut self, level: LevelId) -> Result<(), CubeError> {
        let l = self
            .schema
            .level_mut(level)
            .ok_or(CubeError::UnknownLevel(level))?;
        if l.fetched {
            return Ok(());
        }
        if let Some(members) = self.pending.remove(&level) {
            l.members.extend(members);
            l.members.sort_unstable();
        }
        l.fetched = true;
        self.stats.member_fetches += 1;
        Ok(())
    }

    fn has_data(&mut self, address: &CubeAddress) -> Result<bool, CubeError> {
        Ok(self.accumulators(address).iter().any(|acc| acc.count > 0))
    }

    fn submit(&mut self, requests: &[DataRequest]) -> Result<(), CubeError> {
        self.requests.extend_from_slice(requests);
        self.stats.submitted_requests += requests.len();
        Ok(())
    }

    fn values(&mut self, addresses: &[CubeAddress]) -> Result<Vec<CubeValue>, CubeError> {
        self.stats.value_lookups += addresses.len();
        addresses.iter().map(|a| self.compute_value(a)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_cube() -> (MemoryCube, [MemberId; 4], MemberId) {
        let mut schema = CubeSchema::new();
        let geo = schema.add_hierarchy("Region");
        let region = schema.add_level(geo, "Region").unwrap();
        let north = schema.add_member(region, None, "North").unwrap();
        let south = schema.add_member(region, None, "South").unwrap();
        let prod = schema.add_hierarchy("Product");
        let product = schema.add_level(prod, "Product").unwrap();
        let apples = schema.add_member(product, None, "Apples").unwrap();
        let oranges = schema.add_member(product, None, "Oranges").unwrap();

        let mut cube = MemoryCube::new(schema);
        let sales = cube.add_measure("Sales", Aggregation::Sum).unwrap();
        cube.add_fact(&[north, apples], &[100.0]).unwrap();
        cube.add_fact(&[north, oranges], &[150.0]).unwrap();
        cube.add_fact(&[south, apples], &[200.0]).unwrap();
        cube.add_fact(&[south, oranges], &[250.0]).unwrap();
        (cube, [north, south, apples, oranges], sales)
    }

    #[test]
    fn test_rollups_and_cells() {
        let (mut cube, [north, _, apples, _], sales) = create_test_cube();
        let all = CubeAddress::build(cube.schema(), [sales]).unwrap();
        assert_eq!(cube.value(&all).unwrap(), CubeValue::Number(700.0));

        let north_addr = CubeAddress::build(cube.schema(), [north, sales]).unwrap();
        assert_eq!(cube.value(&north_addr).unwrap(), CubeValue::Number(250.0));

        let cell = CubeAddress::build(cube.schema(), [north, apples, sales]).unwrap();
        assert_eq!(cube.value(&cell).unwrap(), CubeValue::Number(100.0));
    }

    #[test]
    fn test_missing_combination_is_empty() {
        let mut schema = CubeSchema::new();
        let h = schema.add_hierarchy("H");
        let l = schema.add_level(h, "L").unwrap();
        let a = schema.add_member(l, None, "A").unwrap();
        let b = schema.add_member(l, None, "B").unwrap();
        let mut cube = MemoryCube::new(schema);
        cube.add_measure("M", Aggregation::Sum).unwrap();
        cube.add_fact(&[a], &[1.0]).unwrap();

        let addr_b = CubeAddress::build(cube.schema(), [b]).unwrap();
        assert!(!cube.has_data(&addr_b).unwrap());
        assert_eq!(cube.value(&addr_b).unwrap(), CubeValue::Empty);
    }

    #[test]
    fn test_percent_of_grand_total_mode() {
        let (mut cube, [_, south, _, _], sales) = create_test_cube();
        let share = cube
            .add_measure_mode(sales, "Share", ShowValuesAs::PercentOfGrandTotal)
            .unwrap();
        let addr = CubeAddress::build(cube.schema(), [south, share]).unwrap();
        let value = cube.value(&addr).unwrap().as_number().unwrap();
        assert!((value - 450.0 / 700.0).abs() < 1e-9);
    }

    #[test]
    fn test_average_and_variance() {
        let mut acc = Accumulator::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            acc.add(v);
        }
        assert_eq!(acc.compute(Aggregation::Average), Some(5.0));
        assert_eq!(acc.compute(Aggregation::Min), Some(2.0));
        assert_eq!(acc.compute(Aggregation::Max), Some(9.0));
        let var = acc.compute(Aggregation::Var).unwrap();
        assert!((var - 32.0 / 7.0).abs() < 1e-9);
        assert_eq!(Accumulator::default().compute(Aggregation::Sum), None);
    }

    #[test]
    fn test_deferred_level_materializes_on_demand() {
        let (mut cube, _, _) = create_test_cube();
        let level = cube.schema().level_by_unique_name("[Product].[Product]").unwrap().id;
        cube.defer_level(level).unwrap();
        assert!(cube.schema().level(level).unwrap().members.is_empty());
        assert!(!cube.schema().level(level).unwrap().fetched);

        cube.ensure_members(level).unwrap();
        assert_eq!(cube.schema().level(level).unwrap().members.len(), 2);
        assert_eq!(cube.stats.member_fetches, 1);
        cube.ensure_members(level).unwrap();
        assert_eq!(cube.stats.member_fetches, 1);
    }

    #[test]
    fn test_offline_cube_fails_lookups() {
        let (mut cube, _, sales) = create_test_cube();
        cube.set_offline(true);
        let addr = CubeAddress::build(cube.schema(), [sales]).unwrap();
        assert!(matches!(cube.value(&addr), Err(CubeError::Fetch(_))));
    }

    #[test]
    fn test_fact_width_is_checked() {
        let (mut cube, [north, ..], _) = create_test_cube();
        assert_eq!(
            cube.add_fact(&[north], &[1.0, 2.0]),
            Err(CubeError::MeasureCountMismatch { expected: 1, got: 2 })
        );
    }
}
