//! FILENAME: tests/common/mod.rs
//! Test harness and fixtures for cross-tab integration tests.

#![allow(dead_code)]

use std::cell::RefCell;

use crosstab_engine::{
    Axis, AxisHierarchy, CrossTab, CrossTabContext, CrossTabError, CrossTabHost, CrossTabLayout,
    NodeId, SessionState,
};
use cube::{Aggregation, CubeSchema, HierarchyId, LevelId, MemberId, MemoryCube};

/// Ids of the sales cube.
#[derive(Debug, Clone)]
pub struct SalesIds {
    pub time: HierarchyId,
    pub region: HierarchyId,
    pub product: HierarchyId,
    pub year_level: LevelId,
    pub quarter_level: LevelId,
    pub region_level: LevelId,
    pub product_level: LevelId,
    /// 2023, 2024
    pub years: Vec<MemberId>,
    /// Q1..Q4 of 2023, then Q1..Q4 of 2024
    pub quarters: Vec<MemberId>,
    pub europe: MemberId,
    pub france: MemberId,
    pub germany: MemberId,
    pub america: MemberId,
    pub usa: MemberId,
    /// Apples, Pears, Plums
    pub products: Vec<MemberId>,
    pub sales: MemberId,
    pub units: MemberId,
}

/// Sales cube:
/// - Time: Year > Quarter, 2023 and 2024
/// - Region: one parent-child level, Europe (France, Germany), America (USA)
/// - Product: Apples, Pears, Plums with a Color attribute
/// - Measures: Sales, Units
///
/// Every quarter, leaf region and product has one fact with
/// Sales = (product + 1) * 10 + region and Units = 1, where product and
/// region are the 0-based positions in the lists above (France 0,
/// Germany 1, USA 2).
pub struct SalesFixture;

impl SalesFixture {
    pub fn create() -> (MemoryCube, SalesIds) {
        let mut schema = CubeSchema::new();

        let time = schema.add_hierarchy("Time");
        let year_level = schema.add_level(time, "Year").unwrap();
        let quarter_level = schema.add_level(time, "Quarter").unwrap();
        let mut years = Vec::new();
        let mut quarters = Vec::new();
        for y in ["2023", "2024"] {
            let year = schema.add_member(year_level, None, y).unwrap();
            for q in ["Q1", "Q2", "Q3", "Q4"] {
                quarters.push(schema.add_member(quarter_level, Some(year), q).unwrap());
            }
            years.push(year);
        }

        let region = schema.add_hierarchy("Region");
        let region_level = schema.add_level(region, "Region").unwrap();
        let europe = schema.add_member(region_level, None, "Europe").unwrap();
        let france = schema.add_member(region_level, Some(europe), "France").unwrap();
        let germany = schema.add_member(region_level, Some(europe), "Germany").unwrap();
        let america = schema.add_member(region_level, None, "America").unwrap();
        let usa = schema.add_member(region_level, Some(america), "USA").unwrap();

        let product = schema.add_hierarchy("Product");
        let product_level = schema.add_level(product, "Product").unwrap();
        schema.levels[product_level as usize].attributes = vec!["Color".to_string()];
        let mut products = Vec::new();
        for (name, color) in [("Apples", "Red"), ("Pears", "Green"), ("Plums", "Purple")] {
            let id = schema.add_member(product_level, None, name).unwrap();
            schema.set_attributes(id, vec![color.to_string()]).unwrap();
            products.push(id);
        }

        let mut cube = MemoryCube::new(schema);
        let sales = cube.add_measure("Sales", Aggregation::Sum).unwrap();
        let units = cube.add_measure("Units", Aggregation::Sum).unwrap();

        for &q in &quarters {
            for (r, &leaf) in [france, germany, usa].iter().enumerate() {
                for (p, &prod) in products.iter().enumerate() {
                    let value = ((p + 1) * 10 + r) as f64;
                    cube.add_fact(&[q, leaf, prod], &[value, 1.0]).unwrap();
                }
            }
        }

        let ids = SalesIds {
            time,
            region,
            product,
            year_level,
            quarter_level,
            region_level,
            product_level,
            years,
            quarters,
            europe,
            france,
            germany,
            america,
            usa,
            products,
            sales,
            units,
        };
        (cube, ids)
    }

    /// Time on rows, Product on columns, measures below the products.
    pub fn time_by_product(ids: &SalesIds) -> CrossTabLayout {
        let mut layout = CrossTabLayout::new();
        layout.rows.push(AxisHierarchy::new(ids.time));
        layout.columns.push(AxisHierarchy::new(ids.product));
        layout
    }

    /// Product on rows, Time on columns.
    pub fn product_by_time(ids: &SalesIds) -> CrossTabLayout {
        let mut layout = CrossTabLayout::new();
        layout.rows.push(AxisHierarchy::new(ids.product));
        layout.columns.push(AxisHierarchy::new(ids.time));
        layout
    }

    /// Region on rows, Product on columns.
    pub fn region_by_product(ids: &SalesIds) -> CrossTabLayout {
        let mut layout = CrossTabLayout::new();
        layout.rows.push(AxisHierarchy::new(ids.region));
        layout.columns.push(AxisHierarchy::new(ids.product));
        layout
    }
}

/// Host that records rebuild failures.
#[derive(Default)]
pub struct RecordingHost {
    pub errors: RefCell<Vec<(String, Option<String>)>>,
}

impl CrossTabHost for RecordingHost {
    fn on_rebuild_error(&self, err: &CrossTabError, last_good: Option<&str>) {
        self.errors
            .borrow_mut()
            .push((err.to_string(), last_good.map(str::to_string)));
    }
}

/// A cross-tab together with everything a rebuild needs.
pub struct TestHarness {
    pub cube: MemoryCube,
    pub ids: SalesIds,
    pub session: SessionState,
    pub host: RecordingHost,
    pub crosstab: CrossTab,
}

impl TestHarness {
    /// Builds the sales cube with `layout_fn` and runs the first rebuild.
    pub fn new(layout_fn: impl FnOnce(&SalesIds) -> CrossTabLayout) -> Self {
        let (cube, ids) = SalesFixture::create();
        let layout = layout_fn(&ids);
        let mut harness = TestHarness {
            cube,
            ids,
            session: SessionState::new(),
            host: RecordingHost::default(),
            crosstab: CrossTab::new(layout),
        };
        harness.rebuild().unwrap();
        harness
    }

    /// Runs `f` with a context over the harness state.
    pub fn with<R>(&mut self, f: impl FnOnce(&mut CrossTab, &mut CrossTabContext<'_>) -> R) -> R {
        let mut ctx = CrossTabContext::new(&mut self.cube, &mut self.session, &self.host);
        f(&mut self.crosstab, &mut ctx)
    }

    pub fn rebuild(&mut self) -> Result<(), CrossTabError> {
        self.with(|ct, ctx| ct.rebuild(ctx))
    }

    /// Caption of the cell covering `(col, row)`.
    pub fn caption(&self, col: u32, row: u32) -> String {
        use crosstab_engine::CellKind;
        match &self.crosstab.cell(col, row).unwrap().kind {
            CellKind::Level(l) => l.caption.clone(),
            CellKind::Member(m) => m.caption.clone(),
            CellKind::Data(d) => format!("{:?}", d.value),
            CellKind::Error(e) => e.message.clone(),
        }
    }

    /// Captions of the row header cells in the first header column.
    pub fn row_captions(&self) -> Vec<String> {
        let fixed = self.crosstab.fixed_rows();
        (fixed..self.crosstab.row_count())
            .map(|row| self.caption(0, row))
            .collect()
    }

    /// Captions of the innermost row header column.
    pub fn inner_row_captions(&self) -> Vec<String> {
        let fixed = self.crosstab.fixed_rows();
        let col = self.crosstab.fixed_columns() - 1;
        (fixed..self.crosstab.row_count())
            .map(|row| self.caption(col, row))
            .collect()
    }

    /// Node showing the member with this unique name.
    pub fn node_of(&mut self, axis: Axis, unique_name: &str) -> NodeId {
        self.with(|ct, ctx| ct.find_member(ctx, axis, unique_name))
            .unwrap_or_else(|| panic!("{} not on the {:?} axis", unique_name, axis))
    }

    /// Grid row of a row-axis node.
    pub fn row_of(&self, node: NodeId) -> u32 {
        self.crosstab.fixed_rows() + self.crosstab.node(Axis::Row, node).unwrap().start
    }

    pub fn value(&self, col: u32, row: u32) -> Option<f64> {
        self.crosstab.value(col, row).unwrap()
    }
}
