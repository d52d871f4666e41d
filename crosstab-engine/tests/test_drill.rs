//! FILENAME: tests/test_drill.rs
//! Integration tests for drilling, collapsing and the update bracket.

mod common;

use common::{SalesFixture, TestHarness};
use crosstab_engine::{Axis, CrossTabError, DrillMethod, ExpandStatus, ROOT};
use cube::{CubeSource, DataRequest};

#[test]
fn test_drill_then_collapse_restores_grid() {
    let mut h = TestHarness::new(SalesFixture::time_by_product);
    let before = h.row_captions();
    let before_value = h.value(2, 3);

    let y2024 = h.node_of(Axis::Row, "[Time].[Year].[2024]");
    h.with(|ct, ctx| ct.drill(ctx, Axis::Row, y2024, DrillMethod::NextLevel))
        .unwrap();
    assert_eq!(h.session.drills.len(), 1);
    assert_eq!(h.crosstab.row_count(), 2 + 7);
    let node = h.node_of(Axis::Row, "[Time].[Year].[2024]");
    assert_eq!(h.crosstab.node(Axis::Row, node).unwrap().status, ExpandStatus::NextLevel);

    h.with(|ct, ctx| ct.collapse(ctx, Axis::Row, node)).unwrap();
    assert!(h.session.drills.is_empty());
    assert_eq!(h.row_captions(), before);
    assert_eq!(h.value(2, 3), before_value);
}

#[test]
fn test_drill_rejects_unavailable_method_and_totals() {
    let mut h = TestHarness::new(SalesFixture::time_by_product);
    let y2023 = h.node_of(Axis::Row, "[Time].[Year].[2023]");

    // Time is the only row hierarchy.
    let err = h
        .with(|ct, ctx| ct.drill(ctx, Axis::Row, y2023, DrillMethod::NextHierarchy))
        .unwrap_err();
    assert!(matches!(err, CrossTabError::InvalidDrill(_)));

    let total = *h.crosstab.tree(Axis::Row).unwrap().root().children.last().unwrap();
    let err = h
        .with(|ct, ctx| ct.drill(ctx, Axis::Row, total, DrillMethod::NextLevel))
        .unwrap_err();
    assert!(matches!(err, CrossTabError::InvalidDrill(_)));

    let err = h
        .with(|ct, ctx| ct.collapse(ctx, Axis::Row, 9999))
        .unwrap_err();
    assert!(matches!(err, CrossTabError::UnknownNode { axis: Axis::Row, node: 9999 }));
    assert!(h.session.drills.is_empty());
}

#[test]
fn test_expand_all_and_collapse_all() {
    let mut h = TestHarness::new(SalesFixture::time_by_product);
    let year = h.ids.year_level;
    h.with(|ct, ctx| ct.expand_all(ctx, year, DrillMethod::NextLevel))
        .unwrap();
    assert_eq!(h.session.drills.len(), 1);
    assert!(h.session.drills.records()[0].is_all());
    // Two years of four quarters, two year totals, the grand total.
    assert_eq!(h.crosstab.row_count() - h.crosstab.fixed_rows(), 11);

    h.with(|ct, ctx| ct.collapse_all(ctx, year)).unwrap();
    assert_eq!(h.row_captions(), vec!["2023", "2024", "Grand Total"]);
}

#[test]
fn test_collapse_under_expand_all_adds_exception() {
    let mut h = TestHarness::new(SalesFixture::time_by_product);
    let year = h.ids.year_level;
    h.with(|ct, ctx| ct.expand_all(ctx, year, DrillMethod::NextLevel))
        .unwrap();

    let y2023 = h.node_of(Axis::Row, "[Time].[Year].[2023]");
    h.with(|ct, ctx| ct.collapse(ctx, Axis::Row, y2023)).unwrap();
    let record = &h.session.drills.records()[0];
    assert!(record.exceptions.contains(&h.ids.years[0]));
    assert_eq!(
        h.inner_row_captions(),
        vec!["2023", "Q1", "Q2", "Q3", "Q4", "2024 Total", "Grand Total"]
    );
}

#[test]
fn test_update_bracket_rebuilds_once_and_promotes() {
    let mut h = TestHarness::new(SalesFixture::time_by_product);
    let first = h.crosstab.generation().unwrap().id;
    let y2023 = h.node_of(Axis::Row, "[Time].[Year].[2023]");
    let y2024 = h.node_of(Axis::Row, "[Time].[Year].[2024]");

    h.with(|ct, ctx| -> Result<(), CrossTabError> {
        ct.begin_update(ctx);
        ct.drill(ctx, Axis::Row, y2023, DrillMethod::NextLevel)?;
        ct.drill(ctx, Axis::Row, y2024, DrillMethod::NextLevel)?;
        assert!(ct.is_updating());
        ct.end_update(ctx)
    })
    .unwrap();

    assert_eq!(h.crosstab.generation().unwrap().id, first + 1);
    // Both years drilled explicitly: folded into one all-record.
    assert_eq!(h.session.drills.len(), 1);
    assert!(h.session.drills.records()[0].is_all());
    assert!(h.session.drills.records()[0].exceptions.is_empty());
    assert_eq!(h.crosstab.row_count() - h.crosstab.fixed_rows(), 11);

    let quarter = h.ids.quarter_level;
    assert!(h
        .cube
        .submitted_requests()
        .contains(&DataRequest::new(std::iter::empty(), [quarter])));
}

#[test]
fn test_parent_child_expand_all_uses_shown_members() {
    let mut h = TestHarness::new(SalesFixture::region_by_product);
    let level = h.ids.region_level;
    h.with(|ct, ctx| ct.expand_all(ctx, level, DrillMethod::ParentChild))
        .unwrap();

    // Europe and America each get an explicit record.
    assert_eq!(h.session.drills.len(), 2);
    assert!(h.session.drills.records().iter().all(|r| !r.is_all()));
    assert_eq!(
        h.inner_row_captions(),
        vec!["France", "Germany", "Europe Total", "USA", "America Total", "Grand Total"]
    );
    let rows = h.crosstab.tree(Axis::Row).unwrap();
    assert!(rows
        .member_children(ROOT)
        .all(|n| n.status == ExpandStatus::ParentChild));
    assert!(h.cube.schema().level(level).unwrap().fetched);
}

#[test]
fn test_column_drill_into_next_hierarchy() {
    // Product then Time on columns, nothing on rows.
    let mut h = TestHarness::new(|ids| {
        let mut layout = SalesFixture::time_by_product(ids);
        layout.rows.clear();
        layout.columns.push(crosstab_engine::AxisHierarchy::new(ids.time));
        layout
    });
    let apples = h.node_of(Axis::Column, "[Product].[Product].[Apples]");
    let node = h.crosstab.node(Axis::Column, apples).unwrap();
    assert!(node.drills.iter().any(|d| d.method == DrillMethod::NextHierarchy));
    assert_eq!(node.status, ExpandStatus::Collapsed);

    h.with(|ct, ctx| ct.drill(ctx, Axis::Column, apples, DrillMethod::NextHierarchy))
        .unwrap();
    let apples = h.node_of(Axis::Column, "[Product].[Product].[Apples]");
    let columns = h.crosstab.tree(Axis::Column).unwrap();
    let captions: Vec<&str> = columns
        .node(apples)
        .unwrap()
        .children
        .iter()
        .map(|&c| columns.node(c).unwrap().caption.as_str())
        .collect();
    assert_eq!(captions, vec!["2023", "2024", "Apples Total"]);
}

#[test]
fn test_inner_hierarchy_drills_stay_under_their_parent() {
    // Product then Time on rows, Region on columns.
    let mut h = TestHarness::new(|ids| {
        let mut layout = SalesFixture::product_by_time(ids);
        layout.rows.push(crosstab_engine::AxisHierarchy::new(ids.time));
        layout.columns.clear();
        layout.columns.push(crosstab_engine::AxisHierarchy::new(ids.region));
        layout
    });
    for name in ["[Product].[Product].[Apples]", "[Product].[Product].[Pears]"] {
        let node = h.node_of(Axis::Row, name);
        h.with(|ct, ctx| ct.drill(ctx, Axis::Row, node, DrillMethod::NextHierarchy))
            .unwrap();
    }

    let apples = h.node_of(Axis::Row, "[Product].[Product].[Apples]");
    let apple_years: Vec<_> = h
        .crosstab
        .tree(Axis::Row)
        .unwrap()
        .member_children(apples)
        .map(|n| n.id)
        .collect();
    assert_eq!(apple_years.len(), 2);

    h.with(|ct, ctx| -> Result<(), CrossTabError> {
        ct.begin_update(ctx);
        for &year in &apple_years {
            ct.drill(ctx, Axis::Row, year, DrillMethod::NextLevel)?;
        }
        ct.end_update(ctx)
    })
    .unwrap();

    // Every year is drilled, but only under Apples.
    let year_records: Vec<_> = h
        .session
        .drills
        .records()
        .iter()
        .filter(|r| r.parent_level == h.ids.year_level)
        .collect();
    assert_eq!(year_records.len(), 2);
    assert!(year_records.iter().all(|r| !r.is_all()));

    let rows = h.crosstab.tree(Axis::Row).unwrap();
    let quarter_nodes = rows
        .nodes()
        .filter(|n| n.member.map_or(false, |m| h.ids.quarters.contains(&m)))
        .count();
    assert_eq!(quarter_nodes, 8);

    let pears = h.node_of(Axis::Row, "[Product].[Product].[Pears]");
    let rows = h.crosstab.tree(Axis::Row).unwrap();
    assert!(rows
        .member_children(pears)
        .all(|n| n.status == ExpandStatus::Collapsed));
}
