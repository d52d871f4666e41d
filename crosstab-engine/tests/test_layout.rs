//! FILENAME: tests/test_layout.rs
//! Integration tests for grid geometry and the cell façade.

mod common;

use std::rc::Rc;

use common::{SalesFixture, TestHarness};
use crosstab_engine::{
    Axis, CellKind, CrossTab, CrossTabError, DisplayMode, DrillMethod, LevelAttributes, MemberRole,
    NodeTree,
};
use cube::TotalAppearance;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Checks that every non-leaf tabular node spans exactly its children.
fn assert_children_span_sum(tree: &NodeTree) {
    for node in tree.nodes() {
        if node.is_leaf() || node.indented {
            continue;
        }
        let sum: u32 = node
            .children
            .iter()
            .map(|&c| tree.node(c).unwrap().span)
            .sum();
        assert_eq!(node.span, sum, "node {} ({})", node.id, node.caption);
    }
}

/// Checks that every header coordinate is covered by a member cell whose
/// anchor and spans contain it.
fn assert_headers_covered(h: &TestHarness) {
    let ct = &h.crosstab;
    for row in ct.fixed_rows()..ct.row_count() {
        for col in 0..ct.fixed_columns() {
            let cell = ct.cell(col, row).unwrap();
            assert!(matches!(cell.kind, CellKind::Member(_)), "gap at ({}, {})", col, row);
            assert!(cell.col <= col && col < cell.col + cell.col_span);
            assert!(cell.row <= row && row < cell.row + cell.row_span);
        }
    }
    for col in ct.fixed_columns()..ct.column_count() {
        for row in 0..ct.fixed_rows() {
            let cell = ct.cell(col, row).unwrap();
            assert!(matches!(cell.kind, CellKind::Member(_)), "gap at ({}, {})", col, row);
            assert!(cell.col <= col && col < cell.col + cell.col_span);
            assert!(cell.row <= row && row < cell.row + cell.row_span);
        }
    }
}

// ============================================================================
// GRID SHAPE
// ============================================================================

#[test]
fn test_collapsed_grid_shape_and_values() {
    let h = TestHarness::new(SalesFixture::time_by_product);
    let ct = &h.crosstab;

    // Year and Quarter header columns; Product and Measures header rows.
    assert_eq!(ct.fixed_columns(), 2);
    assert_eq!(ct.fixed_rows(), 2);
    // Three products and the total, two measures each.
    assert_eq!(ct.column_count(), 2 + 8);
    assert_eq!(ct.row_count(), 2 + 3);

    assert_eq!(h.row_captions(), vec!["2023", "2024", "Grand Total"]);
    assert_eq!(h.caption(2, 0), "Apples");
    assert_eq!(h.caption(2, 1), "Sales");
    assert_eq!(h.caption(3, 1), "Units");
    assert_eq!(h.caption(8, 0), "Grand Total");

    assert_eq!(h.value(2, 2), Some(132.0));
    assert_eq!(h.value(3, 2), Some(12.0));
    assert_eq!(h.value(2, 4), Some(264.0));
    assert_eq!(h.value(8, 2), Some(756.0));
    assert_eq!(h.value(0, 2), None);
}

#[test]
fn test_corner_captions() {
    let h = TestHarness::new(SalesFixture::time_by_product);
    assert_eq!(h.caption(0, 1), "Year");
    assert_eq!(h.caption(1, 1), "Quarter");
    assert_eq!(h.caption(1, 0), "Product");
    assert_eq!(h.caption(0, 0), "");

    let corner = h.crosstab.cell(0, 1).unwrap();
    match &corner.kind {
        CellKind::Level(level) => {
            assert_eq!(level.axis, Some(Axis::Row));
            assert_eq!(level.level, Some(h.ids.year_level));
        }
        other => panic!("expected a level cell, got {:?}", other),
    }
}

#[test]
fn test_spanned_cells_are_shared() {
    let h = TestHarness::new(SalesFixture::time_by_product);
    let ct = &h.crosstab;

    let apples = ct.cell(2, 0).unwrap();
    assert_eq!((apples.col, apples.row, apples.col_span, apples.row_span), (2, 0, 2, 1));
    assert!(Rc::ptr_eq(&apples, &ct.cell(3, 0).unwrap()));

    // Collapsed years fill both header columns.
    let year = ct.cell(1, 2).unwrap();
    assert_eq!((year.col, year.col_span), (0, 2));
    assert!(Rc::ptr_eq(&year, &ct.cell(0, 2).unwrap()));

    // Data cells are memoized too.
    assert!(Rc::ptr_eq(&ct.cell(4, 3).unwrap(), &ct.cell(4, 3).unwrap()));
}

#[test]
fn test_drilled_year_geometry() {
    let mut h = TestHarness::new(SalesFixture::time_by_product);
    let y2023 = h.node_of(Axis::Row, "[Time].[Year].[2023]");
    h.with(|ct, ctx| ct.drill(ctx, Axis::Row, y2023, DrillMethod::NextLevel))
        .unwrap();

    assert_eq!(
        h.inner_row_captions(),
        vec!["Q1", "Q2", "Q3", "Q4", "2023 Total", "2024", "Grand Total"]
    );
    let year = h.crosstab.cell(0, 2).unwrap();
    assert_eq!((year.row, year.row_span, year.col_span), (2, 5, 1));
    assert!(Rc::ptr_eq(&year, &h.crosstab.cell(0, 6).unwrap()));

    // 2023 Q1 Apples: 10 + 11 + 12.
    assert_eq!(h.value(2, 2), Some(33.0));
    // The year total repeats the collapsed year value.
    assert_eq!(h.value(2, 6), Some(132.0));

    let generation = h.crosstab.generation().unwrap();
    assert_children_span_sum(&generation.rows);
    assert_children_span_sum(&generation.columns);
    assert_headers_covered(&h);
}

#[test]
fn test_parent_child_region_geometry() {
    let mut h = TestHarness::new(SalesFixture::region_by_product);
    assert_eq!(h.crosstab.fixed_columns(), 1);

    let europe = h.node_of(Axis::Row, "[Region].[Region].[Europe]");
    let member = match &h.crosstab.cell(0, h.row_of(europe)).unwrap().kind {
        CellKind::Member(m) => m.clone(),
        other => panic!("expected a member cell, got {:?}", other),
    };
    assert!(member.drills.iter().any(|d| d.method == DrillMethod::ParentChild));

    h.with(|ct, ctx| ct.drill(ctx, Axis::Row, europe, DrillMethod::ParentChild))
        .unwrap();

    // One depth slot per parent-child depth.
    assert_eq!(h.crosstab.fixed_columns(), 2);
    assert_eq!(
        h.inner_row_captions(),
        vec!["France", "Germany", "Europe Total", "America", "Grand Total"]
    );
    let europe_cell = h.crosstab.cell(0, 2).unwrap();
    assert_eq!((europe_cell.row_span, europe_cell.col_span), (3, 1));

    // France Apples over 8 quarters; Europe adds Germany.
    assert_eq!(h.value(2, 2), Some(80.0));
    assert_eq!(h.value(2, 4), Some(168.0));
    assert_headers_covered(&h);
}

#[test]
fn test_total_first_placement() {
    let mut h = TestHarness::new(SalesFixture::time_by_product);
    let year = h.ids.year_level;
    h.cube.schema_mut().levels[year as usize].totals = TotalAppearance::First;
    h.rebuild().unwrap();
    assert_eq!(h.row_captions(), vec!["Grand Total", "2023", "2024"]);
    assert_eq!(h.value(2, 2), Some(264.0));

    let total = h.crosstab.cell(0, 2).unwrap();
    match &total.kind {
        CellKind::Member(m) => assert_eq!(m.role, MemberRole::Total),
        other => panic!("expected a member cell, got {:?}", other),
    }
}

// ============================================================================
// INDENTED MODE
// ============================================================================

#[test]
fn test_indented_rows_with_attributes() {
    let mut h = TestHarness::new(|ids| {
        let mut layout = SalesFixture::product_by_time(ids);
        layout.display_mode = DisplayMode::Indented;
        layout.attributes.push(LevelAttributes {
            level: ids.product_level,
            attributes: vec!["Color".to_string()],
        });
        layout
    });
    h.rebuild().unwrap();
    let ct = &h.crosstab;

    // One tree column plus the attribute column.
    assert_eq!(ct.fixed_columns(), 2);
    let bottom = ct.fixed_rows() - 1;
    assert_eq!(h.caption(0, bottom), "Product");
    assert_eq!(h.caption(1, bottom), "Color");

    let first = ct.fixed_rows();
    assert_eq!(h.caption(0, first), "Apples");
    assert_eq!(h.caption(1, first), "Red");
    assert_eq!(h.caption(1, first + 2), "Purple");
    // Totals carry no attributes and fill the whole strip.
    let total = ct.cell(1, first + 3).unwrap();
    assert_eq!((total.col, total.col_span), (0, 2));
    match &ct.cell(1, first).unwrap().kind {
        CellKind::Member(m) => assert_eq!(m.role, MemberRole::Attribute),
        other => panic!("expected an attribute cell, got {:?}", other),
    }
}

#[test]
fn test_indented_parent_owns_a_line() {
    let mut h = TestHarness::new(|ids| {
        let mut layout = SalesFixture::time_by_product(ids);
        layout.display_mode = DisplayMode::Indented;
        layout
    });
    assert_eq!(h.crosstab.fixed_columns(), 1);

    let y2023 = h.node_of(Axis::Row, "[Time].[Year].[2023]");
    h.with(|ct, ctx| ct.drill(ctx, Axis::Row, y2023, DrillMethod::NextLevel))
        .unwrap();
    assert_eq!(
        h.row_captions(),
        vec!["2023", "Q1", "Q2", "Q3", "Q4", "2023 Total", "2024", "Grand Total"]
    );

    let year = h.crosstab.cell(0, 2).unwrap();
    assert_eq!(year.row_span, 1);
    let indents: Vec<u32> = (2..5)
        .map(|row| match &h.crosstab.cell(0, row).unwrap().kind {
            CellKind::Member(m) => m.indent,
            _ => u32::MAX,
        })
        .collect();
    assert_eq!(indents, vec![0, 1, 1]);

    // The parent line shows the year aggregate.
    assert_eq!(h.value(1, 2), Some(132.0));
}

// ============================================================================
// ERRORS
// ============================================================================

#[test]
fn test_out_of_range_and_unbuilt() {
    let h = TestHarness::new(SalesFixture::time_by_product);
    match h.crosstab.cell(10, 0) {
        Err(CrossTabError::CoordinateOutOfRange {
            col,
            row,
            col_count,
            row_count,
        }) => assert_eq!((col, row, col_count, row_count), (10, 0, 10, 5)),
        other => panic!("expected out of range, got {:?}", other),
    }
    assert!(h.crosstab.cell(9, 4).is_ok());

    let fresh = CrossTab::new(SalesFixture::time_by_product(&h.ids));
    assert!(matches!(fresh.cell(0, 0), Err(CrossTabError::NotBuilt)));
    assert_eq!(fresh.row_count(), 0);
}
