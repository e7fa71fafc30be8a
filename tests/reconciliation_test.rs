//! Tests for bottom-up, top-down, forecast proportions and middle-out

use rstest::rstest;

use hts_reconcile::util::testing;
use hts_reconcile::{
    ApplicationError, DomainError, Frame, Hierarchy, ProportionKind, ReconciliationEngine,
};

const TREE_NODES: [&str; 8] = ["root", "A", "B", "A1", "A2", "B1", "B2", "B3"];
const BOTTOM_NODES: [&str; 5] = ["A1", "A2", "B1", "B2", "B3"];

fn engine() -> ReconciliationEngine {
    testing::init_test_setup();
    let hierarchy = Hierarchy::new()
        .with_children("root", ["A", "B"])
        .with_children("A", ["A1", "A2"])
        .with_children("B", ["B1", "B2", "B3"]);
    ReconciliationEngine::new(&hierarchy).unwrap()
}

fn unbalanced_engine() -> ReconciliationEngine {
    let hierarchy = Hierarchy::new()
        .with_children("root", ["A", "C"])
        .with_children("A", ["A1", "A2"]);
    ReconciliationEngine::new(&hierarchy).unwrap()
}

fn assert_row_close(frame: &Frame, row: usize, expected: &[f64]) {
    let actual = frame.row(row);
    assert_eq!(actual.len(), expected.len(), "row {} width", row);
    for (j, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() < 1e-9,
            "row {} column '{}': {} != {}",
            row,
            frame.columns()[j],
            a,
            e
        );
    }
}

fn domain_error(err: ApplicationError) -> DomainError {
    err.as_domain().cloned().expect("domain error")
}

// ============================================================
// Bottom-up
// ============================================================

#[test]
fn given_bottom_forecast_when_aggregating_then_every_node_sums_its_leaves() {
    // Arrange
    let engine = engine();
    let forecast = Frame::from_rows(
        &BOTTOM_NODES,
        &[
            vec![1.0, 2.0, 1.0, 2.0, 3.0],
            vec![2.0, 3.0, 2.0, 3.0, 4.0],
            vec![0.0, 1.0, 0.0, 1.0, 2.0],
        ],
    )
    .unwrap();

    // Act
    let result = engine.bottom_up(&forecast).unwrap();

    // Assert
    assert_eq!(result.columns(), TREE_NODES);
    assert_row_close(&result, 0, &[9.0, 3.0, 6.0, 1.0, 2.0, 1.0, 2.0, 3.0]);
    assert_row_close(&result, 1, &[14.0, 5.0, 9.0, 2.0, 3.0, 2.0, 3.0, 4.0]);
    assert_row_close(&result, 2, &[4.0, 1.0, 3.0, 0.0, 1.0, 0.0, 1.0, 2.0]);
}

#[test]
fn given_shuffled_columns_when_aggregating_then_result_is_unchanged() {
    let engine = engine();
    let ordered = Frame::from_rows(&BOTTOM_NODES, &[vec![1.0, 2.0, 1.0, 2.0, 3.0]]).unwrap();
    let shuffled = Frame::from_rows(
        &["B3", "A1", "B1", "A2", "B2"],
        &[vec![3.0, 1.0, 1.0, 2.0, 2.0]],
    )
    .unwrap();

    let expected = engine.bottom_up(&ordered).unwrap();
    let actual = engine.bottom_up(&shuffled).unwrap();

    assert_eq!(actual, expected);
}

#[test]
fn given_labelled_index_when_aggregating_then_index_is_preserved() {
    let engine = engine();
    let index = vec!["2024-01".to_string(), "2024-02".to_string()];
    let forecast = Frame::from_rows(
        &BOTTOM_NODES,
        &[vec![1.0; 5], vec![2.0; 5]],
    )
    .unwrap()
    .with_index(index.clone())
    .unwrap();

    let result = engine.bottom_up(&forecast).unwrap();

    assert_eq!(result.index(), index.as_slice());
    assert_eq!(result.get(1, "root"), Some(10.0));
}

#[test]
fn given_coherent_table_when_aggregating_its_bottom_columns_then_returns_it_unchanged() {
    let engine = engine();
    let forecast = Frame::from_rows(
        &BOTTOM_NODES,
        &[vec![1.0, 2.0, 1.0, 2.0, 3.0], vec![0.5, 4.0, 2.5, 0.0, 1.0]],
    )
    .unwrap();
    let coherent = engine.bottom_up(&forecast).unwrap();

    let again = engine
        .bottom_up(&coherent.select(&BOTTOM_NODES).unwrap())
        .unwrap();

    assert_eq!(again, coherent);
}

#[test]
fn given_no_rows_when_aggregating_then_returns_empty_frame() {
    let engine = engine();
    let forecast = Frame::from_rows(&BOTTOM_NODES, &[]).unwrap();

    let result = engine.bottom_up(&forecast).unwrap();

    assert!(result.is_empty());
    assert_eq!(result.columns(), TREE_NODES);
}

#[rstest]
#[case::missing(vec!["A1", "A2", "B1", "B2"], vec!["B3"], vec![])]
#[case::unexpected(vec!["A1", "A2", "B1", "B2", "B3", "C"], vec![], vec!["C"])]
#[case::internal(vec!["A", "A2", "B1", "B2", "B3"], vec!["A1"], vec!["A"])]
fn given_wrong_columns_when_aggregating_then_reports_mismatch(
    #[case] columns: Vec<&str>,
    #[case] missing: Vec<&str>,
    #[case] unexpected: Vec<&str>,
) {
    let engine = engine();
    let forecast = Frame::from_rows(&columns, &[vec![1.0; columns.len()]]).unwrap();

    let err = domain_error(engine.bottom_up(&forecast).unwrap_err());

    match err {
        DomainError::ColumnMismatch {
            argument,
            missing: m,
            unexpected: u,
            ..
        } => {
            assert_eq!(argument, "forecast_bottom");
            assert_eq!(m, missing);
            assert_eq!(u, unexpected);
        }
        other => panic!("expected ColumnMismatch, got {other:?}"),
    }
}

// ============================================================
// Top-down (static proportions)
// ============================================================

#[test]
fn given_history_when_splitting_with_ahp_then_uses_average_proportions() {
    let engine = engine();
    let history = Frame::from_rows(
        &BOTTOM_NODES,
        &[vec![2.0, 1.0, 2.0, 1.0, 2.0], vec![2.0, 2.0, 2.0, 2.0, 2.0]],
    )
    .unwrap();
    let root = Frame::from_rows(&["root"], &[vec![10.0], vec![20.0]]).unwrap();

    let result = engine.top_down(&history, &root, ProportionKind::Ahp).unwrap();

    let expected = [10.0, 3.875, 6.125, 2.25, 1.625, 2.25, 1.625, 2.25];
    assert_row_close(&result.forecast, 0, &expected);
    let doubled: Vec<f64> = expected.iter().map(|v| v * 2.0).collect();
    assert_row_close(&result.forecast, 1, &doubled);
    assert_eq!(result.proportions.kind, ProportionKind::Ahp);
    assert_eq!(result.proportions.nodes, BOTTOM_NODES);
    assert!((result.proportions.get("A1").unwrap() - 0.225).abs() < 1e-12);
}

#[test]
fn given_history_when_splitting_with_pha_then_uses_proportion_of_averages() {
    let engine = engine();
    let history = Frame::from_rows(
        &BOTTOM_NODES,
        &[vec![3.0, 5.0, 3.0, 4.0, 2.0], vec![1.0, 3.0, 5.0, 4.0, 2.0]],
    )
    .unwrap();
    let root = Frame::from_rows(&["root"], &[vec![10.0], vec![20.0]]).unwrap();

    let result = engine.top_down(&history, &root, ProportionKind::Pha).unwrap();

    let expected = [10.0, 3.75, 6.25, 1.25, 2.5, 2.5, 2.5, 1.25];
    assert_row_close(&result.forecast, 0, &expected);
    let doubled: Vec<f64> = expected.iter().map(|v| v * 2.0).collect();
    assert_row_close(&result.forecast, 1, &doubled);
    assert!((result.proportions.total() - 1.0).abs() < 1e-12);
}

#[test]
fn given_zero_total_history_step_when_splitting_with_ahp_then_preserves_root() {
    let engine = unbalanced_engine();
    let history = Frame::from_rows(
        &["C", "A1", "A2"],
        &[vec![0.0, 0.0, 0.0], vec![1.0, 2.0, 3.0]],
    )
    .unwrap();
    let root = Frame::from_rows(&["root"], &[vec![10.0]]).unwrap();

    let result = engine.top_down(&history, &root, ProportionKind::Ahp).unwrap();

    assert_row_close(
        &result.forecast,
        0,
        &[10.0, 25.0 / 3.0, 5.0 / 3.0, 10.0 / 3.0, 5.0],
    );
    assert_eq!(result.proportions.skipped_steps, 1);
    assert!((result.proportions.total() - 1.0).abs() < 1e-12);
}

#[test]
fn given_all_zero_history_when_splitting_with_ahp_then_forecast_is_zero() {
    let engine = engine();
    let history = Frame::from_rows(&BOTTOM_NODES, &[vec![0.0; 5], vec![0.0; 5]]).unwrap();
    let root = Frame::from_rows(&["root"], &[vec![10.0]]).unwrap();

    let result = engine.top_down(&history, &root, ProportionKind::Ahp).unwrap();

    assert_eq!(result.proportions.skipped_steps, 2);
    assert!(result.forecast.values().iter().all(|&v| v == 0.0));
}

#[rstest]
#[case(ProportionKind::Ahp)]
#[case(ProportionKind::Pha)]
fn given_top_down_forecast_when_checking_root_then_matches_input(#[case] kind: ProportionKind) {
    let engine = engine();
    let history = Frame::from_rows(
        &BOTTOM_NODES,
        &[vec![4.0, 1.0, 2.0, 7.0, 3.0], vec![2.0, 5.0, 1.0, 1.0, 6.0]],
    )
    .unwrap();
    let root = Frame::from_rows(&["root"], &[vec![42.0]]).unwrap();

    let result = engine.top_down(&history, &root, kind).unwrap();

    let total = result.forecast.get(0, "root").unwrap();
    assert!((total - 42.0 * result.proportions.total()).abs() < 1e-9);
}

#[test]
fn given_empty_history_when_splitting_then_errors() {
    let engine = engine();
    let history = Frame::from_rows(&BOTTOM_NODES, &[]).unwrap();
    let root = Frame::from_rows(&["root"], &[vec![10.0]]).unwrap();

    let err = domain_error(engine.top_down(&history, &root, ProportionKind::Ahp).unwrap_err());

    assert_eq!(err, DomainError::EmptyFrame("history_bottom".to_string()));
}

#[test]
fn given_extra_root_column_when_splitting_then_reports_mismatch() {
    let engine = engine();
    let history = Frame::from_rows(&BOTTOM_NODES, &[vec![1.0; 5]]).unwrap();
    let root = Frame::from_rows(&["root", "A"], &[vec![10.0, 4.0]]).unwrap();

    let err = domain_error(engine.top_down(&history, &root, ProportionKind::Pha).unwrap_err());

    assert!(matches!(
        err,
        DomainError::ColumnMismatch { ref argument, ref unexpected, .. }
            if argument == "forecast_root" && unexpected == &["A".to_string()]
    ));
}

// ============================================================
// Forecast proportions
// ============================================================

#[rstest]
#[case::coherent(
    [10.0, 4.0, 6.0, 1.0, 3.0, 2.0, 2.0, 2.0],
    [10.0, 4.0, 6.0, 1.0, 3.0, 2.0, 2.0, 2.0]
)]
#[case::incoherent(
    [20.0, 5.0, 5.0, 1.0, 3.0, 2.0, 2.0, 1.0],
    [20.0, 10.0, 10.0, 2.5, 7.5, 4.0, 4.0, 2.0]
)]
#[case::rescaled(
    [8.0, 1.0, 3.0, 2.0, 2.0, 1.0, 1.0, 2.0],
    [8.0, 2.0, 6.0, 1.0, 1.0, 1.5, 1.5, 3.0]
)]
fn given_forecast_when_applying_proportions_then_root_is_split_by_sibling_ratios(
    #[case] input: [f64; 8],
    #[case] expected: [f64; 8],
) {
    let engine = engine();
    let forecast = Frame::from_rows(&TREE_NODES, &[input.to_vec()]).unwrap();

    let result = engine.forecast_proportions(&forecast).unwrap();

    assert_row_close(&result.forecast, 0, &expected);
}

#[test]
fn given_zero_sibling_sum_when_applying_proportions_then_children_get_zero() {
    let engine = engine();
    let forecast = Frame::from_rows(
        &TREE_NODES,
        &[vec![12.0, 6.0, 6.0, 1.0, 1.0, 0.0, 0.0, 0.0]],
    )
    .unwrap();

    let result = engine.forecast_proportions(&forecast).unwrap();

    assert_row_close(&result.forecast, 0, &[6.0, 6.0, 0.0, 3.0, 3.0, 0.0, 0.0, 0.0]);
    for node in ["B1", "B2", "B3"] {
        assert_eq!(result.proportions.get(0, node), Some(0.0));
    }
    assert!(result.forecast.values().iter().all(|v| v.is_finite()));
}

#[test]
fn given_cancelling_siblings_when_applying_proportions_then_treats_sum_as_zero() {
    let engine = engine();
    let forecast = Frame::from_rows(
        &TREE_NODES,
        &[vec![12.0, 6.0, 6.0, 1.0, 1.0, 1.0, -1.0, 1e-17]],
    )
    .unwrap();

    let result = engine.forecast_proportions(&forecast).unwrap();

    assert_row_close(&result.forecast, 0, &[6.0, 6.0, 0.0, 3.0, 3.0, 0.0, 0.0, 0.0]);
    for node in ["B1", "B2", "B3"] {
        assert_eq!(result.proportions.get(0, node), Some(0.0));
    }
}

#[test]
fn given_coherent_output_when_reapplying_proportions_then_is_idempotent() {
    let engine = engine();
    let forecast = Frame::from_rows(
        &TREE_NODES,
        &[vec![20.0, 5.0, 5.0, 1.0, 3.0, 2.0, 2.0, 1.0]],
    )
    .unwrap();

    let once = engine.forecast_proportions(&forecast).unwrap().forecast;
    let twice = engine.forecast_proportions(&once).unwrap().forecast;

    assert_row_close(&twice, 0, once.row(0).as_slice());
}

#[test]
fn given_forecast_when_applying_proportions_then_reports_shares_per_node() {
    let engine = engine();
    let forecast = Frame::from_rows(
        &TREE_NODES,
        &[vec![20.0, 5.0, 5.0, 1.0, 3.0, 2.0, 2.0, 1.0]],
    )
    .unwrap();

    let result = engine.forecast_proportions(&forecast).unwrap();

    assert_eq!(result.proportions.columns(), TREE_NODES);
    assert_row_close(
        &result.proportions,
        0,
        &[1.0, 0.5, 0.5, 0.125, 0.375, 0.2, 0.2, 0.1],
    );
}

// ============================================================
// Middle-out
// ============================================================

#[test]
fn given_level_one_when_middle_out_then_keeps_level_and_splits_down() {
    let engine = engine();
    let forecast = Frame::from_rows(
        &TREE_NODES,
        &[vec![20.0, 5.0, 5.0, 1.0, 3.0, 2.0, 2.0, 1.0]],
    )
    .unwrap();

    let result = engine.middle_out(&forecast, 1).unwrap();

    assert_row_close(
        &result.forecast,
        0,
        &[10.0, 5.0, 5.0, 1.25, 3.75, 2.0, 2.0, 1.0],
    );
    assert_eq!(
        result.proportions.columns(),
        ["A", "B", "A1", "A2", "B1", "B2", "B3"]
    );
}

#[test]
fn given_bottom_level_when_middle_out_then_equals_bottom_up() {
    let engine = engine();
    let forecast = Frame::from_rows(
        &TREE_NODES,
        &[vec![20.0, 5.0, 5.0, 1.0, 3.0, 2.0, 2.0, 1.0]],
    )
    .unwrap();

    let result = engine.middle_out(&forecast, 2).unwrap();

    assert_row_close(&result.forecast, 0, &[9.0, 4.0, 5.0, 1.0, 3.0, 2.0, 2.0, 1.0]);
}

#[test]
fn given_level_zero_when_middle_out_then_equals_forecast_proportions() {
    let engine = engine();
    let forecast = Frame::from_rows(
        &TREE_NODES,
        &[vec![8.0, 1.0, 3.0, 2.0, 2.0, 1.0, 1.0, 2.0]],
    )
    .unwrap();

    let middle = engine.middle_out(&forecast, 0).unwrap();
    let top = engine.forecast_proportions(&forecast).unwrap();

    assert_eq!(middle.forecast, top.forecast);
    assert_eq!(middle.proportions, top.proportions);
}

#[test]
fn given_level_at_depth_when_middle_out_then_errors() {
    let engine = engine();
    let forecast = Frame::from_rows(&TREE_NODES, &[vec![1.0; 8]]).unwrap();

    let err = domain_error(engine.middle_out(&forecast, 3).unwrap_err());

    assert_eq!(err, DomainError::InvalidLevel { level: 3, depth: 3 });
}

#[test]
fn given_unbalanced_tree_when_middle_out_below_shallow_leaf_then_keeps_leaf() {
    let engine = unbalanced_engine();
    let forecast = Frame::from_rows(
        &["root", "A", "C", "A1", "A2"],
        &[vec![10.0, 4.0, 5.0, 1.0, 2.0]],
    )
    .unwrap();

    let result = engine.middle_out(&forecast, 2).unwrap();

    assert_row_close(&result.forecast, 0, &[8.0, 3.0, 5.0, 1.0, 2.0]);
}

#[test]
fn given_partial_columns_when_applying_proportions_then_reports_mismatch() {
    let engine = engine();
    let forecast = Frame::from_rows(&BOTTOM_NODES, &[vec![1.0; 5]]).unwrap();

    let err = domain_error(engine.forecast_proportions(&forecast).unwrap_err());

    assert!(matches!(
        err,
        DomainError::ColumnMismatch { ref argument, ref missing, .. }
            if argument == "forecast_all" && missing == &["A", "B", "root"]
    ));
}
