//! Tests for tree queries, the summing matrix and tree rendering

use hts_reconcile::domain::{build_tree, Hierarchy, SummingMatrix, TreeConvert};

fn sample_hierarchy() -> Hierarchy {
    Hierarchy::new()
        .with_children("root", ["A", "B"])
        .with_children("A", ["A1", "A2"])
        .with_children("B", ["B1", "B2", "B3"])
}

// ============================================================
// Summing matrix
// ============================================================

#[test]
fn given_sample_hierarchy_when_computing_summing_matrix_then_rows_are_indicators() {
    // Arrange
    let tree = build_tree(&sample_hierarchy()).unwrap();

    // Act
    let summing = SummingMatrix::compute(&tree);

    // Assert
    assert_eq!(
        summing.tree_nodes(),
        ["root", "A", "B", "A1", "A2", "B1", "B2", "B3"]
    );
    assert_eq!(summing.bottom_nodes(), ["A1", "A2", "B1", "B2", "B3"]);
    assert_eq!(
        summing.indicator_rows(),
        vec![
            vec![1, 1, 1, 1, 1],
            vec![1, 1, 0, 0, 0],
            vec![0, 0, 1, 1, 1],
            vec![1, 0, 0, 0, 0],
            vec![0, 1, 0, 0, 0],
            vec![0, 0, 1, 0, 0],
            vec![0, 0, 0, 1, 0],
            vec![0, 0, 0, 0, 1],
        ]
    );
}

#[test]
fn given_summing_matrix_when_comparing_dense_and_sparse_then_they_agree() {
    let tree = build_tree(&sample_hierarchy()).unwrap();

    let summing = SummingMatrix::compute(&tree);

    let sparse = summing.sparse();
    assert_eq!(sparse.nrows(), 8);
    assert_eq!(sparse.ncols(), 5);
    assert_eq!(sparse.nnz(), 15);
    for (i, j, &v) in sparse.triplet_iter() {
        assert_eq!(summing.matrix()[(i, j)], v);
    }
    assert_eq!(summing.matrix().sum(), 15.0);
}

#[test]
fn given_unbalanced_hierarchy_when_computing_summing_matrix_then_columns_follow_leaf_order() {
    let hierarchy = Hierarchy::new()
        .with_children("root", ["A", "C"])
        .with_children("A", ["A1", "A2"]);
    let tree = build_tree(&hierarchy).unwrap();

    let summing = SummingMatrix::compute(&tree);

    assert_eq!(summing.bottom_nodes(), ["C", "A1", "A2"]);
    assert_eq!(
        summing.indicator_rows(),
        vec![
            vec![1, 1, 1],
            vec![0, 1, 1],
            vec![1, 0, 0],
            vec![0, 1, 0],
            vec![0, 0, 1],
        ]
    );
    assert_eq!(summing.row_of("C"), Some(2));
    assert_eq!(summing.row_of("missing"), None);
}

// ============================================================
// Tree queries
// ============================================================

#[test]
fn given_tree_when_querying_relations_then_follows_definition() {
    let tree = build_tree(&sample_hierarchy()).unwrap();

    let b2 = tree.find("B2").unwrap();
    let b = tree.parent_of(b2).unwrap();
    let root = tree.root().unwrap();

    assert_eq!(tree.name_of(b), Some("B"));
    assert_eq!(tree.depth_of(b2), 2);
    assert_eq!(tree.depth_of(root), 0);
    assert_eq!(tree.children_of(b).len(), 3);
    assert_eq!(tree.ancestors(b2).count(), 2);
    assert!(tree.find("nope").is_none());
}

#[test]
fn given_tree_when_iterating_pre_order_then_visits_depth_first() {
    let tree = build_tree(&sample_hierarchy()).unwrap();

    let names: Vec<&str> = tree.iter().map(|(_, node)| node.name()).collect();

    assert_eq!(names, ["root", "A", "A1", "A2", "B", "B1", "B2", "B3"]);
}

#[test]
fn given_internal_node_when_collecting_descendant_leaves_then_returns_subtree_leaves() {
    let tree = build_tree(&sample_hierarchy()).unwrap();
    let b = tree.find("B").unwrap();
    let a1 = tree.find("A1").unwrap();

    let leaves: Vec<&str> = tree
        .descendant_leaves(b)
        .into_iter()
        .filter_map(|idx| tree.name_of(idx))
        .collect();

    assert_eq!(leaves, ["B1", "B2", "B3"]);
    assert_eq!(tree.descendant_leaves(a1), vec![a1]);
}

// ============================================================
// Rendering
// ============================================================

#[test]
fn given_tree_when_rendering_then_shows_every_node_nested() {
    let tree = build_tree(&sample_hierarchy()).unwrap();

    let rendered = tree.to_tree_string().to_string();

    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(lines.len(), 8);
    assert_eq!(lines[0], "root");
    assert!(lines[1].ends_with("A"));
    assert!(lines[2].ends_with("A1"));
    assert!(lines[7].ends_with("B3"));
}
