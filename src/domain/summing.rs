//! Summing (aggregation) matrix derived from the hierarchy tree.

use std::collections::HashMap;

use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use tracing::{debug, instrument};

use crate::domain::arena::TreeArena;

/// Binary matrix mapping bottom-level values to every node's aggregate.
///
/// Rows follow `tree_nodes` (breadth-first, root first), columns follow
/// `bottom_nodes` (leaves in first breadth-first encounter). Any table
/// multiplied against it must be reindexed to these orders first.
#[derive(Debug, Clone)]
pub struct SummingMatrix {
    dense: DMatrix<f64>,
    sparse: CsrMatrix<f64>,
    tree_nodes: Vec<String>,
    bottom_nodes: Vec<String>,
}

impl SummingMatrix {
    /// Derive `S`, `tree_nodes` and `bottom_nodes` from `tree`.
    #[instrument(level = "debug", skip(tree))]
    pub fn compute(tree: &TreeArena) -> Self {
        let bottom_nodes = tree.leaf_nodes();
        let column_of: HashMap<&str, usize> = bottom_nodes
            .iter()
            .enumerate()
            .map(|(j, name)| (name.as_str(), j))
            .collect();

        let mut tree_nodes = Vec::with_capacity(tree.len());
        let mut coo = CooMatrix::new(tree.len(), bottom_nodes.len());
        for (row, (idx, node)) in tree.iter_level_order().enumerate() {
            for leaf in tree.descendant_leaves(idx) {
                if let Some(&col) = tree.name_of(leaf).and_then(|name| column_of.get(name)) {
                    coo.push(row, col, 1.0);
                }
            }
            tree_nodes.push(node.data.name.clone());
        }

        let sparse = CsrMatrix::from(&coo);
        let mut dense = DMatrix::zeros(tree_nodes.len(), bottom_nodes.len());
        for (i, j, &v) in sparse.triplet_iter() {
            dense[(i, j)] = v;
        }
        debug!(
            "summing matrix {}x{} with {} non-zeros",
            dense.nrows(),
            dense.ncols(),
            sparse.nnz()
        );

        Self {
            dense,
            sparse,
            tree_nodes,
            bottom_nodes,
        }
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.dense
    }

    pub fn sparse(&self) -> &CsrMatrix<f64> {
        &self.sparse
    }

    pub fn tree_nodes(&self) -> &[String] {
        &self.tree_nodes
    }

    pub fn bottom_nodes(&self) -> &[String] {
        &self.bottom_nodes
    }

    /// Matrix rows as 0/1 indicators, for display.
    pub fn indicator_rows(&self) -> Vec<Vec<u8>> {
        self.dense
            .row_iter()
            .map(|row| row.iter().map(|&v| u8::from(v != 0.0)).collect())
            .collect()
    }

    pub fn row_of(&self, name: &str) -> Option<usize> {
        self.tree_nodes.iter().position(|n| n == name)
    }
}
