//! Reconciliation engine
//!
//! Bottom-up aggregation and the proportional (top-down, forecast-proportion,
//! middle-out) strategies. Optimal combination lives in `combination.rs`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::application::ApplicationResult;
use crate::domain::{build_tree, DomainError, Frame, Hierarchy, SummingMatrix, TreeArena, ROOT};

/// Static top-down estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProportionKind {
    /// Average of the per-step proportions
    #[default]
    Ahp,
    /// Proportion of the historical averages
    Pha,
}

impl ProportionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProportionKind::Ahp => "ahp",
            ProportionKind::Pha => "pha",
        }
    }
}

impl fmt::Display for ProportionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProportionKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ahp" => Ok(ProportionKind::Ahp),
            "pha" => Ok(ProportionKind::Pha),
            _ => Err(DomainError::InvalidProportionKind(s.to_string())),
        }
    }
}

/// Per-bottom-node shares of the root, fixed over the forecast horizon.
///
/// AHP shares are not renormalised and may not sum to exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticProportions {
    pub kind: ProportionKind,
    pub nodes: Vec<String>,
    pub shares: Vec<f64>,
    /// History steps left out of the AHP average because their total was zero
    pub skipped_steps: usize,
}

impl StaticProportions {
    pub fn get(&self, node: &str) -> Option<f64> {
        self.nodes
            .iter()
            .position(|n| n == node)
            .map(|i| self.shares[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.nodes
            .iter()
            .map(String::as_str)
            .zip(self.shares.iter().copied())
    }

    pub fn total(&self) -> f64 {
        self.shares.iter().sum()
    }
}

#[derive(Debug, Clone)]
pub struct TopDownResult {
    pub forecast: Frame,
    pub proportions: StaticProportions,
}

/// Forecast plus the time-varying proportions it was derived from.
#[derive(Debug, Clone)]
pub struct ProportionalResult {
    pub forecast: Frame,
    /// Shares relative to each node's anchor, one column per covered node
    pub proportions: Frame,
}

/// A parent and its children as positions in `tree_nodes`.
#[derive(Debug, Clone)]
struct Family {
    parent: usize,
    children: Vec<usize>,
}

/// Holds the hierarchy tree and its summing matrix; all strategies are methods.
///
/// Immutable after construction, so one engine can serve concurrent callers.
#[derive(Debug)]
pub struct ReconciliationEngine {
    hierarchy: Hierarchy,
    tree: TreeArena,
    summing: SummingMatrix,
    /// Name to position in `tree_nodes`
    positions: HashMap<String, usize>,
    /// Parents ordered so every parent comes before its children
    families: Vec<Family>,
    /// Position in `tree_nodes` of each bottom node
    bottom_rows: Vec<usize>,
}

impl ReconciliationEngine {
    #[instrument(level = "debug", skip_all)]
    pub fn new(hierarchy: &Hierarchy) -> ApplicationResult<Self> {
        let tree = build_tree(hierarchy)?;
        let summing = SummingMatrix::compute(&tree);

        let positions: HashMap<String, usize> = summing
            .tree_nodes()
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let families = tree
            .nodes_per_level(true)
            .flatten()
            .filter_map(|parent| {
                let idx = tree.find(&parent)?;
                let children = tree
                    .children_of(idx)
                    .iter()
                    .filter_map(|&child| tree.name_of(child))
                    .filter_map(|name| positions.get(name).copied())
                    .collect();
                Some(Family {
                    parent: *positions.get(&parent)?,
                    children,
                })
            })
            .collect();

        let bottom_rows = summing
            .bottom_nodes()
            .iter()
            .filter_map(|name| positions.get(name).copied())
            .collect();

        debug!(
            "engine ready: {} nodes, {} bottom nodes",
            summing.tree_nodes().len(),
            summing.bottom_nodes().len()
        );
        Ok(Self {
            hierarchy: hierarchy.clone(),
            tree,
            summing,
            positions,
            families,
            bottom_rows,
        })
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn tree(&self) -> &TreeArena {
        &self.tree
    }

    pub fn summing(&self) -> &SummingMatrix {
        &self.summing
    }

    pub fn tree_nodes(&self) -> &[String] {
        self.summing.tree_nodes()
    }

    pub fn bottom_nodes(&self) -> &[String] {
        self.summing.bottom_nodes()
    }

    /// Aggregate a bottom-level forecast to every node: `y = x · Sᵗ`.
    #[instrument(level = "debug", skip_all, fields(rows = forecast_bottom.nrows()))]
    pub fn bottom_up(&self, forecast_bottom: &Frame) -> ApplicationResult<Frame> {
        let bottom = self.summing.bottom_nodes();
        forecast_bottom.ensure_columns("forecast_bottom", bottom)?;
        let ordered = forecast_bottom.select(bottom)?;
        let values = ordered.values() * self.summing.matrix().transpose();
        Ok(Frame::new(
            ordered.index().to_vec(),
            self.summing.tree_nodes().to_vec(),
            values,
        )?)
    }

    /// Split the root forecast with static shares estimated from bottom-level history.
    #[instrument(level = "debug", skip_all, fields(kind = %kind))]
    pub fn top_down(
        &self,
        history_bottom: &Frame,
        forecast_root: &Frame,
        kind: ProportionKind,
    ) -> ApplicationResult<TopDownResult> {
        let bottom = self.summing.bottom_nodes();
        history_bottom.ensure_columns("history_bottom", bottom)?;
        forecast_root.ensure_columns("forecast_root", &[ROOT])?;
        if history_bottom.is_empty() {
            return Err(DomainError::EmptyFrame("history_bottom".to_string()).into());
        }

        let history = history_bottom.select(bottom)?;
        let (shares, skipped_steps) = match kind {
            ProportionKind::Ahp => average_historical_proportions(history.values()),
            ProportionKind::Pha => (proportion_of_historical_averages(history.values()), 0),
        };
        if skipped_steps > 0 {
            warn!(
                "{} of {} history steps have a zero total and were left out",
                skipped_steps,
                history.nrows()
            );
        }
        debug!("{} shares sum to {}", kind, shares.sum());

        let values = forecast_root.values().column(0) * shares.transpose();
        let bottom_forecast = Frame::new(forecast_root.index().to_vec(), bottom.to_vec(), values)?;
        let forecast = self.bottom_up(&bottom_forecast)?;

        Ok(TopDownResult {
            forecast,
            proportions: StaticProportions {
                kind,
                nodes: bottom.to_vec(),
                shares: shares.iter().copied().collect(),
                skipped_steps,
            },
        })
    }

    /// Top-down split driven by the forecast's own sibling ratios, per time step.
    #[instrument(level = "debug", skip_all, fields(rows = forecast_all.nrows()))]
    pub fn forecast_proportions(&self, forecast_all: &Frame) -> ApplicationResult<ProportionalResult> {
        let root = self.positions.get(ROOT).copied().unwrap_or(0);
        self.disaggregate(forecast_all, &[root])
    }

    /// Keep the forecasts at `level` (and shallower leaves) and split each of them
    /// downward with forecast proportions; everything above is re-aggregated.
    ///
    /// Level 0 is the root, so `middle_out(f, 0)` equals `forecast_proportions(f)`.
    #[instrument(level = "debug", skip(self, forecast_all))]
    pub fn middle_out(&self, forecast_all: &Frame, level: usize) -> ApplicationResult<ProportionalResult> {
        let depth = self.tree.depth();
        if level >= depth {
            return Err(DomainError::InvalidLevel { level, depth }.into());
        }

        let mut anchors = Vec::new();
        for (depth_of, nodes) in self.tree.levels().enumerate().take(level + 1) {
            for idx in nodes {
                let Some(node) = self.tree.get_node(idx) else {
                    continue;
                };
                if depth_of == level || node.is_leaf() {
                    if let Some(&pos) = self.positions.get(node.name()) {
                        anchors.push(pos);
                    }
                }
            }
        }
        debug!("middle-out anchors: {}", anchors.len());
        self.disaggregate(forecast_all, &anchors)
    }

    /// Shares below `anchors`, then bottom values = share × anchor forecast, aggregated.
    fn disaggregate(&self, forecast_all: &Frame, anchors: &[usize]) -> ApplicationResult<ProportionalResult> {
        let tree_nodes = self.summing.tree_nodes();
        forecast_all.ensure_columns("forecast_all", tree_nodes)?;
        let ordered = forecast_all.select(tree_nodes)?;

        let anchor_of = self.anchor_of(anchors);
        let covered: Vec<usize> = (0..tree_nodes.len())
            .filter(|&i| anchor_of[i].is_some())
            .collect();

        let nrows = ordered.nrows();
        let mut shares = DMatrix::zeros(nrows, covered.len());
        let mut bottom = DMatrix::zeros(nrows, self.bottom_rows.len());
        for t in 0..nrows {
            let y = ordered.row(t);
            let row_shares = self.shares_below(&y, anchors, &anchor_of);
            for (j, &pos) in self.bottom_rows.iter().enumerate() {
                bottom[(t, j)] = anchor_of[pos].map_or(0.0, |a| row_shares[pos] * y[a]);
            }
            for (col, &pos) in covered.iter().enumerate() {
                shares[(t, col)] = row_shares[pos];
            }
        }

        let bottom_forecast = Frame::new(
            ordered.index().to_vec(),
            self.summing.bottom_nodes().to_vec(),
            bottom,
        )?;
        let proportions = Frame::new(
            ordered.index().to_vec(),
            covered.iter().map(|&i| tree_nodes[i].clone()).collect(),
            shares,
        )?;
        let forecast = self.bottom_up(&bottom_forecast)?;
        Ok(ProportionalResult {
            forecast,
            proportions,
        })
    }

    /// For every tree position, the anchor whose subtree contains it.
    fn anchor_of(&self, anchors: &[usize]) -> Vec<Option<usize>> {
        let mut anchor_of = vec![None; self.summing.tree_nodes().len()];
        for &a in anchors {
            anchor_of[a] = Some(a);
        }
        for family in &self.families {
            if let Some(a) = anchor_of[family.parent] {
                for &child in &family.children {
                    anchor_of[child].get_or_insert(a);
                }
            }
        }
        anchor_of
    }

    /// Proportions of one time step; anchors get 1, children split their parent's
    /// share by their value over the sibling sum (zero when that sum is zero).
    fn shares_below(&self, y: &DVector<f64>, anchors: &[usize], anchor_of: &[Option<usize>]) -> Vec<f64> {
        let mut share = vec![0.0; y.len()];
        for &a in anchors {
            share[a] = 1.0;
        }
        for family in &self.families {
            if anchor_of[family.parent].is_none() {
                continue;
            }
            let total: f64 = family.children.iter().map(|&c| y[c]).sum();
            let scale: f64 = family.children.iter().map(|&c| y[c].abs()).sum();
            for &child in &family.children {
                share[child] = if !is_negligible(total, scale) {
                    share[family.parent] * y[child] / total
                } else {
                    0.0
                };
            }
        }
        share
    }
}

/// A sum that cancels to rounding noise relative to the magnitude of its terms.
fn is_negligible(total: f64, scale: f64) -> bool {
    total.abs() <= f64::EPSILON * scale
}

/// Mean over time of each node's share of that step's total.
///
/// Steps with a negligible total are left out of the average; their count is
/// returned alongside the shares. All-zero history gives zero shares.
fn average_historical_proportions(history: &DMatrix<f64>) -> (DVector<f64>, usize) {
    let mut shares = DVector::zeros(history.ncols());
    let mut counted = 0usize;
    for row in history.row_iter() {
        let total = row.sum();
        let scale = row.abs().sum();
        if !is_negligible(total, scale) {
            shares += row.transpose() / total;
            counted += 1;
        }
    }
    let skipped = history.nrows() - counted;
    if counted > 0 {
        shares /= counted as f64;
    }
    (shares, skipped)
}

fn proportion_of_historical_averages(history: &DMatrix<f64>) -> DVector<f64> {
    let means = history.row_mean().transpose();
    let total = means.sum();
    if is_negligible(total, means.abs().sum()) {
        DVector::zeros(means.len())
    } else {
        means / total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn given_zero_total_step_when_averaging_proportions_then_step_is_skipped() {
        let history = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, 3.0]);

        let (shares, skipped) = average_historical_proportions(&history);

        assert_eq!(shares.as_slice(), &[0.25, 0.75]);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn given_all_zero_history_when_averaging_proportions_then_shares_are_zero() {
        let history = DMatrix::zeros(2, 3);

        let (shares, skipped) = average_historical_proportions(&history);

        assert_eq!(shares.as_slice(), &[0.0, 0.0, 0.0]);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn given_cancelling_terms_when_checking_total_then_is_negligible() {
        assert!(is_negligible(1e-17, 2.0));
        assert!(!is_negligible(1e-3, 2.0));
        assert!(is_negligible(0.0, 0.0));
    }

    #[test]
    fn given_all_zero_history_when_averaging_totals_then_shares_are_zero() {
        let history = DMatrix::zeros(3, 2);

        let shares = proportion_of_historical_averages(&history);

        assert_eq!(shares.as_slice(), &[0.0, 0.0]);
    }

    #[rstest]
    #[case("ahp", ProportionKind::Ahp)]
    #[case("PHA", ProportionKind::Pha)]
    fn given_kind_name_when_parsing_then_accepts(#[case] name: &str, #[case] expected: ProportionKind) {
        assert_eq!(name.parse::<ProportionKind>().unwrap(), expected);
    }

    #[test]
    fn given_unknown_kind_when_parsing_then_errors() {
        let err = "median".parse::<ProportionKind>().unwrap_err();
        assert_eq!(err, DomainError::InvalidProportionKind("median".to_string()));
    }
}
