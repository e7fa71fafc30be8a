//! Time-indexed numeric tables.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, DomainResult};

/// Time-indexed table of series values: one row per time step, one column per node.
///
/// Frames are immutable values; every transformation returns a new frame and
/// carries the row index through unchanged.
///
/// Serializes in the "split" layout: `{"index": [...], "columns": [...], "data": [[...]]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SplitFrame", into = "SplitFrame")]
pub struct Frame {
    index: Vec<String>,
    columns: Vec<String>,
    values: DMatrix<f64>,
}

impl Frame {
    /// Build a frame, checking that the index and columns match the value shape
    /// and that column names are unique.
    pub fn new(index: Vec<String>, columns: Vec<String>, values: DMatrix<f64>) -> DomainResult<Self> {
        if index.len() != values.nrows() {
            return Err(DomainError::Shape(format!(
                "index has {} labels but values have {} rows",
                index.len(),
                values.nrows()
            )));
        }
        if columns.len() != values.ncols() {
            return Err(DomainError::Shape(format!(
                "{} column names for {} value columns",
                columns.len(),
                values.ncols()
            )));
        }
        if let Some(duplicate) = columns.iter().duplicates().next() {
            return Err(DomainError::Shape(format!("duplicate column '{}'", duplicate)));
        }
        Ok(Self {
            index,
            columns,
            values,
        })
    }

    /// Build a frame from row-major data with a positional index (`"0"`, `"1"`, ...).
    pub fn from_rows<S: AsRef<str>>(columns: &[S], rows: &[Vec<f64>]) -> DomainResult<Self> {
        let ncols = columns.len();
        if let Some(bad) = rows.iter().position(|row| row.len() != ncols) {
            return Err(DomainError::Shape(format!(
                "row {} has {} values, expected {}",
                bad,
                rows[bad].len(),
                ncols
            )));
        }
        let values = DMatrix::from_row_iterator(rows.len(), ncols, rows.iter().flatten().copied());
        Self::new(
            positional_index(rows.len()),
            columns.iter().map(|c| c.as_ref().to_string()).collect(),
            values,
        )
    }

    /// Replace the row index, keeping columns and values.
    pub fn with_index(self, index: Vec<String>) -> DomainResult<Self> {
        Self::new(index, self.columns, self.values)
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.nrows() == 0
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<DVector<f64>> {
        self.column_position(name)
            .map(|j| self.values.column(j).into_owned())
    }

    pub fn get(&self, row: usize, name: &str) -> Option<f64> {
        let col = self.column_position(name)?;
        (row < self.nrows()).then(|| self.values[(row, col)])
    }

    /// Values of one time step, in column order.
    pub fn row(&self, row: usize) -> DVector<f64> {
        self.values.row(row).transpose()
    }

    /// Reindex the columns to exactly `order` (positional, not just set equality).
    pub fn select<S: AsRef<str>>(&self, order: &[S]) -> DomainResult<Self> {
        let lookup: HashMap<&str, usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(j, c)| (c.as_str(), j))
            .collect();
        let positions = order
            .iter()
            .map(|name| {
                lookup.get(name.as_ref()).copied().ok_or_else(|| {
                    DomainError::Shape(format!("unknown column '{}'", name.as_ref()))
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;
        let values = self.values.select_columns(positions.iter());
        Self::new(
            self.index.clone(),
            order.iter().map(|c| c.as_ref().to_string()).collect(),
            values,
        )
    }

    /// Fail with `ColumnMismatch` unless the column set equals `expected` exactly.
    pub fn ensure_columns<S: AsRef<str>>(&self, argument: &str, expected: &[S]) -> DomainResult<()> {
        ensure_names(argument, expected, self.columns.iter().map(String::as_str))
    }
}

/// Check that `actual` names form exactly the set `expected`.
pub fn ensure_names<'a, S, I>(argument: &str, expected: &[S], actual: I) -> DomainResult<()>
where
    S: AsRef<str>,
    I: IntoIterator<Item = &'a str>,
{
    let expected_set: HashSet<&str> = expected.iter().map(|s| s.as_ref()).collect();
    let actual_set: HashSet<&str> = actual.into_iter().collect();
    if expected_set == actual_set {
        return Ok(());
    }
    Err(DomainError::ColumnMismatch {
        argument: argument.to_string(),
        expected: expected.iter().map(|s| s.as_ref().to_string()).collect(),
        missing: expected_set
            .difference(&actual_set)
            .map(|s| s.to_string())
            .sorted()
            .collect(),
        unexpected: actual_set
            .difference(&expected_set)
            .map(|s| s.to_string())
            .sorted()
            .collect(),
    })
}

fn positional_index(n: usize) -> Vec<String> {
    (0..n).map(|i| i.to_string()).collect()
}

/// Serialized layout of a [`Frame`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SplitFrame {
    #[serde(default)]
    index: Option<Vec<String>>,
    columns: Vec<String>,
    data: Vec<Vec<f64>>,
}

impl TryFrom<SplitFrame> for Frame {
    type Error = DomainError;

    fn try_from(split: SplitFrame) -> Result<Self, Self::Error> {
        let frame = Frame::from_rows(&split.columns, &split.data)?;
        match split.index {
            Some(index) => frame.with_index(index),
            None => Ok(frame),
        }
    }
}

impl From<Frame> for SplitFrame {
    fn from(frame: Frame) -> Self {
        let data = frame
            .values
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect();
        SplitFrame {
            index: Some(frame.index),
            columns: frame.columns,
            data,
        }
    }
}
