//! Matrix-free linear operators consumed by the iterative solvers.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

/// A linear map `A: R^n -> R^m` known only through products with `A` and `Aᵗ`.
pub trait LinearOperator: Send + Sync {
    /// `(m, n)`
    fn shape(&self) -> (usize, usize);

    /// `A x`
    fn matvec(&self, x: &DVector<f64>) -> DVector<f64>;

    /// `Aᵗ y`
    fn rmatvec(&self, y: &DVector<f64>) -> DVector<f64>;
}

/// Compressed sparse row operator with a cached transpose.
#[derive(Debug, Clone)]
pub struct SparseOperator {
    matrix: CsrMatrix<f64>,
    transpose: CsrMatrix<f64>,
}

impl SparseOperator {
    pub fn new(matrix: CsrMatrix<f64>) -> Self {
        let transpose = matrix.transpose();
        Self { matrix, transpose }
    }

    /// `diag(scales) · matrix`; used for the square-root weights of weighted least squares.
    pub fn row_scaled(matrix: &CsrMatrix<f64>, scales: &[f64]) -> Self {
        let mut coo = CooMatrix::new(matrix.nrows(), matrix.ncols());
        for (i, j, &v) in matrix.triplet_iter() {
            coo.push(i, j, v * scales[i]);
        }
        Self::new(CsrMatrix::from(&coo))
    }

    pub fn matrix(&self) -> &CsrMatrix<f64> {
        &self.matrix
    }
}

fn csr_product(matrix: &CsrMatrix<f64>, x: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(
        matrix.nrows(),
        matrix.row_iter().map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(&j, &v)| v * x[j])
                .sum::<f64>()
        }),
    )
}

impl LinearOperator for SparseOperator {
    fn shape(&self) -> (usize, usize) {
        (self.matrix.nrows(), self.matrix.ncols())
    }

    fn matvec(&self, x: &DVector<f64>) -> DVector<f64> {
        csr_product(&self.matrix, x)
    }

    fn rmatvec(&self, y: &DVector<f64>) -> DVector<f64> {
        csr_product(&self.transpose, y)
    }
}

impl LinearOperator for DMatrix<f64> {
    fn shape(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    fn matvec(&self, x: &DVector<f64>) -> DVector<f64> {
        self * x
    }

    fn rmatvec(&self, y: &DVector<f64>) -> DVector<f64> {
        self.tr_mul(y)
    }
}

/// `A · diag(d)`
pub struct ColumnScaled<'a, O: ?Sized> {
    inner: &'a O,
    scales: &'a DVector<f64>,
}

impl<'a, O: LinearOperator + ?Sized> ColumnScaled<'a, O> {
    pub fn new(inner: &'a O, scales: &'a DVector<f64>) -> Self {
        Self { inner, scales }
    }
}

impl<'a, O: LinearOperator + ?Sized> LinearOperator for ColumnScaled<'a, O> {
    fn shape(&self) -> (usize, usize) {
        self.inner.shape()
    }

    fn matvec(&self, x: &DVector<f64>) -> DVector<f64> {
        self.inner.matvec(&x.component_mul(self.scales))
    }

    fn rmatvec(&self, y: &DVector<f64>) -> DVector<f64> {
        self.inner.rmatvec(y).component_mul(self.scales)
    }
}

/// `[A; diag(r)]`, the Tikhonov-augmented system of a trust-region subproblem.
pub struct Regularized<'a, O: ?Sized> {
    inner: &'a O,
    diagonal: &'a DVector<f64>,
}

impl<'a, O: LinearOperator + ?Sized> Regularized<'a, O> {
    pub fn new(inner: &'a O, diagonal: &'a DVector<f64>) -> Self {
        Self { inner, diagonal }
    }
}

impl<'a, O: LinearOperator + ?Sized> LinearOperator for Regularized<'a, O> {
    fn shape(&self) -> (usize, usize) {
        let (m, n) = self.inner.shape();
        (m + n, n)
    }

    fn matvec(&self, x: &DVector<f64>) -> DVector<f64> {
        let (m, n) = self.inner.shape();
        let top = self.inner.matvec(x);
        let bottom = x.component_mul(self.diagonal);
        DVector::from_iterator(m + n, top.iter().chain(bottom.iter()).copied())
    }

    fn rmatvec(&self, y: &DVector<f64>) -> DVector<f64> {
        let (m, n) = self.inner.shape();
        let top = y.rows(0, m).into_owned();
        let bottom = y.rows(m, n).component_mul(self.diagonal);
        self.inner.rmatvec(&top) + bottom
    }
}
