use sprs::{CsMat, TriMat};

/// Incremental sparse matrix builder using triplet (COO) format.
///
/// Duplicate entries at the same (row, col) are summed when converting to CSC.
#[derive(Debug)]
pub struct TripletBuilder {
    triplet: TriMat<f64>,
}

impl TripletBuilder {
    /// Create a new builder for a matrix of the given dimensions.
    pub fn new(nrow: usize, ncol: usize) -> Self {
        Self {
            triplet: TriMat::new((nrow, ncol)),
        }
    }

    /// Add a value at (row, col). Duplicate entries will be summed.
    pub fn add(&mut self, row: usize, col: usize, val: f64) {
        self.triplet.add_triplet(row, col, val);
    }

    /// Convert to a CSC (Compressed Sparse Column) matrix.
    pub fn to_csc(&self) -> CsMat<f64> {
        self.triplet.to_csc()
    }
}

/// Multiply a sparse matrix by a dense vector: result = A * x.
pub fn spmv(a: &CsMat<f64>, x: &[f64]) -> Vec<f64> {
    assert_eq!(a.cols(), x.len());
    let mut result = vec![0.0; a.rows()];
    for (val, (row, col)) in a.iter() {
        result[row] += val * x[col];
    }
    result
}

/// Compute X' * y for a sparse matrix X and dense vector y.
pub fn xt_y(x: &CsMat<f64>, y: &[f64]) -> Vec<f64> {
    let mut result = vec![0.0; x.cols()];
    for (val, (row, col)) in x.iter() {
        result[col] += val * y[row];
    }
    result
}

/// Scale each row `i` of `a` by `w[i]`: diag(w) * A.
pub fn scale_rows(a: &CsMat<f64>, w: &[f64]) -> CsMat<f64> {
    let mut tri = TriMat::new((a.rows(), a.cols()));
    for (val, (row, col)) in a.iter() {
        tri.add_triplet(row, col, val * w[row]);
    }
    tri.to_csc()
}

/// Compute A' * B as a dense matrix via column dot products.
pub fn cross_dense(a: &CsMat<f64>, b: &CsMat<f64>) -> nalgebra::DMatrix<f64> {
    let a_csc = if a.is_csc() { a.clone() } else { a.to_csc() };
    let b_csc = if b.is_csc() { b.clone() } else { b.to_csc() };
    let mut result = nalgebra::DMatrix::zeros(a.cols(), b.cols());

    for i in 0..a.cols() {
        if let Some(col_a) = a_csc.outer_view(i) {
            for j in 0..b.cols() {
                if let Some(col_b) = b_csc.outer_view(j) {
                    result[(i, j)] = col_a.dot(&col_b);
                }
            }
        }
    }

    result
}

/// Horizontal concatenation [A | B] of two matrices with the same row count.
pub fn hstack(a: &CsMat<f64>, b: &CsMat<f64>) -> CsMat<f64> {
    assert_eq!(a.rows(), b.rows());
    let mut tri = TriMat::new((a.rows(), a.cols() + b.cols()));
    for (val, (row, col)) in a.iter() {
        tri.add_triplet(row, col, *val);
    }
    for (val, (row, col)) in b.iter() {
        tri.add_triplet(row, a.cols() + col, *val);
    }
    tri.to_csc()
}
