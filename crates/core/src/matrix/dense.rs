//! Dense helpers for the moment-matching transform of empirical designs.

use nalgebra::DMatrix;

/// Lower Cholesky factor `L` with `A = L L'`, or `None` if `A` is not
/// positive definite.
pub fn cholesky_lower(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    a.clone().cholesky().map(|c| c.l())
}

/// Sample covariance of the rows of `x` (divisor n - 1).
pub fn sample_covariance(x: &DMatrix<f64>) -> DMatrix<f64> {
    let n = x.nrows();
    let centred = center_columns(x);
    centred.transpose() * &centred / ((n.max(2) - 1) as f64)
}

/// Subtract each column's mean.
pub fn center_columns(x: &DMatrix<f64>) -> DMatrix<f64> {
    let mut centred = x.clone();
    for mut col in centred.column_iter_mut() {
        let mean = col.mean();
        col.add_scalar_mut(-mean);
    }
    centred
}
