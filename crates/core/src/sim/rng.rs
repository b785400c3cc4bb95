//! Random-source helpers: reproducible sub-streams and the normal,
//! multivariate-normal and Bernoulli draws the simulators need.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Bernoulli, Distribution, StandardNormal};

use crate::error::{PowerError, Result};

/// One step of the SplitMix64 sequence; used to mix seed components.
fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed of the sub-stream for one trial of one (sample size, effect size) cell.
///
/// Depends only on the values, not on their position in a sweep, so the same
/// cell reproduces the same draws whatever else is swept alongside it.
pub fn substream_seed(seed: u64, sample_size: usize, effect_size: f64, trial: usize) -> u64 {
    let mut h = splitmix64(seed);
    h = splitmix64(h ^ sample_size as u64);
    h = splitmix64(h ^ effect_size.to_bits());
    splitmix64(h ^ trial as u64)
}

/// Generator for one trial's sub-stream.
pub fn trial_rng(seed: u64, sample_size: usize, effect_size: f64, trial: usize) -> StdRng {
    StdRng::seed_from_u64(substream_seed(seed, sample_size, effect_size, trial))
}

/// One N(mean, sd) draw.
pub fn normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, sd: f64) -> f64 {
    let z: f64 = StandardNormal.sample(rng);
    mean + sd * z
}

/// An `nrows x ncols` matrix of independent standard normal draws, filled
/// row by row.
pub fn standard_normal_matrix<R: Rng + ?Sized>(rng: &mut R, nrows: usize, ncols: usize) -> DMatrix<f64> {
    let values: Vec<f64> = (0..nrows * ncols).map(|_| StandardNormal.sample(rng)).collect();
    DMatrix::from_row_slice(nrows, ncols, &values)
}

/// A factor `F` with `F * F' = cov`.
///
/// Uses Cholesky when `cov` is positive definite and falls back to a
/// symmetric eigen square root for positive semi-definite matrices (for
/// example a zero variance component).
pub fn covariance_factor(cov: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    if let Some(chol) = cov.clone().cholesky() {
        return Ok(chol.l());
    }
    let eig = cov.clone().symmetric_eigen();
    let scale = eig.eigenvalues.amax().max(1.0);
    if eig.eigenvalues.iter().any(|&v| v < -1e-10 * scale) {
        return Err(PowerError::NotPositiveDefinite(
            "covariance matrix has a negative eigenvalue".into(),
        ));
    }
    let sqrt_vals = eig.eigenvalues.map(|v| v.max(0.0).sqrt());
    Ok(&eig.eigenvectors * DMatrix::from_diagonal(&sqrt_vals))
}

/// One multivariate normal draw N(mean, F F').
pub fn mvnorm<R: Rng + ?Sized>(rng: &mut R, mean: &DVector<f64>, factor: &DMatrix<f64>) -> DVector<f64> {
    let z = DVector::from_iterator(factor.ncols(), (0..factor.ncols()).map(|_| StandardNormal.sample(rng)));
    mean + factor * z
}

/// One Bernoulli(p) draw as 0.0 / 1.0. `p` is clamped to [0, 1].
///
/// # Errors
/// [`PowerError::InvalidConfiguration`] when `p` is NaN or infinite.
pub fn bernoulli<R: Rng + ?Sized>(rng: &mut R, p: f64) -> Result<f64> {
    if !p.is_finite() {
        return Err(PowerError::invalid("p", format!("success probability must be finite, got {p}")));
    }
    let dist = Bernoulli::new(p.clamp(0.0, 1.0))
        .map_err(|e| PowerError::invalid("p", e.to_string()))?;
    Ok(if dist.sample(rng) { 1.0 } else { 0.0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_substreams_distinct_and_stable() {
        let a = substream_seed(42, 20, 0.5, 0);
        assert_eq!(a, substream_seed(42, 20, 0.5, 0));
        assert_ne!(a, substream_seed(42, 20, 0.5, 1));
        assert_ne!(a, substream_seed(42, 40, 0.5, 0));
        assert_ne!(a, substream_seed(42, 20, 0.6, 0));
        assert_ne!(a, substream_seed(43, 20, 0.5, 0));
    }

    #[test]
    fn test_covariance_factor_psd() {
        let cov = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 0.0]);
        let f = covariance_factor(&cov).unwrap();
        let back = &f * f.transpose();
        assert_relative_eq!(back, cov, epsilon = 1e-12);

        let bad = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(covariance_factor(&bad).is_err());
    }

    #[test]
    fn test_mvnorm_moments() {
        let mut rng = StdRng::seed_from_u64(7);
        let cov = DMatrix::from_row_slice(2, 2, &[1.0, 0.8, 0.8, 1.0]);
        let f = covariance_factor(&cov).unwrap();
        let mean = DVector::from_vec(vec![1.0, -1.0]);
        let n = 20_000;
        let draws: Vec<DVector<f64>> = (0..n).map(|_| mvnorm(&mut rng, &mean, &f)).collect();
        let m0 = draws.iter().map(|d| d[0]).sum::<f64>() / n as f64;
        let cross = draws.iter().map(|d| (d[0] - 1.0) * (d[1] + 1.0)).sum::<f64>() / n as f64;
        assert!((m0 - 1.0).abs() < 0.05);
        assert!((cross - 0.8).abs() < 0.05);
    }

    #[test]
    fn test_bernoulli_edges() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(bernoulli(&mut rng, 0.0).unwrap(), 0.0);
        assert_eq!(bernoulli(&mut rng, 1.0).unwrap(), 1.0);
        assert_eq!(bernoulli(&mut rng, 1.5).unwrap(), 1.0);
    }

    #[test]
    fn test_bernoulli_rejects_non_finite_probability() {
        let mut rng = StdRng::seed_from_u64(1);
        for p in [f64::NAN, f64::INFINITY] {
            assert!(matches!(
                bernoulli(&mut rng, p),
                Err(PowerError::InvalidConfiguration { parameter, .. }) if parameter == "p"
            ));
        }
    }
}
