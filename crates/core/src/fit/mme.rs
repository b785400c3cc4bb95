use nalgebra::{DMatrix, DVector};

use crate::error::{PowerError, Result};
use crate::matrix::sparse::{cross_dense, hstack, scale_rows, xt_y};
use crate::types::SparseMat;

/// Cross-products of the stacked design `W = [X | Z_1 | Z_2 | ...]`.
///
/// For unweighted Gaussian fits these are constant across iterations and
/// are computed once per fit.
#[derive(Debug, Clone)]
pub struct CrossProducts {
    /// W'W (or W'ΩW when weighted).
    pub wtw: DMatrix<f64>,
    /// W'y (or W'Ωz).
    pub wty: Vec<f64>,
    /// y'y (unweighted fits only; zero otherwise).
    pub yty: f64,
    pub n_fixed: usize,
    /// Number of columns of each Z block.
    pub n_random: Vec<usize>,
}

impl CrossProducts {
    /// Unweighted cross-products for the response `y`.
    pub fn new(x: &SparseMat, z_blocks: &[SparseMat], y: &[f64]) -> Self {
        let w = stack(x, z_blocks);
        Self {
            wtw: cross_dense(&w, &w),
            wty: xt_y(&w, y),
            yty: y.iter().map(|v| v * v).sum(),
            n_fixed: x.cols(),
            n_random: z_blocks.iter().map(|z| z.cols()).collect(),
        }
    }

    /// Weighted cross-products W'ΩW and W'Ωz for the working response `z`
    /// of an IRLS step (Ω = diag(weights)).
    pub fn weighted(x: &SparseMat, z_blocks: &[SparseMat], weights: &[f64], working: &[f64]) -> Self {
        let w = stack(x, z_blocks);
        let ww = scale_rows(&w, weights);
        Self {
            wtw: cross_dense(&w, &ww),
            wty: xt_y(&ww, working),
            yty: 0.0,
            n_fixed: x.cols(),
            n_random: z_blocks.iter().map(|z| z.cols()).collect(),
        }
    }

    pub fn dim(&self) -> usize {
        self.wty.len()
    }
}

fn stack(x: &SparseMat, z_blocks: &[SparseMat]) -> SparseMat {
    z_blocks.iter().fold(x.clone(), |acc, z| hstack(&acc, z))
}

/// Henderson's Mixed Model Equations, scaled by the residual variance.
///
/// ```text
/// [X'X       X'Z          ] [b]   [X'y]
/// [Z'X       Z'Z + Λ      ] [u] = [Z'y]
/// ```
///
/// where Λ is block diagonal with `λ_k I` on random term k. For Gaussian
/// models `λ_k = σe² / σk²`; for penalised IRLS the blocks are `1 / σk²`.
#[derive(Debug)]
pub struct MixedModelEquations {
    /// The full coefficient matrix C.
    pub coeff_matrix: DMatrix<f64>,
    /// The right-hand side vector.
    pub rhs: Vec<f64>,
    /// Number of fixed effect parameters.
    pub n_fixed: usize,
    /// Number of random effect levels per random term.
    pub n_random: Vec<usize>,
    /// Total dimension of the system.
    pub dim: usize,
}

impl MixedModelEquations {
    /// Assemble C = W'W + blockdiag(0, λ_1 I, ..., λ_K I).
    pub fn assemble(cp: &CrossProducts, penalties: &[f64]) -> Self {
        let dim = cp.dim();
        let mut c = cp.wtw.clone();
        let mut offset = cp.n_fixed;
        for (&q, &lambda) in cp.n_random.iter().zip(penalties) {
            for i in offset..offset + q {
                c[(i, i)] += lambda;
            }
            offset += q;
        }
        Self {
            coeff_matrix: c,
            rhs: cp.wty.clone(),
            n_fixed: cp.n_fixed,
            n_random: cp.n_random.clone(),
            dim,
        }
    }

    /// Solve C * sol = rhs using dense Cholesky.
    ///
    /// Also factors the random-effects block C_zz on its own, whose inverse
    /// and log-determinant enter the variance updates and the likelihood.
    pub fn solve(&self) -> Result<MmeSolution> {
        let chol = self.coeff_matrix.clone().cholesky().ok_or_else(|| {
            PowerError::NotPositiveDefinite("mixed model coefficient matrix".into())
        })?;
        let sol = chol.solve(&DVector::from_column_slice(&self.rhs));
        let solution: Vec<f64> = sol.as_slice().to_vec();
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(PowerError::NotPositiveDefinite(
                "mixed model equations are singular".into(),
            ));
        }

        let fixed_effects = solution[..self.n_fixed].to_vec();
        let mut random_effects = Vec::with_capacity(self.n_random.len());
        let mut offset = self.n_fixed;
        for &q in &self.n_random {
            random_effects.push(solution[offset..offset + q].to_vec());
            offset += q;
        }

        let q_total = self.dim - self.n_fixed;
        let (zz_inverse, log_det_zz) = if q_total > 0 {
            let czz = self
                .coeff_matrix
                .view((self.n_fixed, self.n_fixed), (q_total, q_total))
                .into_owned();
            let chol_zz = czz.cholesky().ok_or_else(|| {
                PowerError::NotPositiveDefinite("random-effects block of the mixed model equations".into())
            })?;
            let l = chol_zz.l();
            let log_det = 2.0 * (0..q_total).map(|i| l[(i, i)].ln()).sum::<f64>();
            (chol_zz.inverse(), log_det)
        } else {
            (DMatrix::zeros(0, 0), 0.0)
        };

        Ok(MmeSolution {
            solution,
            fixed_effects,
            random_effects,
            zz_inverse,
            log_det_zz,
        })
    }
}

/// Solution of the Mixed Model Equations.
pub struct MmeSolution {
    /// Full solution vector [b; u1; u2; ...].
    pub solution: Vec<f64>,
    /// Fixed effects: b-hat.
    pub fixed_effects: Vec<f64>,
    /// Random effects: u-hat, one vec per random term.
    pub random_effects: Vec<Vec<f64>>,
    /// C_zz^{-1}, the inverse of the random-effects block alone.
    pub zz_inverse: DMatrix<f64>,
    /// log|C_zz|.
    pub log_det_zz: f64,
}

impl MmeSolution {
    /// tr(C_zz^{-1}) restricted to the diagonal block of random term `k`.
    pub fn block_trace(&self, n_random: &[usize], k: usize) -> f64 {
        let start: usize = n_random[..k].iter().sum();
        (start..start + n_random[k]).map(|i| self.zz_inverse[(i, i)]).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::matrix::TripletBuilder;

    fn intercept(n: usize) -> SparseMat {
        let mut tri = TripletBuilder::new(n, 1);
        for i in 0..n {
            tri.add(i, 0, 1.0);
        }
        tri.to_csc()
    }

    #[test]
    fn test_mme_simple_intercept_only() {
        // y = mu + e: 3*mu = sum(y)
        let y = vec![5.0, 3.0, 7.0];
        let cp = CrossProducts::new(&intercept(3), &[], &y);
        let mme = MixedModelEquations::assemble(&cp, &[]);

        assert_eq!(mme.dim, 1);
        assert_relative_eq!(mme.coeff_matrix[(0, 0)], 3.0, epsilon = 1e-10);
        assert_relative_eq!(mme.rhs[0], 15.0, epsilon = 1e-10);
        assert_relative_eq!(cp.yty, 83.0, epsilon = 1e-10);

        let sol = mme.solve().unwrap();
        assert_relative_eq!(sol.fixed_effects[0], 5.0, epsilon = 1e-10);
        assert_eq!(sol.zz_inverse.nrows(), 0);
    }

    #[test]
    fn test_mme_one_fixed_one_random() {
        // y = mu + u + e with 2 random levels
        let mut z_tri = TripletBuilder::new(4, 2);
        z_tri.add(0, 0, 1.0);
        z_tri.add(1, 0, 1.0);
        z_tri.add(2, 1, 1.0);
        z_tri.add(3, 1, 1.0);
        let z = z_tri.to_csc();

        let y = vec![10.0, 12.0, 6.0, 8.0];
        let sigma_e2 = 2.0;
        let sigma_u2 = 4.0;

        let cp = CrossProducts::new(&intercept(4), &[z], &y);
        let mme = MixedModelEquations::assemble(&cp, &[sigma_e2 / sigma_u2]);
        assert_eq!(mme.dim, 3);
        assert_eq!(mme.n_random, vec![2]);

        let sol = mme.solve().unwrap();
        assert_relative_eq!(sol.fixed_effects[0], 9.0, epsilon = 1e-10);
        // BLUPs are shrunk towards zero: group means deviate by +-2
        assert_relative_eq!(sol.random_effects[0][0], 2.0 * 2.0 / 2.5, epsilon = 1e-10);
        assert_relative_eq!(sol.random_effects[0][1], -2.0 * 2.0 / 2.5, epsilon = 1e-10);
        // C_zz = diag(2.5, 2.5)
        assert_relative_eq!(sol.log_det_zz, 2.0 * 2.5_f64.ln(), epsilon = 1e-10);
        assert_relative_eq!(sol.block_trace(&mme.n_random, 0), 0.8, epsilon = 1e-10);
    }

    #[test]
    fn test_weighted_cross_products() {
        let y = vec![1.0, 2.0];
        let cp = CrossProducts::weighted(&intercept(2), &[], &[0.5, 2.0], &y);
        assert_relative_eq!(cp.wtw[(0, 0)], 2.5, epsilon = 1e-12);
        assert_relative_eq!(cp.wty[0], 4.5, epsilon = 1e-12);
    }
}
