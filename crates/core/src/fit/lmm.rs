//! Maximum-likelihood fitting of Gaussian linear and linear mixed models.
//!
//! Mixed models use EM on Henderson's equations. ML rather than REML is
//! used so that models with different fixed effects can be compared by a
//! likelihood-ratio test.

use crate::error::{PowerError, Result};
use crate::matrix::sparse::spmv;
use crate::types::SparseMat;

use super::convergence::{relative_change, ConvergenceMonitor};
use super::mme::{CrossProducts, MixedModelEquations, MmeSolution};
use super::{Estimates, FitOptions};

const LOG_2PI: f64 = 1.837_877_066_409_345_3;

/// Ordinary least squares with the ML residual variance rss / n.
pub fn fit_linear(x: &SparseMat, y: &[f64]) -> Result<Estimates> {
    let cp = CrossProducts::new(x, &[], y);
    let sol = MixedModelEquations::assemble(&cp, &[]).solve()?;
    let rss = residual_sum_of_squares(x, &[], y, &sol);
    let n = y.len() as f64;
    let sigma2 = (rss / n).max(f64::MIN_POSITIVE);
    Ok(Estimates {
        beta: sol.fixed_effects,
        variances: Vec::new(),
        sigma2: Some(sigma2),
        log_likelihood: -0.5 * n * (LOG_2PI + sigma2.ln() + 1.0),
        rss,
        iterations: 1,
    })
}

/// EM-ML estimation of a Gaussian model with independent random intercepts.
///
/// Update formulas, with T = σe² C_zz⁻¹:
///
/// ```text
/// σk² = (u_k'u_k + tr(T_kk)) / q_k
/// σe² = (ê'ê + tr(Z'Z T)) / n
/// ```
pub fn fit_mixed(x: &SparseMat, z_blocks: &[SparseMat], y: &[f64], options: &FitOptions) -> Result<Estimates> {
    let n = y.len();
    let cp = CrossProducts::new(x, z_blocks, y);
    let k_terms = z_blocks.len();

    let mean = y.iter().sum::<f64>() / n as f64;
    let y_var = y.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n.max(2) - 1) as f64;
    let scale = y_var.max(1e-12);
    let floor = 1e-6 * scale;
    let min_var = 1e-10 * scale;

    let init = scale / (k_terms + 1) as f64;
    let mut sigma2_e = init;
    let mut sigma2_random = vec![init; k_terms];
    let mut monitor = ConvergenceMonitor::new(options.tol, options.max_iter);

    loop {
        let penalties: Vec<f64> = sigma2_random.iter().map(|s| sigma2_e / s).collect();
        let mme = MixedModelEquations::assemble(&cp, &penalties);
        let sol = mme.solve()?;
        let logl = log_likelihood(&cp, &sol, sigma2_e, &sigma2_random, n);

        let rss = residual_sum_of_squares(x, z_blocks, y, &sol);
        let q_total: usize = cp.n_random.iter().sum();
        let mut penalised_trace = 0.0;
        let mut new_random = Vec::with_capacity(k_terms);
        for k in 0..k_terms {
            let q_k = cp.n_random[k] as f64;
            let trace_k = sol.block_trace(&cp.n_random, k);
            penalised_trace += penalties[k] * trace_k;
            let uu: f64 = sol.random_effects[k].iter().map(|u| u * u).sum();
            new_random.push(((uu + sigma2_e * trace_k) / q_k).max(min_var));
        }
        // tr(Z'Z C_zz⁻¹) = q - tr(Λ C_zz⁻¹)
        let new_e = ((rss + sigma2_e * (q_total as f64 - penalised_trace)) / n as f64).max(min_var);

        let mut old = sigma2_random.clone();
        old.push(sigma2_e);
        let mut new = new_random.clone();
        new.push(new_e);
        monitor.record(logl, relative_change(&old, &new, floor));

        sigma2_random = new_random;
        sigma2_e = new_e;

        if monitor.is_converged() {
            break;
        }
        if monitor.max_reached() {
            return Err(PowerError::FitDidNotConverge {
                iterations: monitor.n_iterations(),
                change: monitor.last_change(),
            });
        }
    }

    let penalties: Vec<f64> = sigma2_random.iter().map(|s| sigma2_e / s).collect();
    let sol = MixedModelEquations::assemble(&cp, &penalties).solve()?;
    let logl = log_likelihood(&cp, &sol, sigma2_e, &sigma2_random, n);
    let rss = residual_sum_of_squares(x, z_blocks, y, &sol);
    log::trace!(
        "EM-ML converged after {} iterations: logL = {:.4}",
        monitor.n_iterations(),
        logl
    );

    Ok(Estimates {
        beta: sol.fixed_effects,
        variances: sigma2_random,
        sigma2: Some(sigma2_e),
        log_likelihood: logl,
        rss,
        iterations: monitor.n_iterations(),
    })
}

/// Marginal log-likelihood at the MME solution:
///
/// ```text
/// -1/2 [n ln 2π + n ln σe² + Σ q_k ln σk² + ln|C_zz / σe²| + (y'y - b'X'y - u'Z'y) / σe²]
/// ```
fn log_likelihood(cp: &CrossProducts, sol: &MmeSolution, sigma2_e: f64, sigma2_random: &[f64], n: usize) -> f64 {
    let n = n as f64;
    let q_total: usize = cp.n_random.iter().sum();
    let fitted_ss: f64 = sol.solution.iter().zip(&cp.wty).map(|(s, r)| s * r).sum();
    let quad = (cp.yty - fitted_ss) / sigma2_e;
    let log_det_g: f64 = cp
        .n_random
        .iter()
        .zip(sigma2_random)
        .map(|(&q, s)| q as f64 * s.ln())
        .sum();
    let log_det_c = sol.log_det_zz - q_total as f64 * sigma2_e.ln();
    -0.5 * (n * LOG_2PI + n * sigma2_e.ln() + log_det_g + log_det_c + quad)
}

/// ê'ê with ê = y - Xb - Σ Z_k u_k.
fn residual_sum_of_squares(x: &SparseMat, z_blocks: &[SparseMat], y: &[f64], sol: &MmeSolution) -> f64 {
    let mut fitted = spmv(x, &sol.fixed_effects);
    for (z, u) in z_blocks.iter().zip(&sol.random_effects) {
        for (f, zu) in fitted.iter_mut().zip(spmv(z, u)) {
            *f += zu;
        }
    }
    y.iter().zip(&fitted).map(|(a, b)| (a - b).powi(2)).sum()
}
