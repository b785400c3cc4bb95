//! Logistic regression by IRLS, and logistic mixed models by penalised
//! IRLS with a Laplace-approximated likelihood.

use crate::error::{PowerError, Result};
use crate::matrix::sparse::spmv;
use crate::model::{logistic, Family};
use crate::types::SparseMat;

use super::convergence::{relative_change, ConvergenceMonitor};
use super::mme::{CrossProducts, MixedModelEquations, MmeSolution};
use super::{Estimates, FitOptions};

/// Inner penalised IRLS steps per variance update.
const MAX_INNER: usize = 50;
const MIN_WEIGHT: f64 = 1e-10;
/// Largest change in the linear predictor accepted as settled.
const PIRLS_TOL: f64 = 1e-8;

/// Starting linear predictor, as `glm` does: mu = (y + 0.5) / 2.
fn initial_eta(y: &[f64]) -> Vec<f64> {
    y.iter()
        .map(|&v| {
            let mu = (v + 0.5) / 2.0;
            (mu / (1.0 - mu)).ln()
        })
        .collect()
}

/// One IRLS step from `eta`: weights mu(1 - mu) and the working response.
fn working_response(y: &[f64], eta: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut weights = Vec::with_capacity(y.len());
    let mut working = Vec::with_capacity(y.len());
    for (&yi, &e) in y.iter().zip(eta) {
        let mu = logistic(e);
        let w = (mu * (1.0 - mu)).max(MIN_WEIGHT);
        weights.push(w);
        working.push(e + (yi - mu) / w);
    }
    (weights, working)
}

fn bernoulli_loglik(y: &[f64], eta: &[f64]) -> f64 {
    y.iter()
        .zip(eta)
        .map(|(&yi, &e)| Family::bernoulli_loglik(yi, logistic(e)))
        .sum()
}

fn response_rss(y: &[f64], eta: &[f64]) -> f64 {
    y.iter().zip(eta).map(|(&yi, &e)| (yi - logistic(e)).powi(2)).sum()
}

fn linear_predictor(x: &SparseMat, z_blocks: &[SparseMat], sol: &MmeSolution) -> Vec<f64> {
    let mut eta = spmv(x, &sol.fixed_effects);
    for (z, u) in z_blocks.iter().zip(&sol.random_effects) {
        for (e, zu) in eta.iter_mut().zip(spmv(z, u)) {
            *e += zu;
        }
    }
    eta
}

/// Logistic regression without random effects.
pub fn fit_logistic(x: &SparseMat, y: &[f64], options: &FitOptions) -> Result<Estimates> {
    let mut eta = initial_eta(y);
    let mut beta = vec![0.0; x.cols()];
    let mut monitor = ConvergenceMonitor::new(options.tol, options.max_iter);

    loop {
        let (weights, working) = working_response(y, &eta);
        let cp = CrossProducts::weighted(x, &[], &weights, &working);
        let sol = MixedModelEquations::assemble(&cp, &[]).solve()?;
        eta = spmv(x, &sol.fixed_effects);
        let logl = bernoulli_loglik(y, &eta);
        monitor.record(logl, relative_change(&beta, &sol.fixed_effects, 1.0));
        beta = sol.fixed_effects;

        if monitor.n_iterations() > 1 && monitor.is_converged() {
            break;
        }
        if monitor.max_reached() {
            return Err(PowerError::FitDidNotConverge {
                iterations: monitor.n_iterations(),
                change: monitor.last_change(),
            });
        }
    }

    Ok(Estimates {
        log_likelihood: bernoulli_loglik(y, &eta),
        rss: response_rss(y, &eta),
        beta,
        variances: Vec::new(),
        sigma2: None,
        iterations: monitor.n_iterations(),
    })
}

/// Penalised IRLS for fixed variances, iterated from `eta` until the linear
/// predictor settles. Returns the final solution; `eta` is updated in place.
/// A predictor still moving after `MAX_INNER` steps is a failed fit.
fn pirls(
    x: &SparseMat,
    z_blocks: &[SparseMat],
    y: &[f64],
    penalties: &[f64],
    eta: &mut Vec<f64>,
) -> Result<(MmeSolution, Vec<usize>)> {
    let mut shift = f64::INFINITY;
    for _ in 0..MAX_INNER {
        let (weights, working) = working_response(y, eta);
        let cp = CrossProducts::weighted(x, z_blocks, &weights, &working);
        let sol = MixedModelEquations::assemble(&cp, penalties).solve()?;
        let next = linear_predictor(x, z_blocks, &sol);
        shift = eta
            .iter()
            .zip(&next)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        *eta = next;
        if shift < PIRLS_TOL {
            return Ok((sol, cp.n_random));
        }
    }
    Err(PowerError::FitDidNotConverge {
        iterations: MAX_INNER,
        change: shift,
    })
}

/// Logistic mixed model with independent random intercepts.
///
/// The Laplace log-likelihood is
///
/// ```text
/// Σ ℓ(y | η) - 1/2 Σ u_k'u_k / σk² - 1/2 Σ q_k ln σk² - 1/2 ln|Z'WZ + G⁻¹|
/// ```
///
/// and variances are updated with the EM-style step
/// `σk² = (u_k'u_k + tr(H⁻¹_kk)) / q_k`, `H = Z'WZ + G⁻¹`.
pub fn fit_logistic_mixed(
    x: &SparseMat,
    z_blocks: &[SparseMat],
    y: &[f64],
    options: &FitOptions,
) -> Result<Estimates> {
    let mut eta = initial_eta(y);
    let mut variances = vec![1.0; z_blocks.len()];
    let mut monitor = ConvergenceMonitor::new(options.tol, options.max_iter);
    let min_var = 1e-8;

    let (sol, logl) = loop {
        let penalties: Vec<f64> = variances.iter().map(|s| 1.0 / s).collect();
        let (sol, n_random) = pirls(x, z_blocks, y, &penalties, &mut eta)?;

        let mut penalty = 0.0;
        let mut log_det_g = 0.0;
        let mut updated = Vec::with_capacity(variances.len());
        for (k, s2) in variances.iter().enumerate() {
            let uu: f64 = sol.random_effects[k].iter().map(|u| u * u).sum();
            let q_k = n_random[k] as f64;
            penalty += uu / s2;
            log_det_g += q_k * s2.ln();
            updated.push(((uu + sol.block_trace(&n_random, k)) / q_k).max(min_var));
        }
        let logl = bernoulli_loglik(y, &eta) - 0.5 * (penalty + log_det_g + sol.log_det_zz);

        monitor.record(logl, relative_change(&variances, &updated, 1e-4));
        if monitor.is_converged() {
            break (sol, logl);
        }
        if monitor.max_reached() {
            return Err(PowerError::FitDidNotConverge {
                iterations: monitor.n_iterations(),
                change: monitor.last_change(),
            });
        }
        variances = updated;
    };

    Ok(Estimates {
        beta: sol.fixed_effects,
        variances,
        sigma2: None,
        log_likelihood: logl,
        rss: response_rss(y, &eta),
        iterations: monitor.n_iterations(),
    })
}
