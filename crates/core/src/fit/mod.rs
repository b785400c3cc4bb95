//! Model fitting and nested-model tests.
//!
//! The power loop only needs the [`ModelFitter`] contract; [`ReferenceFitter`]
//! is the built-in implementation.

mod convergence;
mod glmm;
mod lmm;
mod mme;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data::DataFrame;
use crate::error::{PowerError, Result};
use crate::model::{
    build_fixed_design, build_random_designs, Family, FitStatistics, FittedModel, Formula,
    RandomComponent,
};

pub use convergence::ConvergenceMonitor;
pub use mme::{CrossProducts, MixedModelEquations, MmeSolution};
pub use test::{compare_models, TestMethod};

/// Iteration limits for the iterative fits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Maximum iterations before a fit is reported as not converged
    /// (default: 500).
    pub max_iter: usize,
    /// Relative convergence tolerance (default: 1e-6).
    pub tol: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iter: 500,
            tol: 1e-6,
        }
    }
}

/// Raw output of one of the estimation routines.
#[derive(Debug, Clone)]
pub(crate) struct Estimates {
    pub beta: Vec<f64>,
    /// One variance per random term.
    pub variances: Vec<f64>,
    /// Residual variance (Gaussian only).
    pub sigma2: Option<f64>,
    pub log_likelihood: f64,
    pub rss: f64,
    pub iterations: usize,
}

/// The model-fitting contract the power loop relies on.
///
/// Implementations must be deterministic: the same inputs give the same
/// estimates.
pub trait ModelFitter: Send + Sync {
    /// Estimate `formula` on `data`.
    fn fit(&self, formula: &Formula, data: &Arc<DataFrame>, family: Family) -> Result<FittedModel>;

    /// p-value for the terms of `full` that `reduced` lacks.
    fn test_term(&self, full: &FittedModel, reduced: &FittedModel, method: TestMethod) -> Result<f64> {
        compare_models(full, reduced, method)
    }
}

/// Built-in fitter: least squares, EM-ML for Gaussian mixed models, IRLS
/// for logistic models and penalised IRLS (Laplace) for logistic mixed
/// models. Random effects must be intercepts.
#[derive(Debug, Clone, Default)]
pub struct ReferenceFitter {
    options: FitOptions,
}

impl ReferenceFitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: FitOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }
}

impl ModelFitter for ReferenceFitter {
    fn fit(&self, formula: &Formula, data: &Arc<DataFrame>, family: Family) -> Result<FittedModel> {
        if let Some(term) = formula.random.iter().find(|t| !t.slopes.is_empty() || !t.intercept) {
            return Err(PowerError::Formula(format!(
                "only random intercepts can be estimated; the term on '{}' has slopes",
                term.group
            )));
        }

        let y = data.get_float(&formula.response)?;
        if y.iter().any(|v| !v.is_finite()) {
            return Err(PowerError::Data(format!(
                "response '{}' has missing values",
                formula.response
            )));
        }
        if family == Family::Binomial && y.iter().any(|&v| v != 0.0 && v != 1.0) {
            return Err(PowerError::Data(format!(
                "binomial response '{}' must be 0/1",
                formula.response
            )));
        }

        let design = build_fixed_design(data, formula)?;
        let random_designs = build_random_designs(data, formula)?;
        let z_blocks: Vec<_> = random_designs.iter().map(|rd| rd.z.clone()).collect();

        let est = match (family, z_blocks.is_empty()) {
            (Family::Gaussian, true) => lmm::fit_linear(&design.x, y)?,
            (Family::Gaussian, false) => lmm::fit_mixed(&design.x, &z_blocks, y, &self.options)?,
            (Family::Binomial, true) => glmm::fit_logistic(&design.x, y, &self.options)?,
            (Family::Binomial, false) => {
                glmm::fit_logistic_mixed(&design.x, &z_blocks, y, &self.options)?
            }
        };
        log::trace!(
            "fitted '{}' in {} iterations, logL = {:.4}",
            formula,
            est.iterations,
            est.log_likelihood
        );

        let random = random_designs
            .iter()
            .zip(&est.variances)
            .map(|(rd, &v)| RandomComponent::intercept(&rd.group, v))
            .collect();

        Ok(FittedModel {
            formula: formula.clone(),
            family,
            fixef: design.names.iter().cloned().zip(est.beta.iter().copied()).collect(),
            random,
            sigma: est.sigma2.map(f64::sqrt),
            data: Arc::clone(data),
            stats: Some(FitStatistics {
                log_likelihood: est.log_likelihood,
                rss: est.rss,
                n_obs: y.len(),
                n_fixed: design.ncols(),
                iterations: est.iterations,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelBuilder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn two_groups() -> Arc<DataFrame> {
        let mut df = DataFrame::new();
        df.add_factor_column("group", &["a", "a", "a", "b", "b", "b"]).unwrap();
        df.add_float_column("y", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        Arc::new(df)
    }

    #[test]
    fn test_fit_two_groups() {
        let fitter = ReferenceFitter::new();
        let data = two_groups();
        let full = fitter
            .fit(&Formula::parse("y ~ group").unwrap(), &data, Family::Gaussian)
            .unwrap();
        assert!((full.coefficient("(Intercept)").unwrap() - 2.0).abs() < 1e-10);
        assert!((full.coefficient("groupb").unwrap() - 3.0).abs() < 1e-10);
        let stats = full.stats.as_ref().unwrap();
        assert!((stats.rss - 4.0).abs() < 1e-10);
        assert_eq!(stats.df_residual(), 4);

        let reduced = fitter
            .fit(&Formula::parse("y ~ 1").unwrap(), &data, Family::Gaussian)
            .unwrap();
        // t = 3 / sqrt(2/3) on 4 df
        let p = fitter.test_term(&full, &reduced, TestMethod::FTest).unwrap();
        assert!(p > 0.01 && p < 0.03, "p = {}", p);
        let p_lrt = fitter.test_term(&full, &reduced, TestMethod::LikelihoodRatio).unwrap();
        assert!(p_lrt < p);
    }

    #[test]
    fn test_missing_response_rejected() {
        let mut df = (*two_groups()).clone();
        df.set_float_column("y", vec![1.0, f64::NAN, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let result = ReferenceFitter::new().fit(
            &Formula::parse("y ~ group").unwrap(),
            &Arc::new(df),
            Family::Gaussian,
        );
        assert!(matches!(result, Err(PowerError::Data(_))));
    }

    #[test]
    fn test_random_slopes_rejected() {
        let mut df = (*two_groups()).clone();
        df.add_float_column("x", vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]).unwrap();
        let result = ReferenceFitter::new().fit(
            &Formula::parse("y ~ x + (x | group)").unwrap(),
            &Arc::new(df),
            Family::Gaussian,
        );
        assert!(matches!(result, Err(PowerError::Formula(_))));
    }

    #[test]
    fn test_mixed_fit_recovers_simulated_model() {
        let subjects: Vec<String> = (0..400).map(|i| format!("s{}", i / 8)).collect();
        let refs: Vec<&str> = subjects.iter().map(String::as_str).collect();
        let mut df = DataFrame::new();
        df.add_factor_column("subject", &refs).unwrap();
        df.add_float_column("x", (0..400).map(|i| (i % 8) as f64 / 7.0).collect())
            .unwrap();
        let model = ModelBuilder::new()
            .formula("y ~ x + (1 | subject)")
            .data(&df)
            .fixef("(Intercept)", 1.0)
            .fixef("x", 2.0)
            .var_corr_scalar("subject", 1.0)
            .sigma(0.5)
            .build(&mut StdRng::seed_from_u64(8))
            .unwrap();

        let fit = ReferenceFitter::new()
            .fit(&model.formula, &model.data, Family::Gaussian)
            .unwrap();
        assert!((fit.coefficient("x").unwrap() - 2.0).abs() < 0.2);
        assert!((fit.sigma.unwrap() - 0.5).abs() < 0.1);
        assert!((fit.random[0].covariance[(0, 0)] - 1.0).abs() < 0.6);
    }
}
