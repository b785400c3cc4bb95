use std::sync::Arc;

use indexmap::IndexMap;
use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::data::DataFrame;
use crate::error::{PowerError, Result};
use crate::matrix::sparse::spmv;
use crate::sim::rng::{bernoulli, covariance_factor, mvnorm, normal};

use super::design::{build_fixed_design, build_random_designs, RandomDesign};
use super::extend::{extend_between, extend_within, ExtensionDirective};
use super::family::Family;
use super::formula::Formula;

/// Variance/covariance of one random-effect term.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomComponent {
    /// Grouping factor name.
    pub group: String,
    /// Component labels, e.g. `["(Intercept)", "x"]`.
    pub terms: Vec<String>,
    /// Covariance matrix of the components (terms x terms).
    pub covariance: DMatrix<f64>,
}

impl RandomComponent {
    /// A random-intercept component with the given variance.
    pub fn intercept(group: &str, variance: f64) -> Self {
        Self {
            group: group.to_string(),
            terms: vec![super::formula::INTERCEPT.to_string()],
            covariance: DMatrix::from_element(1, 1, variance),
        }
    }
}

/// Statistics recorded when a model was estimated from data.
#[derive(Debug, Clone, PartialEq)]
pub struct FitStatistics {
    /// Maximised (ML or Laplace) log-likelihood.
    pub log_likelihood: f64,
    /// Residual sum of squares on the response scale.
    pub rss: f64,
    pub n_obs: usize,
    /// Number of fixed-effect coefficients.
    pub n_fixed: usize,
    pub iterations: usize,
}

impl FitStatistics {
    /// Residual degrees of freedom, n - p.
    pub fn df_residual(&self) -> usize {
        self.n_obs.saturating_sub(self.n_fixed)
    }
}

/// A (fitted or hypothetical) model: formula, parameter values, and the
/// dataset it belongs to.
///
/// Values are never mutated in place; overrides and extensions return new
/// models so that each sweep cell works from its own snapshot.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub formula: Formula,
    pub family: Family,
    /// Fixed-effect coefficients by name, in design-column order.
    pub fixef: IndexMap<String, f64>,
    /// One entry per random term of the formula, in formula order.
    pub random: Vec<RandomComponent>,
    /// Residual standard deviation (Gaussian only).
    pub sigma: Option<f64>,
    pub data: Arc<DataFrame>,
    /// Present when the model was estimated rather than specified.
    pub stats: Option<FitStatistics>,
}

impl FittedModel {
    /// Coefficient value by name.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.fixef.get(name).copied()
    }

    /// A new model with coefficient `name` set to `value`.
    ///
    /// # Errors
    /// [`PowerError::InvalidConfiguration`] if the model has no such coefficient.
    pub fn with_fixef(&self, name: &str, value: f64) -> Result<FittedModel> {
        if !value.is_finite() {
            return Err(PowerError::invalid(name, "coefficient must be finite"));
        }
        let mut next = self.clone();
        match next.fixef.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                return Err(PowerError::invalid(
                    name,
                    format!(
                        "no such fixed effect; available: {:?}",
                        self.fixef.keys().collect::<Vec<_>>()
                    ),
                ))
            }
        }
        next.stats = None;
        Ok(next)
    }

    /// A new model with the residual standard deviation replaced.
    pub fn with_sigma(&self, sigma: f64) -> Result<FittedModel> {
        if !(sigma.is_finite() && sigma >= 0.0) {
            return Err(PowerError::invalid("sigma", "must be finite and non-negative"));
        }
        let mut next = self.clone();
        next.sigma = Some(sigma);
        next.stats = None;
        Ok(next)
    }

    /// A new model with the covariance of the random term on `group` replaced.
    pub fn with_var_corr(&self, group: &str, covariance: DMatrix<f64>) -> Result<FittedModel> {
        let mut next = self.clone();
        let component = next
            .random
            .iter_mut()
            .find(|c| c.group == group)
            .ok_or_else(|| PowerError::UnknownFactor(group.to_string()))?;
        if covariance.shape() != component.covariance.shape() {
            return Err(PowerError::ShapeMismatch {
                expected: component.covariance.nrows(),
                got: covariance.nrows(),
                context: format!("covariance for '{}'", group),
            });
        }
        covariance_factor(&covariance)?;
        component.covariance = covariance;
        next.stats = None;
        Ok(next)
    }

    /// A new model on an enlarged dataset (see [`ExtensionDirective`]).
    /// Outcomes of cloned rows are missing until the next simulation.
    pub fn extend(&self, directive: &ExtensionDirective) -> Result<FittedModel> {
        let response = Some(self.formula.response.as_str());
        let data = match directive {
            ExtensionDirective::Between { along, n } => extend_between(&self.data, along, *n, response)?,
            ExtensionDirective::Within { unit, by, n } => {
                extend_within(&self.data, unit, by, *n, response)?
            }
        };
        let mut next = self.clone();
        next.data = Arc::new(data);
        next.stats = None;
        Ok(next)
    }

    /// Number of distinct levels of a grouping column in the model's data.
    pub fn n_levels(&self, group: &str) -> Result<usize> {
        Ok(self.data.grouping(group)?.droplevels().n_levels())
    }

    /// Draw a fresh outcome vector for the model's own data from its
    /// parameters: linear predictor + random deviates, inverse link, then
    /// residual noise (Gaussian) or a Bernoulli draw (Binomial).
    pub fn simulate_response<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f64>> {
        let eta = self.linear_predictor(rng)?;
        match self.family {
            Family::Gaussian => {
                let sigma = self
                    .sigma
                    .ok_or_else(|| PowerError::invalid("sigma", "Gaussian models need a residual scale"))?;
                Ok(eta.iter().map(|&e| normal(rng, e, sigma)).collect())
            }
            Family::Binomial => eta
                .iter()
                .map(|&e| bernoulli(rng, self.family.linkinv(e)))
                .collect(),
        }
    }

    /// The model's data with a freshly simulated outcome column.
    pub fn simulate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<DataFrame> {
        let y = self.simulate_response(rng)?;
        let mut data = (*self.data).clone();
        data.set_float_column(&self.formula.response, y)?;
        Ok(data)
    }

    /// Xb + sum_k Z_k u_k with u_k drawn per grouping level.
    fn linear_predictor<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f64>> {
        let design = build_fixed_design(&self.data, &self.formula)?;
        let beta = self.coefficients_for(&design.names)?;
        let mut eta = spmv(&design.x, &beta);

        let random_designs = build_random_designs(&self.data, &self.formula)?;
        for rd in &random_designs {
            let u = self.draw_random_effects(rd, rng)?;
            for (e, zu) in eta.iter_mut().zip(spmv(&rd.z, &u)) {
                *e += zu;
            }
        }
        Ok(eta)
    }

    /// Coefficients ordered like `names`; every name must be present and no
    /// coefficient may be left over.
    pub(crate) fn coefficients_for(&self, names: &[String]) -> Result<Vec<f64>> {
        if let Some(extra) = self.fixef.keys().find(|k| !names.contains(k)) {
            return Err(PowerError::invalid(
                extra.as_str(),
                format!("coefficient does not match any design column {:?}", names),
            ));
        }
        names
            .iter()
            .map(|name| {
                self.fixef
                    .get(name)
                    .copied()
                    .ok_or_else(|| PowerError::invalid(name.as_str(), "no value supplied for fixed effect"))
            })
            .collect()
    }

    fn draw_random_effects<R: Rng + ?Sized>(&self, rd: &RandomDesign, rng: &mut R) -> Result<Vec<f64>> {
        let component = self
            .random
            .iter()
            .find(|c| c.group == rd.group && c.terms == rd.components)
            .ok_or_else(|| {
                PowerError::invalid(
                    rd.group.as_str(),
                    format!("no variance supplied for random term {:?}", rd.components),
                )
            })?;
        let factor = covariance_factor(&component.covariance)?;
        let zero = DVector::zeros(rd.n_components());
        let mut u = Vec::with_capacity(rd.n_levels() * rd.n_components());
        for _ in 0..rd.n_levels() {
            u.extend(mvnorm(rng, &zero, &factor).iter());
        }
        Ok(u)
    }

    /// Human-readable parameter summary.
    pub fn summary(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!("=== {} ({}) ===\n", self.formula, self.family));
        s.push_str(&format!("Observations: {}\n", self.data.nrows()));
        if let Some(stats) = &self.stats {
            s.push_str(&format!(
                "Log-likelihood: {:.4}   Iterations: {}\n",
                stats.log_likelihood, stats.iterations
            ));
        }
        s.push_str("\n--- Fixed Effects ---\n");
        for (name, value) in &self.fixef {
            s.push_str(&format!("  {}: {:.6}\n", name, value));
        }
        if !self.random.is_empty() {
            s.push_str("\n--- Random Effects ---\n");
            for rc in &self.random {
                for (i, term) in rc.terms.iter().enumerate() {
                    s.push_str(&format!(
                        "  {} {}: variance={:.6}\n",
                        rc.group,
                        term,
                        rc.covariance[(i, i)]
                    ));
                }
            }
        }
        if let Some(sigma) = self.sigma {
            s.push_str(&format!("  Residual: sd={:.6}\n", sigma));
        }
        s
    }
}
