use std::sync::Arc;

use indexmap::IndexMap;
use nalgebra::DMatrix;
use rand::Rng;

use crate::data::DataFrame;
use crate::error::{PowerError, Result};
use crate::sim::rng::covariance_factor;

use super::design::build_fixed_design;
use super::family::Family;
use super::formula::Formula;
use super::state::{FittedModel, RandomComponent};

/// Builder for a [`FittedModel`] from externally supplied parameter values.
///
/// The dataset holds the predictors; the outcome column named by the
/// formula is synthesised from the parameters when [`build`](Self::build)
/// is called.
///
/// ```
/// use mixedpower_core::data::DataFrame;
/// use mixedpower_core::model::ModelBuilder;
/// use rand::SeedableRng;
///
/// let mut df = DataFrame::new();
/// df.add_factor_column("subject", &["a", "a", "b", "b"]).unwrap();
/// df.add_float_column("x", vec![0.0, 1.0, 0.0, 1.0]).unwrap();
///
/// let mut rng = rand::rngs::StdRng::seed_from_u64(1);
/// let model = ModelBuilder::new()
///     .formula("y ~ x + (1 | subject)")
///     .data(&df)
///     .fixef("(Intercept)", 2.0)
///     .fixef("x", 0.5)
///     .var_corr_scalar("subject", 1.0)
///     .sigma(1.0)
///     .build(&mut rng)
///     .unwrap();
/// assert_eq!(model.data.get_float("y").unwrap().len(), 4);
/// ```
pub struct ModelBuilder<'a> {
    formula: Option<String>,
    data: Option<&'a DataFrame>,
    family: String,
    fixef: IndexMap<String, f64>,
    var_corr: IndexMap<String, DMatrix<f64>>,
    sigma: Option<f64>,
}

impl<'a> ModelBuilder<'a> {
    /// Create a new builder (Gaussian family, no parameters).
    pub fn new() -> Self {
        Self {
            formula: None,
            data: None,
            family: Family::Gaussian.name().to_string(),
            fixef: IndexMap::new(),
            var_corr: IndexMap::new(),
            sigma: None,
        }
    }

    /// Set the model formula, e.g. `"y ~ x + condition + (1 | subject)"`.
    pub fn formula(mut self, formula: &str) -> Self {
        self.formula = Some(formula.to_string());
        self
    }

    /// Set the dataset holding the predictor columns.
    pub fn data(mut self, df: &'a DataFrame) -> Self {
        self.data = Some(df);
        self
    }

    /// Set the model family by name (`"gaussian"` or `"binomial"`).
    pub fn family(mut self, family: &str) -> Self {
        self.family = family.to_string();
        self
    }

    /// Set one fixed-effect coefficient. Calling again with the same name
    /// overrides the earlier value.
    pub fn fixef(mut self, name: &str, value: f64) -> Self {
        self.fixef.insert(name.to_string(), value);
        self
    }

    /// Set the covariance matrix of the random term on `group`, ordered like
    /// the term's components (intercept first, then slopes).
    pub fn var_corr(mut self, group: &str, covariance: DMatrix<f64>) -> Self {
        self.var_corr.insert(group.to_string(), covariance);
        self
    }

    /// Set the variance of a random-intercept term on `group`.
    pub fn var_corr_scalar(self, group: &str, variance: f64) -> Self {
        self.var_corr(group, DMatrix::from_element(1, 1, variance))
    }

    /// Set the residual standard deviation (Gaussian models).
    pub fn sigma(mut self, sigma: f64) -> Self {
        self.sigma = Some(sigma);
        self
    }

    /// Validate the parameters against the design and synthesise the outcome.
    ///
    /// # Errors
    /// - [`PowerError::UnsupportedFamily`] for an unknown family name.
    /// - [`PowerError::MissingColumn`] if a predictor or grouping column is absent.
    /// - [`PowerError::InvalidConfiguration`] for missing, unknown or
    ///   non-finite parameter values.
    /// - [`PowerError::ShapeMismatch`] if a covariance matrix does not match
    ///   the number of random-term components.
    pub fn build<R: Rng + ?Sized>(self, rng: &mut R) -> Result<FittedModel> {
        let family: Family = self.family.parse()?;
        let text = self
            .formula
            .ok_or_else(|| PowerError::invalid("formula", "no formula provided"))?;
        let formula = Formula::parse(&text)?;
        let df = self
            .data
            .ok_or_else(|| PowerError::invalid("data", "no dataset provided"))?;
        if df.nrows() == 0 {
            return Err(PowerError::invalid("data", "dataset has no rows"));
        }

        for column in formula.predictors() {
            df.get_column(&column)?;
        }

        let design = build_fixed_design(df, &formula)?;
        for name in &design.names {
            match self.fixef.get(name) {
                Some(v) if v.is_finite() => {}
                Some(_) => return Err(PowerError::invalid(name.as_str(), "coefficient must be finite")),
                None => return Err(PowerError::invalid(name.as_str(), "no value supplied for fixed effect")),
            }
        }
        if let Some(extra) = self.fixef.keys().find(|k| !design.names.contains(k)) {
            return Err(PowerError::invalid(
                extra.as_str(),
                format!("not a coefficient of '{}'; expected one of {:?}", formula, design.names),
            ));
        }
        let fixef: IndexMap<String, f64> = design
            .names
            .iter()
            .map(|name| (name.clone(), self.fixef[name]))
            .collect();

        let mut random = Vec::with_capacity(formula.random.len());
        for term in &formula.random {
            if random.iter().any(|c: &RandomComponent| c.group == term.group) {
                return Err(PowerError::invalid(
                    term.group.as_str(),
                    "only one random term per grouping factor can be parameterised",
                ));
            }
            let covariance = self.var_corr.get(&term.group).ok_or_else(|| {
                PowerError::invalid(term.group.as_str(), "no variance supplied for random term")
            })?;
            let components = term.components();
            if covariance.nrows() != components.len() || covariance.ncols() != components.len() {
                return Err(PowerError::ShapeMismatch {
                    expected: components.len(),
                    got: covariance.nrows(),
                    context: format!("covariance for random term on '{}'", term.group),
                });
            }
            covariance_factor(covariance)?;
            random.push(RandomComponent {
                group: term.group.clone(),
                terms: components,
                covariance: covariance.clone(),
            });
        }
        if let Some(extra) = self
            .var_corr
            .keys()
            .find(|g| !formula.random.iter().any(|t| &t.group == *g))
        {
            return Err(PowerError::invalid(
                extra.as_str(),
                "no random term in the formula uses this grouping factor",
            ));
        }

        let sigma = match family {
            Family::Gaussian => match self.sigma {
                Some(s) if s.is_finite() && s >= 0.0 => Some(s),
                Some(_) => return Err(PowerError::invalid("sigma", "must be finite and non-negative")),
                None => return Err(PowerError::invalid("sigma", "Gaussian models need a residual scale")),
            },
            Family::Binomial => None,
        };

        let mut model = FittedModel {
            formula,
            family,
            fixef,
            random,
            sigma,
            data: Arc::new(df.clone()),
            stats: None,
        };
        let data = model.simulate(rng)?;
        model.data = Arc::new(data);
        log::debug!("built {} model '{}' on {} rows", model.family, model.formula, df.nrows());
        Ok(model)
    }
}

impl<'a> Default for ModelBuilder<'a> {
    fn default() -> Self {
        Self::new()
    }
}
