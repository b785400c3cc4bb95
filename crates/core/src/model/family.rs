use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PowerError;

/// Error distribution and link of a (generalised) linear model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Normal errors, identity link.
    Gaussian,
    /// Bernoulli outcomes, logit link.
    Binomial,
}

/// Probabilities are kept this far from 0 and 1 when evaluating logs.
const PROB_EPS: f64 = 1e-12;

impl Family {
    /// Inverse link: linear predictor -> mean.
    pub fn linkinv(&self, eta: f64) -> f64 {
        match self {
            Family::Gaussian => eta,
            Family::Binomial => logistic(eta),
        }
    }

    /// Log-likelihood contribution of one Bernoulli observation. Gaussian
    /// log-likelihoods depend on the scale and are computed by the fitter.
    pub fn bernoulli_loglik(y: f64, mu: f64) -> f64 {
        let mu = mu.clamp(PROB_EPS, 1.0 - PROB_EPS);
        y * mu.ln() + (1.0 - y) * (1.0 - mu).ln()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Family::Gaussian => "gaussian",
            Family::Binomial => "binomial",
        }
    }
}

impl Default for Family {
    fn default() -> Self {
        Family::Gaussian
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Family {
    type Err = PowerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gaussian" | "normal" | "identity" => Ok(Family::Gaussian),
            "binomial" | "bernoulli" | "logit" | "logistic" => Ok(Family::Binomial),
            other => Err(PowerError::UnsupportedFamily(other.to_string())),
        }
    }
}

/// Numerically stable logistic function.
pub fn logistic(eta: f64) -> f64 {
    if eta >= 0.0 {
        1.0 / (1.0 + (-eta).exp())
    } else {
        let e = eta.exp();
        e / (1.0 + e)
    }
}
