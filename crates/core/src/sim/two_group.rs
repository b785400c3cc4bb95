use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::{Column, DataFrame, FactorColumn};
use crate::error::{PowerError, Result};

use super::rng::normal;

/// Column holding the group label.
pub const GROUP_COLUMN: &str = "group";
/// Column holding the outcome.
pub const OUTCOME_COLUMN: &str = "y";

/// Size and outcome distribution of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub label: String,
    pub n: usize,
    pub mean: f64,
    pub sd: f64,
}

impl GroupSpec {
    pub fn new(label: &str, n: usize, mean: f64, sd: f64) -> Self {
        Self {
            label: label.to_string(),
            n,
            mean,
            sd,
        }
    }
}

/// Two independent groups whose outcomes are non-negative counts:
/// `round(|N(mean, sd)|)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoGroupSpec {
    pub first: GroupSpec,
    pub second: GroupSpec,
}

impl TwoGroupSpec {
    pub fn new(first: GroupSpec, second: GroupSpec) -> Self {
        Self { first, second }
    }

    /// Equal-sized `control` and `treatment` groups with a common SD.
    pub fn balanced(n: usize, control_mean: f64, treatment_mean: f64, sd: f64) -> Self {
        Self::new(
            GroupSpec::new("control", n, control_mean, sd),
            GroupSpec::new("treatment", n, treatment_mean, sd),
        )
    }

    pub fn groups(&self) -> [&GroupSpec; 2] {
        [&self.first, &self.second]
    }

    pub fn total_size(&self) -> usize {
        self.first.n + self.second.n
    }

    /// Check sizes, moments and labels.
    ///
    /// # Errors
    /// [`PowerError::InvalidConfiguration`] naming the offending parameter,
    /// e.g. `treatment.n` or `control.sd`.
    pub fn validate(&self) -> Result<()> {
        for g in self.groups() {
            if g.n == 0 {
                return Err(PowerError::invalid(format!("{}.n", g.label), "group size must be positive"));
            }
            if !g.mean.is_finite() {
                return Err(PowerError::invalid(format!("{}.mean", g.label), "mean must be finite"));
            }
            if !(g.sd.is_finite() && g.sd >= 0.0) {
                return Err(PowerError::invalid(
                    format!("{}.sd", g.label),
                    "standard deviation must be finite and non-negative",
                ));
            }
        }
        if self.first.label == self.second.label {
            return Err(PowerError::invalid("label", "the two groups need distinct labels"));
        }
        Ok(())
    }
}

/// Draw one dataset: `group` (factor, first group's label first) and `y`.
pub fn simulate_two_groups<R: Rng + ?Sized>(spec: &TwoGroupSpec, rng: &mut R) -> Result<DataFrame> {
    spec.validate()?;
    let total = spec.total_size();
    let mut labels = Vec::with_capacity(total);
    let mut y = Vec::with_capacity(total);
    for g in spec.groups() {
        for _ in 0..g.n {
            labels.push(g.label.as_str());
            y.push(normal(rng, g.mean, g.sd).abs().round());
        }
    }
    let mut df = DataFrame::new();
    df.add_column(GROUP_COLUMN, Column::Factor(FactorColumn::from_labels(labels)))?;
    df.add_float_column(OUTCOME_COLUMN, y)?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rows_and_counts() {
        let spec = TwoGroupSpec::balanced(10, 25.0, 20.0, 10.0);
        let mut rng = StdRng::seed_from_u64(42);
        let df = simulate_two_groups(&spec, &mut rng).unwrap();
        assert_eq!(df.nrows(), 20);
        let y = df.get_float("y").unwrap();
        assert!(y.iter().all(|v| *v >= 0.0 && v.fract() == 0.0));
        let group = df.get_factor("group").unwrap();
        assert_eq!(group.levels(), vec!["control", "treatment"]);
        assert_eq!(group.label(9), "control");
        assert_eq!(group.label(10), "treatment");
    }

    #[test]
    fn test_unequal_groups() {
        let spec = TwoGroupSpec::new(GroupSpec::new("a", 3, 1.0, 1.0), GroupSpec::new("b", 7, 1.0, 1.0));
        let df = simulate_two_groups(&spec, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(df.nrows(), 10);
    }

    #[test]
    fn test_invalid_configuration_names_parameter() {
        let mut spec = TwoGroupSpec::balanced(10, 25.0, 20.0, 10.0);
        spec.second.n = 0;
        assert!(matches!(
            simulate_two_groups(&spec, &mut StdRng::seed_from_u64(1)),
            Err(PowerError::InvalidConfiguration { parameter, .. }) if parameter == "treatment.n"
        ));
        let mut spec = TwoGroupSpec::balanced(10, 25.0, 20.0, 10.0);
        spec.first.sd = -1.0;
        assert!(matches!(
            spec.validate(),
            Err(PowerError::InvalidConfiguration { parameter, .. }) if parameter == "control.sd"
        ));
    }

    #[test]
    fn test_large_sample_mean() {
        let spec = TwoGroupSpec::balanced(5000, 25.0, 20.0, 2.0);
        let df = simulate_two_groups(&spec, &mut StdRng::seed_from_u64(9)).unwrap();
        let y = df.get_float("y").unwrap();
        let m1 = y[..5000].iter().sum::<f64>() / 5000.0;
        assert!((m1 - 25.0).abs() < 0.1);
    }
}
