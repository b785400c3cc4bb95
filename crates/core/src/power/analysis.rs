use crate::data::DataFrame;
use crate::error::{PowerError, Result};
use crate::fit::TestMethod;
use crate::model::{Family, Formula};

/// Which model is fitted to each simulated dataset, and which of its fixed
/// terms is tested against the nested model without it.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    formula: Formula,
    reduced: Formula,
    term: String,
    family: Family,
    method: TestMethod,
}

impl Analysis {
    /// Gaussian analysis of `term` in `formula` by likelihood-ratio test.
    ///
    /// # Errors
    /// [`PowerError::Formula`] for an unparsable formula and
    /// [`PowerError::InvalidConfiguration`] if `term` is not one of its fixed terms.
    pub fn new(formula: &str, term: &str) -> Result<Self> {
        let formula = Formula::parse(formula)?;
        let reduced = formula.without_term(term)?;
        Ok(Self {
            formula,
            reduced,
            term: term.to_string(),
            family: Family::Gaussian,
            method: TestMethod::LikelihoodRatio,
        })
    }

    pub fn family(mut self, family: Family) -> Self {
        self.family = family;
        self
    }

    pub fn method(mut self, method: TestMethod) -> Self {
        self.method = method;
        self
    }

    pub fn full_formula(&self) -> &Formula {
        &self.formula
    }

    pub fn reduced_formula(&self) -> &Formula {
        &self.reduced
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn family_kind(&self) -> Family {
        self.family
    }

    pub fn test_method(&self) -> TestMethod {
        self.method
    }

    /// Reject combinations the test cannot handle.
    pub fn validate(&self) -> Result<()> {
        if self.method == TestMethod::FTest
            && (self.family != Family::Gaussian || self.formula.is_mixed())
        {
            return Err(PowerError::invalid(
                "method",
                "the F test needs a Gaussian model without random effects",
            ));
        }
        Ok(())
    }

    /// Check that a generated dataset has every column the analysis uses.
    pub fn check_columns(&self, data: &DataFrame) -> Result<()> {
        data.get_column(&self.formula.response)?;
        for column in self.formula.predictors() {
            data.get_column(&column)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduced_model_drops_term() {
        let a = Analysis::new("y ~ x + condition + (1 | subject)", "condition").unwrap();
        assert_eq!(a.reduced_formula().to_string(), "y ~ x + (1 | subject)");
        assert_eq!(a.term(), "condition");
        assert!(Analysis::new("y ~ x", "z").is_err());
    }

    #[test]
    fn test_f_test_needs_fixed_gaussian() {
        let a = Analysis::new("y ~ x + (1 | s)", "x").unwrap().method(TestMethod::FTest);
        assert!(a.validate().is_err());
        let b = Analysis::new("y ~ x", "x")
            .unwrap()
            .family(Family::Binomial)
            .method(TestMethod::FTest);
        assert!(b.validate().is_err());
        assert!(Analysis::new("y ~ x", "x").unwrap().method(TestMethod::FTest).validate().is_ok());
    }

    #[test]
    fn test_check_columns() {
        let mut df = DataFrame::new();
        df.add_float_column("x", vec![1.0]).unwrap();
        let a = Analysis::new("y ~ x", "x").unwrap();
        assert!(matches!(a.check_columns(&df), Err(PowerError::MissingColumn(c)) if c == "y"));
    }
}
