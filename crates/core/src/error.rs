use thiserror::Error;

#[derive(Error, Debug)]
pub enum PowerError {
    #[error("Invalid configuration for '{parameter}': {reason}")]
    InvalidConfiguration { parameter: String, reason: String },

    #[error("Shape mismatch: expected {expected}, got {got} in {context}")]
    ShapeMismatch {
        expected: usize,
        got: usize,
        context: String,
    },

    #[error("Factor '{0}' not found in dataset")]
    UnknownFactor(String),

    #[error("Column '{0}' not found in DataFrame")]
    MissingColumn(String),

    #[error("Unsupported model family: {0}")]
    UnsupportedFamily(String),

    #[error("Model fit did not converge after {iterations} iterations (change = {change:.2e})")]
    FitDidNotConverge { iterations: usize, change: f64 },

    #[error("Matrix is not positive definite: {0}")]
    NotPositiveDefinite(String),

    #[error("Formula error: {0}")]
    Formula(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl PowerError {
    /// Shorthand for [`PowerError::InvalidConfiguration`].
    pub fn invalid(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        PowerError::InvalidConfiguration {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a recoverable per-trial failure rather than a
    /// configuration problem.
    pub fn is_fit_failure(&self) -> bool {
        matches!(
            self,
            PowerError::FitDidNotConverge { .. } | PowerError::NotPositiveDefinite(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PowerError>;
