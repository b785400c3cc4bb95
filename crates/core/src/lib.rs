//! Simulation-based power analysis for linear and mixed-effects models.
//!
//! Datasets are drawn from a parameterised model (or from a two-group or
//! factorial design), refitted with and without the term of interest, and
//! the share of significant tests is reported per sample size and effect
//! size.

pub mod data;
pub mod error;
pub mod fit;
pub mod matrix;
pub mod model;
pub mod power;
pub mod report;
pub mod sim;
pub mod types;

pub use error::{PowerError, Result};
