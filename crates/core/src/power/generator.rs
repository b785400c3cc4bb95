use rand::rngs::StdRng;

use crate::data::DataFrame;
use crate::error::Result;
use crate::model::{build_fixed_design, FittedModel};
use crate::sim::{simulate_design, simulate_two_groups, DesignSpec, TwoGroupSpec};

/// Source of the datasets analysed in each trial.
///
/// `generate` is called concurrently from worker threads, each with its own
/// trial sub-stream, so implementations must not hold mutable state.
pub trait DataGenerator: Sync {
    /// Draw one dataset.
    fn generate(&self, rng: &mut StdRng) -> Result<DataFrame>;

    /// Number of rows in every generated dataset.
    fn total_size(&self) -> usize;

    /// Configuration checks run once before any trial.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Resynthesises the outcome of a parameterised model on its own data.
#[derive(Debug, Clone)]
pub struct ModelSimulation {
    model: FittedModel,
}

impl ModelSimulation {
    pub fn new(model: FittedModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &FittedModel {
        &self.model
    }
}

impl DataGenerator for ModelSimulation {
    fn generate(&self, rng: &mut StdRng) -> Result<DataFrame> {
        self.model.simulate(rng)
    }

    fn total_size(&self) -> usize {
        self.model.data.nrows()
    }

    fn validate(&self) -> Result<()> {
        let design = build_fixed_design(&self.model.data, &self.model.formula)?;
        self.model.coefficients_for(&design.names)?;
        Ok(())
    }
}

impl DataGenerator for TwoGroupSpec {
    fn generate(&self, rng: &mut StdRng) -> Result<DataFrame> {
        simulate_two_groups(self, rng)
    }

    fn total_size(&self) -> usize {
        TwoGroupSpec::total_size(self)
    }

    fn validate(&self) -> Result<()> {
        TwoGroupSpec::validate(self)
    }
}

/// Factorial designs are analysed in long form: one row per unit and within cell.
impl DataGenerator for DesignSpec {
    fn generate(&self, rng: &mut StdRng) -> Result<DataFrame> {
        simulate_design(self, rng)?.to_long()
    }

    fn total_size(&self) -> usize {
        self.total_units() * self.within_cells().len()
    }

    fn validate(&self) -> Result<()> {
        DesignSpec::validate(self)
    }
}
