use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PowerError, Result};
use crate::fit::ModelFitter;
use crate::sim::trial_rng;

use super::analysis::Analysis;
use super::generator::DataGenerator;

/// Steps of a single trial, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStage {
    Configured,
    DataGenerated,
    FullModelFit,
    ReducedModelFit,
    TestEvaluated,
    Recorded,
}

impl fmt::Display for TrialStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrialStage::Configured => "configured",
            TrialStage::DataGenerated => "data generated",
            TrialStage::FullModelFit => "full model fit",
            TrialStage::ReducedModelFit => "reduced model fit",
            TrialStage::TestEvaluated => "test evaluated",
            TrialStage::Recorded => "recorded",
        };
        f.write_str(name)
    }
}

/// Why a trial produced no p-value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialFailure {
    /// The stage that could not be completed.
    pub stage: TrialStage,
    pub message: String,
    /// True for non-convergence and singular fits; false for anything else.
    pub fit_failure: bool,
}

/// Identifies the sweep cell a trial belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellKey {
    pub sample_size: usize,
    pub total_sample_size: usize,
    pub effect_size: f64,
}

/// Outcome of one simulate-fit-test cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub sample_size: usize,
    pub total_sample_size: usize,
    pub effect_size: f64,
    pub trial: usize,
    /// `None` when the trial failed.
    pub p_value: Option<f64>,
    pub failure: Option<TrialFailure>,
}

impl TrialResult {
    pub fn is_valid(&self) -> bool {
        self.p_value.is_some()
    }

    /// Whether the trial rejected the null at level `alpha`.
    pub fn rejects(&self, alpha: f64) -> bool {
        matches!(self.p_value, Some(p) if p < alpha)
    }
}

/// Run trial `trial` of a cell on its own random sub-stream.
///
/// Never fails: errors at any stage are recorded in the result with the
/// stage they interrupted, and the p-value is left missing.
pub fn run_trial<G, F>(
    generator: &G,
    analysis: &Analysis,
    fitter: &F,
    cell: CellKey,
    trial: usize,
    seed: u64,
) -> TrialResult
where
    G: DataGenerator + ?Sized,
    F: ModelFitter + ?Sized,
{
    let outcome = evaluate(generator, analysis, fitter, cell, trial, seed);
    let (p_value, failure) = match outcome {
        Ok(p) => (Some(p), None),
        Err((stage, err)) => {
            log::debug!(
                "trial {} (n = {}, effect = {}) failed at {}: {}",
                trial,
                cell.sample_size,
                cell.effect_size,
                stage,
                err
            );
            let failure = TrialFailure {
                stage,
                fit_failure: err.is_fit_failure(),
                message: err.to_string(),
            };
            (None, Some(failure))
        }
    };
    TrialResult {
        sample_size: cell.sample_size,
        total_sample_size: cell.total_sample_size,
        effect_size: cell.effect_size,
        trial,
        p_value,
        failure,
    }
}

fn evaluate<G, F>(
    generator: &G,
    analysis: &Analysis,
    fitter: &F,
    cell: CellKey,
    trial: usize,
    seed: u64,
) -> std::result::Result<f64, (TrialStage, PowerError)>
where
    G: DataGenerator + ?Sized,
    F: ModelFitter + ?Sized,
{
    let at = |stage: TrialStage| move |e: PowerError| (stage, e);

    let mut rng = trial_rng(seed, cell.sample_size, cell.effect_size, trial);
    let data = Arc::new(generator.generate(&mut rng).map_err(at(TrialStage::DataGenerated))?);

    let family = analysis.family_kind();
    let full = fitter
        .fit(analysis.full_formula(), &data, family)
        .map_err(at(TrialStage::FullModelFit))?;
    let reduced = fitter
        .fit(analysis.reduced_formula(), &data, family)
        .map_err(at(TrialStage::ReducedModelFit))?;
    let p = fitter
        .test_term(&full, &reduced, analysis.test_method())
        .and_then(check_p_value)
        .map_err(at(TrialStage::TestEvaluated))?;
    Ok(p)
}

fn check_p_value(p: f64) -> Result<f64> {
    if p.is_finite() && (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(PowerError::Data(format!("test returned p = {}", p)))
    }
}
