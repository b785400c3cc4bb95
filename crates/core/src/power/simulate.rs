use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, ContinuousCDF};

use crate::error::{PowerError, Result};
use crate::fit::ModelFitter;

use super::analysis::Analysis;
use super::generator::DataGenerator;
use super::trial::{run_trial, CellKey, TrialResult};

/// Seed offset of the dry-run draw used to check columns before any trial.
const VALIDATION_STREAM: usize = usize::MAX;

/// Trial count, significance level, seed and parallelism of a power run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Trials per cell (default: 1000).
    pub n_sim: usize,
    /// Significance level (default: 0.05).
    pub alpha: f64,
    /// Base seed of every trial sub-stream (default: 42).
    pub seed: u64,
    /// Worker threads; 0 uses the global rayon pool.
    pub threads: usize,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            n_sim: 1000,
            alpha: 0.05,
            seed: 42,
            threads: 0,
        }
    }
}

impl PowerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_sim == 0 {
            return Err(PowerError::invalid("n_sim", "need at least one trial"));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(PowerError::invalid("alpha", "must lie strictly between 0 and 1"));
        }
        Ok(())
    }
}

/// Power of one configuration.
#[derive(Debug, Clone, Serialize)]
pub struct PowerEstimate {
    /// Share of valid trials with p < alpha; `None` if every trial failed.
    pub power: Option<f64>,
    pub successes: usize,
    pub n_valid: usize,
    pub n_sim: usize,
    pub n_failed: usize,
    pub alpha: f64,
    /// Exact 95% Clopper-Pearson interval for `power`.
    pub interval: Option<(f64, f64)>,
    pub results: Vec<TrialResult>,
}

impl PowerEstimate {
    pub fn from_results(results: Vec<TrialResult>, alpha: f64) -> Self {
        let n_valid = results.iter().filter(|r| r.is_valid()).count();
        let successes = results.iter().filter(|r| r.rejects(alpha)).count();
        let n_sim = results.len();
        let power = (n_valid > 0).then(|| successes as f64 / n_valid as f64);
        let interval = (n_valid > 0).then(|| clopper_pearson(successes, n_valid, 0.95));
        Self {
            power,
            successes,
            n_valid,
            n_sim,
            n_failed: n_sim - n_valid,
            alpha,
            interval,
            results,
        }
    }

    /// Power at another significance level, from the stored p-values.
    pub fn power_at(&self, alpha: f64) -> Option<f64> {
        let hits = self.results.iter().filter(|r| r.rejects(alpha)).count();
        (self.n_valid > 0).then(|| hits as f64 / self.n_valid as f64)
    }

    /// p-values in trial order; failed trials are `None`.
    pub fn p_values(&self) -> Vec<Option<f64>> {
        self.results.iter().map(|r| r.p_value).collect()
    }
}

/// Exact binomial confidence interval for `k` successes in `n` trials.
pub fn clopper_pearson(k: usize, n: usize, level: f64) -> (f64, f64) {
    let tail = (1.0 - level) / 2.0;
    let (k, n) = (k as f64, n as f64);
    let lower = if k == 0.0 {
        0.0
    } else {
        Beta::new(k, n - k + 1.0).map(|d| d.inverse_cdf(tail)).unwrap_or(0.0)
    };
    let upper = if k == n {
        1.0
    } else {
        Beta::new(k + 1.0, n - k).map(|d| d.inverse_cdf(1.0 - tail)).unwrap_or(1.0)
    };
    (lower, upper)
}

/// Estimate the power of `analysis` on data drawn from `generator`.
///
/// Trials run in parallel; trial `i` always uses the same sub-stream of
/// `config.seed`, so results do not depend on the thread count.
///
/// # Errors
/// Configuration problems only. Failed fits are counted in `n_failed`.
pub fn power_sim<G, F>(
    generator: &G,
    analysis: &Analysis,
    fitter: &F,
    config: &PowerConfig,
) -> Result<PowerEstimate>
where
    G: DataGenerator + ?Sized,
    F: ModelFitter + ?Sized,
{
    config.validate()?;
    let total = generator.total_size();
    let cell = CellKey {
        sample_size: total,
        total_sample_size: total,
        effect_size: 0.0,
    };
    prepare(generator, analysis, config.seed)?;
    let results = with_pool(config.threads, || {
        run_cell(generator, analysis, fitter, cell, config.n_sim, config.seed)
    })?;
    let estimate = PowerEstimate::from_results(results, config.alpha);
    if estimate.n_failed > 0 {
        log::warn!("{} of {} trials failed", estimate.n_failed, estimate.n_sim);
    }
    Ok(estimate)
}

/// Validate a cell before any of its trials run: the generator, the test
/// method and the columns of one sample dataset.
pub(crate) fn prepare<G>(generator: &G, analysis: &Analysis, seed: u64) -> Result<()>
where
    G: DataGenerator + ?Sized,
{
    generator.validate()?;
    analysis.validate()?;
    let mut rng = crate::sim::trial_rng(seed, generator.total_size(), 0.0, VALIDATION_STREAM);
    let sample = generator.generate(&mut rng)?;
    analysis.check_columns(&sample)
}

/// All trials of one cell, in trial order.
pub(crate) fn run_cell<G, F>(
    generator: &G,
    analysis: &Analysis,
    fitter: &F,
    cell: CellKey,
    n_sim: usize,
    seed: u64,
) -> Vec<TrialResult>
where
    G: DataGenerator + ?Sized,
    F: ModelFitter + ?Sized,
{
    (0..n_sim)
        .into_par_iter()
        .map(|trial| run_trial(generator, analysis, fitter, cell, trial, seed))
        .collect()
}

/// Run `op` on a dedicated pool of `threads` workers, or on the global pool
/// when `threads` is 0.
pub(crate) fn with_pool<T, OP>(threads: usize, op: OP) -> Result<T>
where
    T: Send,
    OP: FnOnce() -> T + Send,
{
    if threads == 0 {
        return Ok(op());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| PowerError::invalid("threads", format!("failed to create thread pool: {e}")))?;
    Ok(pool.install(op))
}
