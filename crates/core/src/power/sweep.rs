//! Power over a grid of sample sizes and effect sizes.
//!
//! Every (sample size, effect size) cell is derived from the scenario's
//! baseline and validated before the first trial runs. Cells then run one
//! after another, each with its trials spread over the thread pool. A
//! cancelled sweep stops between cells and keeps what it has.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{PowerError, Result};
use crate::fit::{ModelFitter, TestMethod};
use crate::model::{ExtensionDirective, FittedModel};
use crate::report::{aggregate, PowerTable};
use crate::sim::{TwoGroupSpec, GROUP_COLUMN, OUTCOME_COLUMN};

use super::analysis::Analysis;
use super::generator::{DataGenerator, ModelSimulation};
use super::simulate::{prepare, run_cell, with_pool, PowerConfig};
use super::trial::{CellKey, TrialResult};

/// One grid cell: what to simulate and how to analyse it.
#[derive(Debug, Clone)]
pub struct SweepCell<G> {
    pub generator: G,
    pub analysis: Analysis,
}

/// Maps a (sample size, effect size) pair onto a concrete simulation.
pub trait SweepScenario: Sync {
    type Generator: DataGenerator;

    fn cell(&self, sample_size: usize, effect_size: f64) -> Result<SweepCell<Self::Generator>>;
}

/// Sweep a parameterised model: extend its data to each sample size, set
/// the swept coefficient to each effect size and resimulate.
///
/// Every cell starts from the same baseline, so cells never see each
/// other's extensions.
#[derive(Debug, Clone)]
pub struct ModelSweep {
    baseline: FittedModel,
    coefficient: String,
    analysis: Analysis,
    extension: Option<ExtensionDirective>,
}

impl ModelSweep {
    pub fn new(baseline: FittedModel, coefficient: &str, analysis: Analysis) -> Self {
        Self {
            baseline,
            coefficient: coefficient.to_string(),
            analysis,
            extension: None,
        }
    }

    /// Grow the data to each swept sample size along `directive`. Without
    /// an extension the sample size only labels the cell.
    pub fn extend_along(mut self, directive: ExtensionDirective) -> Self {
        self.extension = Some(directive);
        self
    }

    pub fn baseline(&self) -> &FittedModel {
        &self.baseline
    }
}

impl SweepScenario for ModelSweep {
    type Generator = ModelSimulation;

    fn cell(&self, sample_size: usize, effect_size: f64) -> Result<SweepCell<ModelSimulation>> {
        let model = match &self.extension {
            Some(directive) => self.baseline.extend(&directive.with_target(sample_size))?,
            None => self.baseline.clone(),
        };
        let model = model.with_fixef(&self.coefficient, effect_size)?;
        Ok(SweepCell {
            generator: ModelSimulation::new(model),
            analysis: self.analysis.clone(),
        })
    }
}

/// Sweep two balanced groups: sample size is the per-group `n` and effect
/// size the standardised mean difference (treatment mean is
/// `control_mean + effect * sd`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoGroupSweep {
    pub control_mean: f64,
    pub sd: f64,
    #[serde(default = "default_two_group_method")]
    pub method: TestMethod,
}

fn default_two_group_method() -> TestMethod {
    TestMethod::FTest
}

impl TwoGroupSweep {
    pub fn new(control_mean: f64, sd: f64) -> Self {
        Self {
            control_mean,
            sd,
            method: default_two_group_method(),
        }
    }
}

impl SweepScenario for TwoGroupSweep {
    type Generator = TwoGroupSpec;

    fn cell(&self, sample_size: usize, effect_size: f64) -> Result<SweepCell<TwoGroupSpec>> {
        let spec = TwoGroupSpec::balanced(
            sample_size,
            self.control_mean,
            self.control_mean + effect_size * self.sd,
            self.sd,
        );
        let formula = format!("{} ~ {}", OUTCOME_COLUMN, GROUP_COLUMN);
        let analysis = Analysis::new(&formula, GROUP_COLUMN)?.method(self.method);
        Ok(SweepCell {
            generator: spec,
            analysis,
        })
    }
}

/// Grid and run settings of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub sample_sizes: Vec<usize>,
    pub effect_sizes: Vec<f64>,
    #[serde(flatten)]
    pub power: PowerConfig,
}

impl SweepConfig {
    pub fn new(sample_sizes: Vec<usize>, effect_sizes: Vec<f64>) -> Self {
        Self {
            sample_sizes,
            effect_sizes,
            power: PowerConfig::default(),
        }
    }

    pub fn n_sim(mut self, n_sim: usize) -> Self {
        self.power.n_sim = n_sim;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.power.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.power.validate()?;
        if self.sample_sizes.is_empty() {
            return Err(PowerError::invalid("sample_sizes", "need at least one sample size"));
        }
        if self.effect_sizes.is_empty() {
            return Err(PowerError::invalid("effect_sizes", "need at least one effect size"));
        }
        if self.sample_sizes.contains(&0) {
            return Err(PowerError::invalid("sample_sizes", "sample sizes must be positive"));
        }
        if self.effect_sizes.iter().any(|e| !e.is_finite()) {
            return Err(PowerError::invalid("effect_sizes", "effect sizes must be finite"));
        }
        for (i, s) in self.sample_sizes.iter().enumerate() {
            if self.sample_sizes[..i].contains(s) {
                return Err(PowerError::invalid("sample_sizes", format!("{} is listed twice", s)));
            }
        }
        for (i, e) in self.effect_sizes.iter().enumerate() {
            if self.effect_sizes[..i].iter().any(|x| x.to_bits() == e.to_bits()) {
                return Err(PowerError::invalid("effect_sizes", format!("{} is listed twice", e)));
            }
        }
        Ok(())
    }

    /// Grid cells in run order: sample sizes outer, effect sizes inner.
    pub fn cells(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.sample_sizes
            .iter()
            .flat_map(move |&n| self.effect_sizes.iter().map(move |&e| (n, e)))
    }
}

/// Shared flag for stopping a running sweep from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receives the partial table after every completed cell.
///
/// Called on the sweep's thread; implementations should hand slow work off
/// and must not fail the sweep.
pub trait Checkpoint: Send + Sync {
    fn save(&self, table: &PowerTable);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SweepStatus {
    Completed,
    /// Cancelled; lists the (sample size, effect size) cells that finished.
    Interrupted { completed: Vec<(usize, f64)> },
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepOutcome {
    pub table: PowerTable,
    pub results: Vec<TrialResult>,
    pub status: SweepStatus,
}

impl SweepOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == SweepStatus::Completed
    }
}

/// Sweep runner.
///
/// ```no_run
/// use mixedpower_core::fit::ReferenceFitter;
/// use mixedpower_core::power::{Sweep, SweepConfig, TwoGroupSweep};
///
/// let scenario = TwoGroupSweep::new(25.0, 10.0);
/// let config = SweepConfig::new(vec![20, 40, 60], vec![0.2, 0.5]).n_sim(200);
/// let outcome = Sweep::new(&scenario, &ReferenceFitter::new(), config).run().unwrap();
/// println!("{}", outcome.table.summary());
/// ```
pub struct Sweep<'a, S, F: ?Sized> {
    scenario: &'a S,
    fitter: &'a F,
    config: SweepConfig,
    cancel: CancelToken,
    checkpoint: Option<&'a dyn Checkpoint>,
}

impl<'a, S, F> Sweep<'a, S, F>
where
    S: SweepScenario,
    F: ModelFitter + ?Sized,
{
    pub fn new(scenario: &'a S, fitter: &'a F, config: SweepConfig) -> Self {
        Self {
            scenario,
            fitter,
            config,
            cancel: CancelToken::new(),
            checkpoint: None,
        }
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn checkpoint(mut self, checkpoint: &'a dyn Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Run every cell.
    ///
    /// # Errors
    /// Configuration errors of any cell, raised before trials start.
    /// Trial-level failures are counted in the table instead.
    pub fn run(&self) -> Result<SweepOutcome> {
        self.config.validate()?;
        let cells = self.prepare_cells()?;
        with_pool(self.config.power.threads, || self.run_cells(&cells))
    }

    fn prepare_cells(&self) -> Result<Vec<(CellKey, SweepCell<S::Generator>)>> {
        let seed = self.config.power.seed;
        self.config
            .cells()
            .map(|(sample_size, effect_size)| {
                let cell = self.scenario.cell(sample_size, effect_size)?;
                prepare(&cell.generator, &cell.analysis, seed)?;
                let key = CellKey {
                    sample_size,
                    total_sample_size: cell.generator.total_size(),
                    effect_size,
                };
                Ok((key, cell))
            })
            .collect()
    }

    fn run_cells(&self, cells: &[(CellKey, SweepCell<S::Generator>)]) -> SweepOutcome {
        let PowerConfig { n_sim, alpha, seed, .. } = self.config.power;
        let mut results: Vec<TrialResult> = Vec::with_capacity(cells.len() * n_sim);
        let mut completed = Vec::with_capacity(cells.len());
        let mut interrupted = false;

        for (key, cell) in cells {
            if self.cancel.is_cancelled() {
                log::warn!("sweep cancelled after {} of {} cells", completed.len(), cells.len());
                interrupted = true;
                break;
            }
            let trials = run_cell(&cell.generator, &cell.analysis, self.fitter, *key, n_sim, seed);
            let n_failed = trials.iter().filter(|t| !t.is_valid()).count();
            let n_valid = trials.len() - n_failed;
            let hits = trials.iter().filter(|t| t.rejects(alpha)).count();
            if n_valid > 0 {
                log::info!(
                    "n = {}, effect = {}: power {:.3} ({} trials)",
                    key.sample_size,
                    key.effect_size,
                    hits as f64 / n_valid as f64,
                    trials.len()
                );
            }
            if n_failed > 0 {
                log::warn!(
                    "n = {}, effect = {}: {} of {} trials failed",
                    key.sample_size,
                    key.effect_size,
                    n_failed,
                    trials.len()
                );
            }
            results.extend(trials);
            completed.push((key.sample_size, key.effect_size));
            if let Some(checkpoint) = self.checkpoint {
                checkpoint.save(&aggregate(&results, alpha));
            }
        }

        let status = if interrupted {
            SweepStatus::Interrupted { completed }
        } else {
            SweepStatus::Completed
        };
        SweepOutcome {
            table: aggregate(&results, alpha),
            results,
            status,
        }
    }
}

/// Run a sweep without cancellation or checkpoints.
pub fn run_sweep<S, F>(scenario: &S, fitter: &F, config: SweepConfig) -> Result<SweepOutcome>
where
    S: SweepScenario,
    F: ModelFitter + ?Sized,
{
    Sweep::new(scenario, fitter, config).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::ReferenceFitter;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<usize>>);

    impl Checkpoint for Recorder {
        fn save(&self, table: &PowerTable) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(table.len());
            }
        }
    }

    struct CancelAfterFirst(CancelToken);

    impl Checkpoint for CancelAfterFirst {
        fn save(&self, _table: &PowerTable) {
            self.0.cancel();
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(SweepConfig::new(vec![], vec![0.2]).validate().is_err());
        assert!(SweepConfig::new(vec![10, 10], vec![0.2]).validate().is_err());
        assert!(SweepConfig::new(vec![10], vec![0.2, f64::NAN]).validate().is_err());
        assert!(SweepConfig::new(vec![10, 20], vec![0.2, 0.4]).validate().is_ok());
        let cells: Vec<_> = SweepConfig::new(vec![10, 20], vec![0.1, 0.2]).cells().collect();
        assert_eq!(cells, vec![(10, 0.1), (10, 0.2), (20, 0.1), (20, 0.2)]);
    }

    #[test]
    fn test_config_from_json() {
        let config: SweepConfig =
            serde_json::from_str(r#"{"sample_sizes": [20, 40], "effect_sizes": [0.5], "n_sim": 50}"#)
                .unwrap();
        assert_eq!(config.power.n_sim, 50);
        assert_eq!(config.power.alpha, 0.05);
        assert_eq!(config.power.seed, 42);
    }

    #[test]
    fn test_checkpoint_sees_growing_table() {
        let scenario = TwoGroupSweep::new(25.0, 10.0);
        let config = SweepConfig::new(vec![10, 20], vec![0.0, 0.5]).n_sim(3);
        let recorder = Recorder(Mutex::new(Vec::new()));
        let fitter = ReferenceFitter::new();
        let outcome = Sweep::new(&scenario, &fitter, config).checkpoint(&recorder).run().unwrap();
        assert!(outcome.is_complete());
        assert_eq!(*recorder.0.lock().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(outcome.results.len(), 12);
    }

    #[test]
    fn test_cancel_stops_between_cells() {
        let scenario = TwoGroupSweep::new(25.0, 10.0);
        let config = SweepConfig::new(vec![10, 20], vec![0.0, 0.5]).n_sim(3);
        let token = CancelToken::new();
        let stopper = CancelAfterFirst(token.clone());
        let fitter = ReferenceFitter::new();
        let outcome = Sweep::new(&scenario, &fitter, config)
            .cancel_token(token)
            .checkpoint(&stopper)
            .run()
            .unwrap();
        assert_eq!(outcome.status, SweepStatus::Interrupted { completed: vec![(10, 0.0)] });
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(outcome.results.len(), 3);
    }

    #[test]
    fn test_invalid_cell_fails_before_trials() {
        let scenario = TwoGroupSweep::new(25.0, -1.0);
        let config = SweepConfig::new(vec![10], vec![0.5]).n_sim(3);
        let err = run_sweep(&scenario, &ReferenceFitter::new(), config).unwrap_err();
        assert!(matches!(err, PowerError::InvalidConfiguration { .. }));
    }
}
