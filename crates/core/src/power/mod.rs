//! The simulate-fit-test loop: single power estimates and sweeps.

mod analysis;
mod generator;
mod simulate;
mod sweep;
mod trial;

pub use analysis::Analysis;
pub use generator::{DataGenerator, ModelSimulation};
pub use simulate::{clopper_pearson, power_sim, PowerConfig, PowerEstimate};
pub use sweep::{
    run_sweep, CancelToken, Checkpoint, ModelSweep, Sweep, SweepCell, SweepConfig, SweepOutcome,
    SweepScenario, SweepStatus, TwoGroupSweep,
};
pub use trial::{run_trial, CellKey, TrialFailure, TrialResult, TrialStage};
