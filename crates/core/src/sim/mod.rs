//! Data-generating processes: the random-source helpers, the two-group
//! count simulator and the factorial design generator.

mod design;
pub mod rng;
mod two_group;

pub use design::{simulate_design, Cell, CorrelationSpec, DesignSpec, SdSpec, SimulatedDesign};
pub use rng::{substream_seed, trial_rng};
pub use two_group::{simulate_two_groups, GroupSpec, TwoGroupSpec, GROUP_COLUMN, OUTCOME_COLUMN};
