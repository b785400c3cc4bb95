mod builder;
mod design;
pub mod extend;
mod family;
mod formula;
mod state;

pub use builder::ModelBuilder;
pub use design::{build_fixed_design, build_random_design, build_random_designs, FixedDesign, RandomDesign};
pub use extend::{extend_between, extend_within, n_units, units_per_level, ExtensionDirective};
pub use family::{logistic, Family};
pub use formula::{FixedTerm, Formula, RandomTerm, INTERCEPT};
pub use state::{FitStatistics, FittedModel, RandomComponent};
