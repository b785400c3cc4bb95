mod dataframe;
mod factor;
mod io;
pub mod reshape;

pub use dataframe::{Column, DataFrame};
pub use factor::FactorColumn;
pub use reshape::{long_to_wide, wide_to_long, WithinLayout};
