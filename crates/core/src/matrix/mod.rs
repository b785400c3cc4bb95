pub mod dense;
pub mod sparse;

pub use sparse::TripletBuilder;
