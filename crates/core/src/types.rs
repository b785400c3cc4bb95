/// Sparse design matrix in CSC layout: the fixed-effect X and each random
/// term's Z block.
pub type SparseMat = sprs::CsMat<f64>;
