/// Boolean selections (`"0.130 < M < 0.140 and isSignal"`)
pub mod cut;
/// Arithmetic expressions over variables, as used by `formula(...)`
pub mod formula;

pub use cut::{Comparison, Cut};
pub use formula::Formula;
