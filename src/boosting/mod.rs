//! Gradient-boosted decision trees
//!
//! A self-contained second-order boosting engine: per-round gradient and
//! hessian statistics, greedy exact split search, shrinkage, and seeded
//! row/column subsampling. Supports squared-error and Poisson regression and
//! softmax multiclass classification.

mod booster;
mod params;
mod tree;

pub use booster::Booster;
pub use params::{BoostParams, Objective};
