//! Numerical optimizers.
//!
//! Two backends sit behind traits so the rest of the crate never depends on
//! a concrete solver:
//!
//! - [`BoundedLeastSquares`]: box-constrained nonlinear least squares,
//!   used by the continuous cluster labeller. [`ProjectedLevenbergMarquardt`]
//!   is the built-in implementation.
//! - [`BoxOptimizer`]: derivative-free minimization over a box, used by the
//!   trainer to search distance weights. [`CmaEs`] is the built-in
//!   implementation.
//!
//! [`TraceWriter`] records [`Progress`] rows to a text file.

mod cmaes;
mod least_squares;
mod trace;

pub use cmaes::{BoxOptimizer, BoxOutcome, BoxTransform, CmaEs, Progress, StopReason};
pub use least_squares::{
    BoundedLeastSquares, ProjectedLevenbergMarquardt, ResidualFunction, Solution, Termination,
};
pub use trace::TraceWriter;
