//! Cluster labelling from bag-level supervision.
//!
//! Given the row-normalized bag × cluster matrix `C` and the known bag
//! labels, find one label per cluster so that the predicted bag labels `C·x`
//! match the known ones.
//!
//! | Labeller | Labels | Search |
//! |----------|--------|--------|
//! | [`ContinuousLabeller`] | `[0, 1]` | box-constrained least squares |
//! | [`ExhaustiveLabeller`] | `{0, 1}` | all `2^k` labellings |
//! | [`GreedyLabeller`] | `{0, 1}` | forward selection, `≤ k` rounds |
//!
//! The binary labellers are generic over a [`CostFunction`]; pair them with
//! [`BagProportionError`] for proportions, or with [`IntervalAbsoluteError`]
//! / [`IntervalSquaredError`] for interval labels.

mod continuous;
mod cost;
mod exhaustive;
mod greedy;
mod traits;

pub use continuous::ContinuousLabeller;
pub use cost::{BagProportionError, IntervalAbsoluteError, IntervalSquaredError};
pub use exhaustive::{ExhaustiveLabeller, MAX_EXHAUSTIVE_CLUSTERS};
pub use greedy::GreedyLabeller;
pub use traits::{ClusterLabeller, CostFunction, Labelling};
