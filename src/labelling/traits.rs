//! Labelling traits.

use crate::bags::BagLabels;
use crate::error::{Error, Result};
use ndarray::{Array1, ArrayView1, ArrayView2};

/// Cluster labels together with the bag-level loss they achieve.
#[derive(Debug, Clone, PartialEq)]
pub struct Labelling {
    /// Loss of the labelling; `+∞` when no usable labelling was found.
    pub loss: f64,
    /// One label per cluster.
    pub labels: Array1<f64>,
}

/// Assigns a label to every cluster so that predicted bag labels match the
/// known ones.
pub trait ClusterLabeller {
    /// Label the columns of the bag × cluster matrix `co_occurrence`.
    ///
    /// `initial` has one entry per cluster. Strategies that search from a
    /// starting point use it; the others only check its length.
    fn label(
        &self,
        bag_labels: &BagLabels,
        co_occurrence: ArrayView2<'_, f64>,
        initial: ArrayView1<'_, f64>,
    ) -> Result<Labelling>;
}

/// Bag-level loss between known labels and predicted proportions.
pub trait CostFunction {
    /// Loss of the predictions `predicted` (one per bag).
    fn cost(&self, bag_labels: &BagLabels, predicted: ArrayView1<'_, f64>) -> Result<f64>;
}

pub(crate) fn check_shapes(
    bag_labels: &BagLabels,
    co_occurrence: ArrayView2<'_, f64>,
    initial: ArrayView1<'_, f64>,
) -> Result<()> {
    if co_occurrence.ncols() != initial.len() {
        return Err(Error::DimensionMismatch {
            expected: co_occurrence.ncols(),
            found: initial.len(),
        });
    }
    if co_occurrence.nrows() != bag_labels.n_bags() {
        return Err(Error::DimensionMismatch {
            expected: bag_labels.n_bags(),
            found: co_occurrence.nrows(),
        });
    }
    Ok(())
}
