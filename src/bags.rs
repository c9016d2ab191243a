//! Bags, bag labels, and the bag × cluster co-occurrence matrix.
//!
//! # Co-occurrence
//!
//! Given a bag id and a cluster id for every instance, the co-occurrence
//! matrix counts how many of bag `i`'s instances fall in cluster `j`:
//!
//! ```text
//! C[i, j] = |{ n : bag(n) = i ∧ cluster(n) = j }|
//! ```
//!
//! Row normalization turns counts into fractions, so `(C·x)_i` is the
//! proportion of bag `i` predicted by a cluster labelling `x`. A bag with no
//! instances keeps an all-zero row.

use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Known bag-level supervision.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BagLabels {
    /// One label proportion in `[0, 1]` per bag.
    Proportions(Array1<f64>),
    /// One `[low, high]` row per bag.
    Intervals(Array2<f64>),
}

impl BagLabels {
    /// Number of bags.
    pub fn n_bags(&self) -> usize {
        match self {
            BagLabels::Proportions(p) => p.len(),
            BagLabels::Intervals(i) => i.nrows(),
        }
    }

    /// Check the value constraints of the active representation.
    pub fn validate(&self) -> Result<()> {
        match self {
            BagLabels::Proportions(p) => {
                if let Some(v) = p.iter().find(|v| !v.is_finite()) {
                    return Err(Error::invalid(format!("bag proportion {v} is not finite")));
                }
            }
            BagLabels::Intervals(i) => {
                if i.ncols() != 2 {
                    return Err(Error::DimensionMismatch {
                        expected: 2,
                        found: i.ncols(),
                    });
                }
                for (bag, row) in i.outer_iter().enumerate() {
                    let (low, high) = (row[0], row[1]);
                    if !low.is_finite() || !high.is_finite() || low > high {
                        return Err(Error::invalid(format!(
                            "bag {bag} has an invalid interval [{low}, {high}]"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Labels of the bags in `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        match self {
            BagLabels::Proportions(p) => {
                BagLabels::Proportions(indices.iter().map(|&i| p[i]).collect())
            }
            BagLabels::Intervals(i) => BagLabels::Intervals(i.select(Axis(0), indices)),
        }
    }

    /// The proportion vector, or `None` for interval labels.
    pub fn as_proportions(&self) -> Option<&Array1<f64>> {
        match self {
            BagLabels::Proportions(p) => Some(p),
            BagLabels::Intervals(_) => None,
        }
    }

    /// One point target per bag: the proportion, or the interval midpoint.
    pub fn targets(&self) -> Array1<f64> {
        match self {
            BagLabels::Proportions(p) => p.clone(),
            BagLabels::Intervals(i) => i.outer_iter().map(|r| 0.5 * (r[0] + r[1])).collect(),
        }
    }

    /// The interval matrix, or `None` for proportion labels.
    pub fn as_intervals(&self) -> Option<&Array2<f64>> {
        match self {
            BagLabels::Proportions(_) => None,
            BagLabels::Intervals(i) => Some(i),
        }
    }
}

/// Validate that `bags` maps every instance into `[0, n_bags)`.
///
/// Used at the boundary of the training core. It does not require every bag
/// to be populated; see [`BagDataset::new`] for the load-time check.
pub fn check_membership(bags: &[usize], n_instances: usize, n_bags: usize) -> Result<()> {
    if bags.len() != n_instances {
        return Err(Error::DimensionMismatch {
            expected: n_instances,
            found: bags.len(),
        });
    }
    if let Some(&b) = bags.iter().find(|&&b| b >= n_bags) {
        return Err(Error::invalid(format!(
            "bag index {b} is out of range for {n_bags} bags"
        )));
    }
    Ok(())
}

/// Number of instances in each bag.
pub fn bag_sizes(bags: &[usize], n_bags: usize) -> Vec<usize> {
    let mut sizes = vec![0usize; n_bags];
    for &b in bags {
        sizes[b] += 1;
    }
    sizes
}

/// Raw bag × cluster counts.
///
/// Pairs are read in lockstep; both slices must have the same length and
/// their values must lie in `[0, n_bags)` and `[0, n_clusters)`.
pub fn co_occurrence(
    bags: &[usize],
    clusters: &[usize],
    n_bags: usize,
    n_clusters: usize,
) -> Result<Array2<f64>> {
    if bags.len() != clusters.len() {
        return Err(Error::DimensionMismatch {
            expected: bags.len(),
            found: clusters.len(),
        });
    }
    let mut c = Array2::zeros((n_bags, n_clusters));
    for (&b, &k) in bags.iter().zip(clusters.iter()) {
        if b >= n_bags || k >= n_clusters {
            return Err(Error::invalid(format!(
                "pair (bag {b}, cluster {k}) outside a {n_bags}x{n_clusters} matrix"
            )));
        }
        c[[b, k]] += 1.0;
    }
    Ok(c)
}

/// Divide each row by its sum in place. Rows summing to zero stay zero.
pub fn row_normalize(c: &mut Array2<f64>) {
    for mut row in c.outer_iter_mut() {
        let total: f64 = row.sum();
        if total > 0.0 {
            row /= total;
        }
    }
}

/// Row-normalized co-occurrence matrix.
pub fn normalized_co_occurrence(
    bags: &[usize],
    clusters: &[usize],
    n_bags: usize,
    n_clusters: usize,
) -> Result<Array2<f64>> {
    let mut c = co_occurrence(bags, clusters, n_bags, n_clusters)?;
    row_normalize(&mut c);
    Ok(c)
}

/// Predicted bag proportions `C·x` for cluster labels `x`.
pub fn predict_proportions(c: ArrayView2<'_, f64>, labels: ArrayView1<'_, f64>) -> Array1<f64> {
    c.dot(&labels)
}

/// Instances, their bag membership and the bag labels, validated together.
///
/// This is the load-time gate: unlike the training core it requires bag ids
/// to form a contiguous, fully populated range.
#[derive(Debug, Clone)]
pub struct BagDataset {
    instances: Array2<f64>,
    bags: Vec<usize>,
    labels: BagLabels,
}

impl BagDataset {
    /// Validate and bundle a dataset.
    pub fn new(instances: Array2<f64>, bags: Vec<usize>, labels: BagLabels) -> Result<Self> {
        if instances.nrows() == 0 {
            return Err(Error::EmptyInput);
        }
        labels.validate()?;
        let n_bags = labels.n_bags();
        check_membership(&bags, instances.nrows(), n_bags)?;
        if let Some(empty) = bag_sizes(&bags, n_bags).iter().position(|&s| s == 0) {
            return Err(Error::invalid(format!(
                "bag ids must cover [0, {n_bags}) but bag {empty} has no instances"
            )));
        }
        Ok(Self {
            instances,
            bags,
            labels,
        })
    }

    /// Number of distinct bags implied by a membership vector.
    ///
    /// Fails unless the ids are exactly `0..=max`.
    pub fn count_bags(bags: &[usize]) -> Result<usize> {
        let Some(&max) = bags.iter().max() else {
            return Err(Error::EmptyInput);
        };
        let sizes = bag_sizes(bags, max + 1);
        if let Some(gap) = sizes.iter().position(|&s| s == 0) {
            return Err(Error::invalid(format!(
                "bag membership must cover [0, {max}] but bag {gap} is missing"
            )));
        }
        Ok(max + 1)
    }

    /// Instance matrix.
    pub fn instances(&self) -> &Array2<f64> {
        &self.instances
    }

    /// Bag id per instance.
    pub fn bags(&self) -> &[usize] {
        &self.bags
    }

    /// Known bag labels.
    pub fn labels(&self) -> &BagLabels {
        &self.labels
    }

    /// Number of bags.
    pub fn n_bags(&self) -> usize {
        self.labels.n_bags()
    }
}
