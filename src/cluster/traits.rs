//! Clustering traits.

use crate::distance::Distance;
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;

/// Output of one clustering run.
///
/// Produced fresh by every [`Clusterer::cluster`] call and never mutated
/// afterwards; `indices` and `distances` were computed against `centers`.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    /// Realized centers, one per row.
    pub centers: Array2<f64>,
    /// Nearest center of every instance.
    pub indices: Vec<usize>,
    /// Distance from every instance to its nearest center.
    pub distances: Array1<f64>,
}

impl Clustering {
    /// Number of realized clusters.
    pub fn n_clusters(&self) -> usize {
        self.centers.nrows()
    }

    /// Number of instances per cluster.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.n_clusters()];
        for &i in &self.indices {
            sizes[i] += 1;
        }
        sizes
    }
}

/// Trait for hard clustering under a caller-supplied distance.
///
/// Distance, cluster count and randomness are per call, so one clusterer
/// value can serve many objective evaluations.
pub trait Clusterer {
    /// Cluster `instances` (one per row) into at most `requested_k` groups
    /// and assign every instance to its nearest realized center.
    fn cluster<D: Distance, R: Rng + ?Sized>(
        &self,
        instances: ArrayView2<'_, f64>,
        distance: &D,
        requested_k: usize,
        rng: &mut R,
    ) -> Result<Clustering>;

    /// Number of clusters a call with `requested_k` aims for.
    fn realized_k(&self, requested_k: usize) -> usize {
        requested_k
    }

    /// Reject a cluster count this clusterer can never honor, whatever the
    /// data. Called once before any clustering work.
    fn check_k(&self, requested_k: usize) -> Result<()> {
        if requested_k == 0 {
            return Err(Error::InvalidClusterCount {
                requested: 0,
                reason: "at least one cluster is needed".into(),
            });
        }
        Ok(())
    }
}

pub(crate) fn check_instances<D: Distance>(
    instances: ArrayView2<'_, f64>,
    distance: &D,
) -> Result<()> {
    if instances.nrows() == 0 {
        return Err(Error::EmptyInput);
    }
    if instances.ncols() != distance.dim() {
        return Err(Error::DimensionMismatch {
            expected: distance.dim(),
            found: instances.ncols(),
        });
    }
    Ok(())
}
