//! Exact nearest-center search.
//!
//! A linear scan over the centers. Cluster counts in this crate are small
//! (tens to a few hundred), so a tree index would not pay for itself, and a
//! linear scan works with any [`Distance`], metric or not.

use crate::distance::Distance;
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Frozen set of centers searchable under one distance.
#[derive(Debug, Clone)]
pub struct NearestCenterIndex<D> {
    centers: Array2<f64>,
    distance: D,
}

impl<D: Distance> NearestCenterIndex<D> {
    /// Build an index over `centers` (one per row).
    pub fn new(centers: Array2<f64>, distance: D) -> Result<Self> {
        if centers.nrows() == 0 {
            return Err(Error::EmptyInput);
        }
        if centers.ncols() != distance.dim() {
            return Err(Error::DimensionMismatch {
                expected: distance.dim(),
                found: centers.ncols(),
            });
        }
        Ok(Self { centers, distance })
    }

    /// Index and distance of the center closest to `query`.
    ///
    /// Ties go to the lowest index.
    pub fn nearest(&self, query: ArrayView1<'_, f64>) -> (usize, f64) {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (k, center) in self.centers.outer_iter().enumerate() {
            let d = self.distance.eval(query, center);
            if d < best_dist {
                best_dist = d;
                best = k;
            }
        }
        (best, best_dist)
    }

    /// The `k` centers closest to `query`, nearest first, as
    /// `(index, distance)` pairs. Ties go to the lowest index; all centers
    /// come back when `k` exceeds their number.
    pub fn k_nearest(&self, query: ArrayView1<'_, f64>, k: usize) -> Vec<(usize, f64)> {
        let mut hits: Vec<(usize, f64)> = self
            .centers
            .outer_iter()
            .enumerate()
            .map(|(i, center)| (i, self.distance.eval(query, center)))
            .collect();
        // Stable, so equal distances keep index order.
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits.truncate(k);
        hits
    }

    /// Nearest center of every row of `instances`.
    pub fn query(&self, instances: ArrayView2<'_, f64>) -> Result<(Vec<usize>, Array1<f64>)> {
        if instances.ncols() != self.centers.ncols() {
            return Err(Error::DimensionMismatch {
                expected: self.centers.ncols(),
                found: instances.ncols(),
            });
        }

        #[cfg(feature = "parallel")]
        let hits: Vec<(usize, f64)> = (0..instances.nrows())
            .into_par_iter()
            .map(|i| self.nearest(instances.row(i)))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let hits: Vec<(usize, f64)> = instances
            .outer_iter()
            .map(|row| self.nearest(row))
            .collect();

        let (indices, distances): (Vec<usize>, Vec<f64>) = hits.into_iter().unzip();
        Ok((indices, Array1::from(distances)))
    }

    /// Indexed centers.
    pub fn centers(&self) -> &Array2<f64> {
        &self.centers
    }

    /// Distance the index searches with.
    pub fn distance(&self) -> &D {
        &self.distance
    }

    /// Number of centers.
    pub fn len(&self) -> usize {
        self.centers.nrows()
    }

    /// Always false; an index holds at least one center.
    pub fn is_empty(&self) -> bool {
        self.centers.nrows() == 0
    }
}
