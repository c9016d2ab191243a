//! K-means under an arbitrary weighted distance.
//!
//! Lloyd's algorithm with the distance swapped out: points are assigned to
//! the center that minimizes the supplied [`Distance`], and centers are
//! updated to the arithmetic mean of their members.
//!
//! # The Objective
//!
//! ```text
//! J = Σₖ Σᵢ∈Cₖ d(xᵢ, μₖ)
//! ```
//!
//! For squared Euclidean `d` the mean is the exact minimizer of each inner
//! sum. For the histogram distance the mean is a cheap, well-behaved stand-in
//! (cumulative sums are linear, so the mean histogram has the mean
//! cumulative distribution), which is what hierarchical index builders do.
//!
//! # Seeding
//!
//! - [`CenterInit::Random`]: distinct random members.
//! - [`CenterInit::KmeansPlusPlus`]: next center drawn with probability
//!   proportional to its distance to the nearest chosen center.
//!
//! Seeding only picks points at non-zero distance from the centers already
//! chosen. If a group has fewer than `k` distinct points, seeding fails and
//! the caller decides what to do (the hierarchical clusterer makes a leaf).

use super::index::NearestCenterIndex;
use super::traits::{check_instances, Clusterer, Clustering};
use crate::distance::Distance;
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2};
use rand::prelude::*;

/// How initial centers are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CenterInit {
    /// Uniformly random distinct members.
    #[default]
    Random,
    /// k-means++ seeding under the clustering distance.
    KmeansPlusPlus,
}

/// Result of running k-means on a subset of rows.
#[derive(Debug, Clone)]
pub(crate) struct SubsetFit {
    /// `k` centers.
    pub centers: Array2<f64>,
    /// Position in `0..k` for every member, in member order.
    pub labels: Vec<usize>,
}

/// Flat k-means clustering with a pluggable distance.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Kmeans {
    /// Maximum Lloyd iterations.
    max_iter: usize,
    /// Seeding strategy.
    init: CenterInit,
}

impl Default for Kmeans {
    fn default() -> Self {
        Self::new()
    }
}

impl Kmeans {
    /// Create a new K-means clusterer.
    pub fn new() -> Self {
        Self {
            max_iter: 100,
            init: CenterInit::Random,
        }
    }

    /// Set maximum iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set seeding strategy.
    pub fn with_init(mut self, init: CenterInit) -> Self {
        self.init = init;
        self
    }

    /// Maximum Lloyd iterations.
    pub fn max_iter(&self) -> usize {
        self.max_iter
    }

    /// Seeding strategy.
    pub fn init(&self) -> CenterInit {
        self.init
    }

    /// Pick `k` distinct members as initial centers.
    fn seed_centers<D: Distance, R: Rng + ?Sized>(
        &self,
        data: ArrayView2<'_, f64>,
        members: &[usize],
        k: usize,
        dist: &D,
        rng: &mut R,
    ) -> Option<Vec<usize>> {
        let mut chosen: Vec<usize> = Vec::with_capacity(k);
        match self.init {
            CenterInit::Random => {
                let mut order = members.to_vec();
                order.shuffle(rng);
                for idx in order {
                    let point = data.row(idx);
                    let duplicate = chosen
                        .iter()
                        .any(|&c| dist.eval(point, data.row(c)) <= 0.0);
                    if !duplicate {
                        chosen.push(idx);
                        if chosen.len() == k {
                            break;
                        }
                    }
                }
            }
            CenterInit::KmeansPlusPlus => {
                chosen.push(members[rng.random_range(0..members.len())]);
                let mut closest: Vec<f64> = members
                    .iter()
                    .map(|&m| dist.eval(data.row(m), data.row(chosen[0])))
                    .collect();
                while chosen.len() < k {
                    let total: f64 = closest.iter().sum();
                    if total <= 0.0 || !total.is_finite() {
                        break;
                    }
                    let threshold = rng.random::<f64>() * total;
                    let mut cumsum = 0.0;
                    let mut selected = None;
                    for (j, &d) in closest.iter().enumerate() {
                        cumsum += d;
                        if d > 0.0 && cumsum >= threshold {
                            selected = Some(j);
                            break;
                        }
                    }
                    // Rounding can leave the threshold just above the sum.
                    let j = match selected {
                        Some(j) => j,
                        None => closest.iter().rposition(|&d| d > 0.0)?,
                    };
                    let next = members[j];
                    chosen.push(next);
                    for (c, &m) in closest.iter_mut().zip(members.iter()) {
                        *c = c.min(dist.eval(data.row(m), data.row(next)));
                    }
                }
            }
        }
        (chosen.len() == k).then_some(chosen)
    }

    /// Run k-means on the rows listed in `members`.
    ///
    /// Returns `None` when fewer than `k` distinct members exist.
    pub(crate) fn fit_subset<D: Distance, R: Rng + ?Sized>(
        &self,
        data: ArrayView2<'_, f64>,
        members: &[usize],
        k: usize,
        dist: &D,
        rng: &mut R,
    ) -> Option<SubsetFit> {
        if k == 0 || members.len() < k {
            return None;
        }
        let seeds = self.seed_centers(data, members, k, dist, rng)?;
        let d = data.ncols();
        let mut centers = Array2::zeros((k, d));
        for (c, &s) in seeds.iter().enumerate() {
            centers.row_mut(c).assign(&data.row(s));
        }

        let mut labels = vec![usize::MAX; members.len()];
        for _iter in 0..self.max_iter.max(1) {
            // Assignment step
            let mut changed = false;
            let mut nearest_dist = vec![0.0; members.len()];
            for (slot, &m) in members.iter().enumerate() {
                let point = data.row(m);
                let mut best = 0;
                let mut best_dist = f64::INFINITY;
                for (c, center) in centers.outer_iter().enumerate() {
                    let dd = dist.eval(point, center);
                    if dd < best_dist {
                        best_dist = dd;
                        best = c;
                    }
                }
                if labels[slot] != best {
                    labels[slot] = best;
                    changed = true;
                }
                nearest_dist[slot] = best_dist;
            }

            // Empty clusters take the member farthest from its center.
            let mut counts = vec![0usize; k];
            for &l in &labels {
                counts[l] += 1;
            }
            for c in 0..k {
                if counts[c] > 0 {
                    continue;
                }
                let donor = (0..members.len())
                    .filter(|&s| counts[labels[s]] > 1)
                    .max_by(|&a, &b| nearest_dist[a].total_cmp(&nearest_dist[b]));
                if let Some(s) = donor {
                    counts[labels[s]] -= 1;
                    labels[s] = c;
                    counts[c] = 1;
                    nearest_dist[s] = 0.0;
                    changed = true;
                }
            }

            if !changed {
                break;
            }

            // Update step
            let mut sums = Array2::<f64>::zeros((k, d));
            for (slot, &m) in members.iter().enumerate() {
                let mut row = sums.row_mut(labels[slot]);
                row += &data.row(m);
            }
            for c in 0..k {
                if counts[c] > 0 {
                    let mean = &sums.row(c) / counts[c] as f64;
                    centers.row_mut(c).assign(&mean);
                }
            }
        }

        Some(SubsetFit { centers, labels })
    }
}

impl Clusterer for Kmeans {
    fn cluster<D: Distance, R: Rng + ?Sized>(
        &self,
        instances: ArrayView2<'_, f64>,
        distance: &D,
        requested_k: usize,
        rng: &mut R,
    ) -> Result<Clustering> {
        check_instances(instances, distance)?;
        let n = instances.nrows();
        if requested_k == 0 || requested_k > n {
            return Err(Error::InvalidClusterCount {
                requested: requested_k,
                reason: format!("need 1 <= k <= {n} instances"),
            });
        }
        let members: Vec<usize> = (0..n).collect();
        let fit = self
            .fit_subset(instances, &members, requested_k, distance, rng)
            .ok_or_else(|| Error::InvalidClusterCount {
                requested: requested_k,
                reason: "not enough distinct instances".into(),
            })?;

        let index = NearestCenterIndex::new(fit.centers, distance.clone())?;
        let (indices, distances) = index.query(instances)?;
        Ok(Clustering {
            centers: index.centers().clone(),
            indices,
            distances,
        })
    }
}

/// Arithmetic mean of the listed rows.
pub(crate) fn mean_of(data: ArrayView2<'_, f64>, members: &[usize]) -> Array1<f64> {
    let mut mean = Array1::zeros(data.ncols());
    for &m in members {
        mean += &data.row(m);
    }
    if !members.is_empty() {
        mean /= members.len() as f64;
    }
    mean
}
