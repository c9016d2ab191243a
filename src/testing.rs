//! Synthetic bag datasets for tests.

use crate::bags::BagLabels;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

pub(crate) struct Synthetic {
    pub instances: Array2<f64>,
    pub bags: Vec<usize>,
    pub labels: BagLabels,
    /// Hidden instance labels.
    pub truth: Vec<f64>,
}

/// Two Gaussian blobs in 2-D, negatives around `(0, 0)` and positives around
/// `(4, 4)`. Bag `b` holds `per_bag` instances of which
/// `round(proportions[b] · per_bag)` are positive; the returned proportions
/// are the realized ones.
pub(crate) fn blob_bags(proportions: &[f64], per_bag: usize, seed: u64) -> Synthetic {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.5).unwrap();
    let n = proportions.len() * per_bag;
    let mut instances = Array2::zeros((n, 2));
    let mut bags = Vec::with_capacity(n);
    let mut truth = Vec::with_capacity(n);
    let mut realized = Array1::zeros(proportions.len());

    for (b, &p) in proportions.iter().enumerate() {
        let positives = (p * per_bag as f64).round() as usize;
        realized[b] = positives as f64 / per_bag as f64;
        for i in 0..per_bag {
            let row = b * per_bag + i;
            let positive = i < positives;
            let center = if positive { 4.0 } else { 0.0 };
            instances[[row, 0]] = center + noise.sample(&mut rng);
            instances[[row, 1]] = center + noise.sample(&mut rng);
            bags.push(b);
            truth.push(if positive { 1.0 } else { 0.0 });
        }
    }

    Synthetic {
        instances,
        bags,
        labels: BagLabels::Proportions(realized),
        truth,
    }
}
