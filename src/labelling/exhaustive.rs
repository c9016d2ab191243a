//! Exhaustive binary labelling.
//!
//! Tries every `x ∈ {0, 1}^k`, grouped by the number of ones. Each group
//! walks the lexicographic permutations of `0…0 1…1`, so the search visits
//! labellings with fewer ones first and keeps the first strict minimum.
//! Exponential in `k`.

use super::traits::{check_shapes, ClusterLabeller, CostFunction, Labelling};
use crate::bags::{predict_proportions, BagLabels};
use crate::error::{Error, Result};
use ndarray::{Array1, ArrayView1, ArrayView2};

/// Largest cluster count the exhaustive search accepts.
pub const MAX_EXHAUSTIVE_CLUSTERS: usize = 24;

/// Advance `v` to its next lexicographic permutation.
///
/// Returns `false` (and leaves `v` sorted ascending) after the last one.
fn next_permutation<T: Ord>(v: &mut [T]) -> bool {
    if v.len() < 2 {
        return false;
    }
    let mut i = v.len() - 1;
    while i > 0 && v[i - 1] >= v[i] {
        i -= 1;
    }
    if i == 0 {
        v.reverse();
        return false;
    }
    let mut j = v.len() - 1;
    while v[j] <= v[i - 1] {
        j -= 1;
    }
    v.swap(i - 1, j);
    v[i..].reverse();
    true
}

/// Brute-force binary labeller, generic over the bag cost.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExhaustiveLabeller<C> {
    cost: C,
}

impl<C: CostFunction> ExhaustiveLabeller<C> {
    pub fn new(cost: C) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> &C {
        &self.cost
    }
}

impl<C: CostFunction> ClusterLabeller for ExhaustiveLabeller<C> {
    fn label(
        &self,
        bag_labels: &BagLabels,
        co_occurrence: ArrayView2<'_, f64>,
        initial: ArrayView1<'_, f64>,
    ) -> Result<Labelling> {
        check_shapes(bag_labels, co_occurrence, initial)?;
        let k = co_occurrence.ncols();
        if k > MAX_EXHAUSTIVE_CLUSTERS {
            return Err(Error::invalid(format!(
                "exhaustive labelling of {k} clusters exceeds the limit of {MAX_EXHAUSTIVE_CLUSTERS}"
            )));
        }

        let mut best = Labelling {
            loss: f64::INFINITY,
            labels: initial.to_owned(),
        };
        let mut pattern = vec![0u8; k];
        let mut x = Array1::<f64>::zeros(k);
        for ones in 0..=k {
            for (slot, bit) in pattern.iter_mut().enumerate() {
                *bit = u8::from(slot >= k - ones);
            }
            loop {
                for (xi, &bit) in x.iter_mut().zip(pattern.iter()) {
                    *xi = f64::from(bit);
                }
                let predicted = predict_proportions(co_occurrence, x.view());
                let loss = self.cost.cost(bag_labels, predicted.view())?;
                if loss < best.loss {
                    best.loss = loss;
                    best.labels.assign(&x);
                }
                if !next_permutation(&mut pattern) {
                    break;
                }
            }
        }
        Ok(best)
    }
}
