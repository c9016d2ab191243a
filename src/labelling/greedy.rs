//! Greedy binary labelling.
//!
//! Starts from all zeros. Each round tries flipping every remaining zero
//! cluster to one and keeps the single flip with the lowest cost, provided
//! it beats the best cost so far. The first round always flips one cluster,
//! so the result has at least one positive cluster when `k ≥ 1`. At most `k`
//! rounds.

use super::traits::{check_shapes, ClusterLabeller, CostFunction, Labelling};
use crate::bags::{predict_proportions, BagLabels};
use crate::error::Result;
use ndarray::{Array1, ArrayView1, ArrayView2};

/// Greedy forward-selection labeller, generic over the bag cost.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GreedyLabeller<C> {
    cost: C,
}

impl<C: CostFunction> GreedyLabeller<C> {
    pub fn new(cost: C) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> &C {
        &self.cost
    }

    /// Label and also return the loss after every accepted flip.
    pub fn label_with_history(
        &self,
        bag_labels: &BagLabels,
        co_occurrence: ArrayView2<'_, f64>,
        initial: ArrayView1<'_, f64>,
    ) -> Result<(Labelling, Vec<f64>)> {
        check_shapes(bag_labels, co_occurrence, initial)?;
        let k = co_occurrence.ncols();

        let mut is_one = vec![false; k];
        let mut x = Array1::<f64>::zeros(k);
        let mut best_loss = f64::INFINITY;
        let mut history = Vec::new();

        for _round in 0..k {
            let mut best_flip = None;
            for j in 0..k {
                if is_one[j] {
                    continue;
                }
                x[j] = 1.0;
                let predicted = predict_proportions(co_occurrence, x.view());
                let loss = self.cost.cost(bag_labels, predicted.view())?;
                x[j] = 0.0;
                if loss < best_loss {
                    best_loss = loss;
                    best_flip = Some(j);
                }
            }
            let Some(j) = best_flip else {
                break;
            };
            is_one[j] = true;
            x[j] = 1.0;
            history.push(best_loss);
        }

        Ok((
            Labelling {
                loss: best_loss,
                labels: x,
            },
            history,
        ))
    }
}

impl<C: CostFunction> ClusterLabeller for GreedyLabeller<C> {
    fn label(
        &self,
        bag_labels: &BagLabels,
        co_occurrence: ArrayView2<'_, f64>,
        initial: ArrayView1<'_, f64>,
    ) -> Result<Labelling> {
        self.label_with_history(bag_labels, co_occurrence, initial)
            .map(|(labelling, _)| labelling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labelling::{BagProportionError, IntervalSquaredError};
    use ndarray::{array, Array2};
    use proptest::prelude::*;

    #[test]
    fn picks_clusters_of_positive_bags() {
        let c = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let labels = BagLabels::Proportions(array![1.0, 0.0, 1.0]);
        let (out, history) = GreedyLabeller::new(BagProportionError::new(0.0))
            .label_with_history(&labels, c.view(), Array1::zeros(3).view())
            .unwrap();
        assert_eq!(out.labels.to_vec(), vec![1.0, 0.0, 1.0]);
        assert_eq!(out.loss, 0.0);
        assert_eq!(history, vec![1.0, 0.0]);
    }

    #[test]
    fn first_round_always_flips() {
        // All-zero is optimal, but one cluster still ends up positive.
        let c = array![[0.5, 0.5], [0.5, 0.5]];
        let labels = BagLabels::Proportions(array![0.0, 0.0]);
        let out = GreedyLabeller::new(BagProportionError::default())
            .label(&labels, c.view(), Array1::zeros(2).view())
            .unwrap();
        assert_eq!(out.labels.sum(), 1.0);
        assert_eq!(out.labels[0], 1.0, "ties go to the lowest index");
    }

    #[test]
    fn interval_labels() {
        let c = array![[1.0, 0.0], [0.0, 1.0]];
        let labels = BagLabels::Intervals(array![[0.0, 0.2], [0.8, 1.0]]);
        let out = GreedyLabeller::new(IntervalSquaredError)
            .label(&labels, c.view(), Array1::zeros(2).view())
            .unwrap();
        assert_eq!(out.labels.to_vec(), vec![0.0, 1.0]);
        assert_eq!(out.loss, 0.0);
    }

    #[test]
    fn zero_clusters_gives_infinite_loss() {
        let c = Array2::<f64>::zeros((2, 0));
        let labels = BagLabels::Proportions(array![0.1, 0.2]);
        let out = GreedyLabeller::new(BagProportionError::default())
            .label(&labels, c.view(), Array1::zeros(0).view())
            .unwrap();
        assert!(out.loss.is_infinite());
        assert_eq!(out.labels.len(), 0);
    }

    proptest! {
        #[test]
        fn accepted_flips_strictly_improve(
            counts in proptest::collection::vec(0u32..5, 24),
            props in proptest::collection::vec(0.0f64..1.0, 4),
        ) {
            let mut c = Array2::from_shape_fn((4, 6), |(i, j)| f64::from(counts[i * 6 + j]));
            crate::bags::row_normalize(&mut c);
            let labels = BagLabels::Proportions(Array1::from(props));
            let (out, history) = GreedyLabeller::new(BagProportionError::new(1.0))
                .label_with_history(&labels, c.view(), Array1::zeros(6).view())
                .unwrap();
            prop_assert!(history.len() <= 6);
            prop_assert!(!history.is_empty());
            for pair in history.windows(2) {
                prop_assert!(pair[1] < pair[0]);
            }
            prop_assert_eq!(out.loss, *history.last().unwrap());
            prop_assert_eq!(out.labels.sum() as usize, history.len());
        }
    }
}
