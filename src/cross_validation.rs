//! Bag-level cross-validation.
//!
//! Folds are drawn over bags, never over instances: every instance of a bag
//! lands on the same side of a split. Each fold trains on the training bags,
//! then predicts the held-out bags and instances. Predictions are scattered
//! back to their original positions; positions no fold touched keep
//! [`UNSET`].
//!
//! ```text
//! bags 0..B ─▶ (shuffle) ─▶ splits ─▶ pick(train) ─▶ Trainer ─▶ model
//!                                   └▶ pick(test)  ─▶ Tester  ─▶ predictions, loss
//! ```

use crate::bags::{check_membership, BagLabels};
use crate::error::{Error, Result};
use crate::labelling::CostFunction;
use crate::model::BagPredictor;
use crate::trainer::Trainer;
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

/// Placeholder for predictions no fold produced.
pub const UNSET: f64 = -1.0;

/// Leave-p-out fold counts above this are logged.
const MANY_FOLDS: usize = 1000;

/// How bags are split into folds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CvScheme {
    /// `k` near-equal folds; each bag is tested exactly once.
    KFold { k: usize },
    /// Every size-`p` subset of bags is a test set.
    LeavePOut { p: usize },
}

/// Cross-validation configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CvParams {
    pub scheme: CvScheme,
    /// Shuffle bag order once before splitting.
    pub shuffle: bool,
    /// Seed of the shuffle.
    pub seed: u64,
}

impl Default for CvParams {
    fn default() -> Self {
        Self {
            scheme: CvScheme::KFold { k: 5 },
            shuffle: false,
            seed: 0,
        }
    }
}

impl CvParams {
    /// Unshuffled `k`-fold.
    pub fn k_fold(k: usize) -> Self {
        Self {
            scheme: CvScheme::KFold { k },
            ..Self::default()
        }
    }

    /// Unshuffled leave-`p`-out.
    pub fn leave_p_out(p: usize) -> Self {
        Self {
            scheme: CvScheme::LeavePOut { p },
            ..Self::default()
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self, n_bags: usize) -> Result<()> {
        match self.scheme {
            CvScheme::KFold { k } if k < 1 => Err(Error::invalid("k-fold needs k >= 1")),
            CvScheme::KFold { k } if k > n_bags => Err(Error::invalid(format!(
                "k-fold with k = {k} needs at least {k} bags, got {n_bags}"
            ))),
            CvScheme::LeavePOut { p } if p < 1 => Err(Error::invalid("leave-p-out needs p >= 1")),
            CvScheme::LeavePOut { p } if p >= n_bags => Err(Error::invalid(format!(
                "leave-p-out with p = {p} needs more than {p} bags, got {n_bags}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Sorted test and training bag ids of one fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub test: Vec<usize>,
    pub train: Vec<usize>,
}

impl Split {
    fn new(mut test: Vec<usize>, mut train: Vec<usize>) -> Self {
        test.sort_unstable();
        train.sort_unstable();
        Self { test, train }
    }
}

/// Contiguous folds over `order`; the first `len % k` folds get one extra bag.
fn k_fold_splits(order: &[usize], k: usize) -> Vec<Split> {
    let m = order.len();
    let base = m / k;
    let excess = m % k;
    let mut start = 0;
    (0..k)
        .map(|fold| {
            let size = base + usize::from(fold < excess);
            let end = start + size;
            let test = order[start..end].to_vec();
            let train = order[..start].iter().chain(&order[end..]).copied().collect();
            start = end;
            Split::new(test, train)
        })
        .collect()
}

/// `n choose r`, saturating.
fn binomial(n: usize, r: usize) -> usize {
    let r = r.min(n - r);
    (0..r).fold(1usize, |acc, i| acc.saturating_mul(n - i) / (i + 1))
}

fn leave_p_out_splits(order: &[usize], p: usize) -> Vec<Split> {
    let count = binomial(order.len(), p);
    if count > MANY_FOLDS {
        warn!(folds = count, bags = order.len(), p, "leave-p-out produces many folds");
    }
    order
        .iter()
        .copied()
        .combinations(p)
        .map(|test| {
            let train = order.iter().copied().filter(|b| !test.contains(b)).collect();
            Split::new(test, train)
        })
        .collect()
}

/// A bag subset with densely renumbered bags.
#[derive(Debug, Clone)]
pub struct Subset {
    /// Labels of the selected bags, in selection order.
    pub labels: BagLabels,
    /// Instances of the selected bags, in original row order.
    pub instances: Array2<f64>,
    /// Bag of each selected instance, in `[0, labels.n_bags())`.
    pub bags: Vec<usize>,
    /// Row of each selected instance in the full instance matrix.
    pub rows: Vec<usize>,
}

/// Extract the bags in `selected` (distinct) and their instances.
///
/// Bag `selected[i]` becomes bag `i` of the subset. Fails when `bags` does
/// not match `instances` or names unknown bags, and when `selected` holds an
/// unknown or repeated bag.
pub fn pick(
    bag_labels: &BagLabels,
    instances: ArrayView2<'_, f64>,
    bags: &[usize],
    selected: &[usize],
) -> Result<Subset> {
    let n_bags = bag_labels.n_bags();
    check_membership(bags, instances.nrows(), n_bags)?;
    let mut dense = vec![None; n_bags];
    for (i, &b) in selected.iter().enumerate() {
        match dense.get_mut(b) {
            Some(slot @ None) => *slot = Some(i),
            Some(Some(_)) => {
                return Err(Error::invalid(format!("bag {b} selected twice")));
            }
            None => {
                return Err(Error::invalid(format!(
                    "selected bag {b} is out of range for {n_bags} bags"
                )));
            }
        }
    }

    let (rows, fold_bags): (Vec<usize>, Vec<usize>) = bags
        .iter()
        .enumerate()
        .filter_map(|(row, &b)| dense[b].map(|d| (row, d)))
        .unzip();

    Ok(Subset {
        labels: bag_labels.select(selected),
        instances: instances.select(Axis(0), &rows),
        bags: fold_bags,
        rows,
    })
}

/// Held-out evaluation of one fold.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    /// Bag-level loss; `NaN` when no bag could be scored.
    pub loss: f64,
    /// One prediction per test bag, `NaN` for bags without instances.
    pub bag_predictions: Array1<f64>,
    /// One prediction per test instance.
    pub instance_predictions: Array1<f64>,
}

/// Scores a trained model on a held-out subset.
pub trait Tester<M> {
    fn test(&self, model: &M, subset: &Subset) -> Result<TestOutcome>;
}

/// Bag-level cost over the bags with a finite prediction; `NaN` when no bag
/// has one.
pub(crate) fn finite_bag_cost<C: CostFunction>(
    cost: &C,
    bag_labels: &BagLabels,
    predicted: ArrayView1<'_, f64>,
) -> Result<f64> {
    let scored: Vec<usize> = (0..predicted.len())
        .filter(|&b| predicted[b].is_finite())
        .collect();
    if scored.is_empty() {
        return Ok(f64::NAN);
    }
    let kept: Array1<f64> = scored.iter().map(|&b| predicted[b]).collect();
    cost.cost(&bag_labels.select(&scored), kept.view())
}

/// Tests any [`BagPredictor`] with a bag-level cost, ignoring bags the model
/// has no prediction for.
#[derive(Debug, Clone, Default)]
pub struct BagCostTester<C> {
    cost: C,
}

impl<C: CostFunction> BagCostTester<C> {
    /// Score held-out bags with `cost`.
    pub fn new(cost: C) -> Self {
        Self { cost }
    }
}

impl<C: CostFunction, M: BagPredictor> Tester<M> for BagCostTester<C> {
    fn test(&self, model: &M, subset: &Subset) -> Result<TestOutcome> {
        let n_bags = subset.labels.n_bags();
        let bag_predictions = model.predict_bags(subset.instances.view(), &subset.bags, n_bags)?;
        let instance_predictions = model.predict_instances(subset.instances.view())?;
        let loss = finite_bag_cost(&self.cost, &subset.labels, bag_predictions.view())?;

        Ok(TestOutcome {
            loss,
            bag_predictions,
            instance_predictions,
        })
    }
}

/// Everything a cross-validation run produced.
#[derive(Debug, Clone)]
pub struct CvResult<M> {
    /// One model per fold.
    pub models: Vec<M>,
    pub training_losses: Vec<f64>,
    pub test_losses: Vec<f64>,
    /// Held-out prediction per bag, [`UNSET`] where no fold tested the bag.
    pub bag_predictions: Array1<f64>,
    /// Held-out prediction per instance, [`UNSET`] where no fold tested it.
    pub instance_predictions: Array1<f64>,
}

impl<M> CvResult<M> {
    pub fn n_folds(&self) -> usize {
        self.models.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CrossValidator {
    params: CvParams,
}

impl CrossValidator {
    pub fn new(params: CvParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CvParams {
        &self.params
    }

    /// Train/test splits over `n_bags` bags.
    pub fn splits(&self, n_bags: usize) -> Result<Vec<Split>> {
        if n_bags == 0 {
            return Err(Error::EmptyInput);
        }
        self.params.validate(n_bags)?;

        let mut order: Vec<usize> = (0..n_bags).collect();
        if self.params.shuffle {
            let mut rng = StdRng::seed_from_u64(self.params.seed);
            order.shuffle(&mut rng);
        }

        Ok(match self.params.scheme {
            CvScheme::KFold { k } => k_fold_splits(&order, k),
            CvScheme::LeavePOut { p } => leave_p_out_splits(&order, p),
        })
    }

    /// Cross-validate `trainer` on the given bags.
    ///
    /// With leave-p-out a bag is tested by several folds; the last fold's
    /// prediction is kept.
    pub fn run<T, S>(
        &self,
        bag_labels: &BagLabels,
        instances: ArrayView2<'_, f64>,
        bags: &[usize],
        trainer: &mut T,
        tester: &S,
    ) -> Result<CvResult<T::Model>>
    where
        T: Trainer,
        S: Tester<T::Model>,
    {
        bag_labels.validate()?;
        if instances.nrows() == 0 {
            return Err(Error::EmptyInput);
        }
        let n_bags = bag_labels.n_bags();
        check_membership(bags, instances.nrows(), n_bags)?;
        let splits = self.splits(n_bags)?;

        let mut result = CvResult {
            models: Vec::with_capacity(splits.len()),
            training_losses: Vec::with_capacity(splits.len()),
            test_losses: Vec::with_capacity(splits.len()),
            bag_predictions: Array1::from_elem(n_bags, UNSET),
            instance_predictions: Array1::from_elem(instances.nrows(), UNSET),
        };

        for (fold, split) in splits.iter().enumerate() {
            let train = pick(bag_labels, instances, bags, &split.train)?;
            let test = pick(bag_labels, instances, bags, &split.test)?;

            let trained = trainer.train(&train.labels, train.instances.view(), &train.bags)?;
            let outcome = tester.test(&trained.model, &test)?;

            for (i, &b) in split.test.iter().enumerate() {
                result.bag_predictions[b] = outcome.bag_predictions[i];
            }
            for (i, &row) in test.rows.iter().enumerate() {
                result.instance_predictions[row] = outcome.instance_predictions[i];
            }

            info!(
                fold,
                train_bags = split.train.len(),
                test_bags = split.test.len(),
                training_loss = trained.loss,
                test_loss = outcome.loss,
                "cross-validation fold done"
            );
            result.training_losses.push(trained.loss);
            result.test_losses.push(outcome.loss);
            result.models.push(trained.model);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::WeightedEuclidean;
    use crate::labelling::{BagProportionError, IntervalAbsoluteError};
    use crate::model::ClusterModel;
    use crate::trainer::Trained;
    use approx::assert_relative_eq;
    use ndarray::array;
    use proptest::prelude::*;

    /// Predicts the mean training proportion everywhere.
    #[derive(Default)]
    struct MeanTrainer {
        seen: Vec<usize>,
    }

    impl Trainer for MeanTrainer {
        type Model = f64;

        fn train(
            &mut self,
            bag_labels: &BagLabels,
            _instances: ArrayView2<'_, f64>,
            _bags: &[usize],
        ) -> Result<Trained<f64>> {
            self.seen.push(bag_labels.n_bags());
            let p = bag_labels.as_proportions().ok_or(Error::EmptyInput)?;
            Ok(Trained {
                loss: 0.0,
                model: p.mean().unwrap_or(0.0),
            })
        }
    }

    struct ConstantTester;

    impl Tester<f64> for ConstantTester {
        fn test(&self, model: &f64, subset: &Subset) -> Result<TestOutcome> {
            Ok(TestOutcome {
                loss: 1.0,
                bag_predictions: Array1::from_elem(subset.labels.n_bags(), *model),
                instance_predictions: Array1::from_elem(subset.instances.nrows(), *model),
            })
        }
    }

    fn covered(splits: &[Split]) -> Vec<usize> {
        let mut all: Vec<usize> = splits.iter().flat_map(|s| s.test.iter().copied()).collect();
        all.sort_unstable();
        all
    }

    #[test]
    fn k_fold_distributes_excess_first() {
        let splits = CrossValidator::new(CvParams::k_fold(3)).splits(8).unwrap();
        let sizes: Vec<usize> = splits.iter().map(|s| s.test.len()).collect();
        assert_eq!(sizes, vec![3, 3, 2]);
        assert_eq!(splits[0].test, vec![0, 1, 2]);
        assert_eq!(splits[0].train, vec![3, 4, 5, 6, 7]);
        assert_eq!(splits[2].test, vec![6, 7]);
        assert_eq!(covered(&splits), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn shuffled_splits_are_sorted_and_seeded() {
        let cv = CrossValidator::new(CvParams::k_fold(4).with_shuffle(true).with_seed(9));
        let a = cv.splits(10).unwrap();
        let b = cv.splits(10).unwrap();
        assert_eq!(a, b);
        for split in &a {
            assert!(split.test.windows(2).all(|w| w[0] < w[1]));
            assert!(split.train.windows(2).all(|w| w[0] < w[1]));
        }
        assert_eq!(covered(&a), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn leave_p_out_enumerates_subsets() {
        let splits = CrossValidator::new(CvParams::leave_p_out(2)).splits(4).unwrap();
        assert_eq!(splits.len(), 6);
        assert_eq!(splits[0].test, vec![0, 1]);
        assert_eq!(splits[0].train, vec![2, 3]);
        assert_eq!(splits[5].test, vec![2, 3]);
        assert_eq!(binomial(30, 3), 4060);
    }

    #[test]
    fn invalid_schemes() {
        let check = |params: CvParams, n| CrossValidator::new(params).splits(n);
        assert!(matches!(check(CvParams::k_fold(0), 4), Err(Error::InvalidArgument(_))));
        assert!(matches!(check(CvParams::k_fold(5), 4), Err(Error::InvalidArgument(_))));
        assert!(matches!(check(CvParams::leave_p_out(0), 4), Err(Error::InvalidArgument(_))));
        assert!(matches!(check(CvParams::leave_p_out(4), 4), Err(Error::InvalidArgument(_))));
        assert!(matches!(check(CvParams::k_fold(1), 0), Err(Error::EmptyInput)));
        assert!(check(CvParams::k_fold(4), 4).is_ok());
    }

    #[test]
    fn pick_relabels_densely() {
        let labels = BagLabels::Proportions(array![0.1, 0.2, 0.3, 0.4]);
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let bags = [3, 0, 1, 3, 2, 1];
        let subset = pick(&labels, x.view(), &bags, &[1, 3]).unwrap();
        assert_eq!(subset.labels, BagLabels::Proportions(array![0.2, 0.4]));
        assert_eq!(subset.rows, vec![0, 2, 3, 5]);
        assert_eq!(subset.bags, vec![1, 0, 1, 0]);
        assert_eq!(subset.instances, array![[0.0], [2.0], [3.0], [5.0]]);
    }

    #[test]
    fn pick_keeps_interval_rows() {
        let labels = BagLabels::Intervals(array![[0.0, 0.1], [0.2, 0.3], [0.4, 0.5]]);
        let x = array![[0.0], [1.0], [2.0]];
        let subset = pick(&labels, x.view(), &[0, 1, 2], &[0, 2]).unwrap();
        assert_eq!(
            subset.labels,
            BagLabels::Intervals(array![[0.0, 0.1], [0.4, 0.5]])
        );
        assert_eq!(subset.bags, vec![0, 1]);
    }

    #[test]
    fn pick_rejects_bad_indices() {
        let labels = BagLabels::Proportions(array![0.2, 0.8]);
        let x = Array2::<f64>::zeros((2, 1));
        assert!(matches!(
            pick(&labels, x.view(), &[0, 5], &[0]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            pick(&labels, x.view(), &[0, 1], &[0, 2]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            pick(&labels, x.view(), &[0, 1], &[1, 1]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            pick(&labels, x.view(), &[0], &[0]),
            Err(Error::DimensionMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn untouched_positions_stay_unset() {
        // Bag 2 exists in the labels but owns no instance.
        let labels = BagLabels::Proportions(array![0.2, 0.4, 0.6]);
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let bags = [0, 0, 1, 1];
        let mut trainer = MeanTrainer::default();
        let result = CrossValidator::new(CvParams::k_fold(3))
            .run(&labels, x.view(), &bags, &mut trainer, &ConstantTester)
            .unwrap();

        assert_eq!(result.n_folds(), 3);
        assert_eq!(trainer.seen, vec![2, 2, 2]);
        assert_relative_eq!(result.bag_predictions[0], 0.5);
        assert_relative_eq!(result.bag_predictions[1], 0.4);
        assert_relative_eq!(result.instance_predictions[0], 0.5);
        assert_relative_eq!(result.instance_predictions[3], 0.4);
        assert_eq!(result.test_losses, vec![1.0; 3]);
    }

    #[test]
    fn declined_instance_predictions_stay_unset() {
        struct BagsOnly;
        impl Tester<f64> for BagsOnly {
            fn test(&self, model: &f64, subset: &Subset) -> Result<TestOutcome> {
                Ok(TestOutcome {
                    loss: 0.0,
                    bag_predictions: Array1::from_elem(subset.labels.n_bags(), *model),
                    instance_predictions: Array1::from_elem(subset.instances.nrows(), UNSET),
                })
            }
        }

        let labels = BagLabels::Proportions(array![0.2, 0.4, 0.6]);
        let x = array![[0.0], [1.0], [2.0]];
        let result = CrossValidator::new(CvParams::leave_p_out(1))
            .run(&labels, x.view(), &[0, 1, 2], &mut MeanTrainer::default(), &BagsOnly)
            .unwrap();
        assert_eq!(result.n_folds(), 3);
        assert!(result.bag_predictions.iter().all(|&p| p != UNSET));
        assert!(result.instance_predictions.iter().all(|&p| p == UNSET));
    }

    #[test]
    fn run_rejects_bad_membership() {
        let labels = BagLabels::Proportions(array![0.2, 0.4]);
        let x = array![[0.0], [1.0]];
        let err = CrossValidator::new(CvParams::k_fold(2))
            .run(&labels, x.view(), &[0, 2], &mut MeanTrainer::default(), &ConstantTester)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn bag_cost_tester_skips_empty_bags() {
        let mut model = ClusterModel::new(
            array![[0.0], [10.0]],
            array![0.0, 1.0],
            WeightedEuclidean::unweighted(1).unwrap(),
        )
        .unwrap();
        model.build().unwrap();

        let subset = Subset {
            labels: BagLabels::Proportions(array![0.5, 0.9, 0.0]),
            instances: array![[0.5], [9.0], [11.0], [1.0]],
            bags: vec![0, 1, 1, 0],
            rows: vec![0, 1, 2, 3],
        };
        let outcome = BagCostTester::new(BagProportionError::new(0.0))
            .test(&model, &subset)
            .unwrap();
        assert_eq!(outcome.bag_predictions[0], 0.0);
        assert_eq!(outcome.bag_predictions[1], 1.0);
        assert!(outcome.bag_predictions[2].is_nan());
        assert_eq!(outcome.instance_predictions.to_vec(), vec![0.0, 1.0, 1.0, 0.0]);
        assert_relative_eq!(outcome.loss, 0.25 + 0.01, epsilon = 1e-12);

        let intervals = Subset {
            labels: BagLabels::Intervals(array![[0.0, 0.2], [0.5, 0.8]]),
            ..subset
        };
        let outcome = BagCostTester::new(IntervalAbsoluteError)
            .test(&model, &intervals)
            .unwrap();
        assert_relative_eq!(outcome.loss, 0.2, epsilon = 1e-12);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn params_round_trip_through_json() {
        let params = CvParams::leave_p_out(2).with_shuffle(true).with_seed(3);
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(serde_json::from_str::<CvParams>(&json).unwrap(), params);
    }

    proptest! {
        #[test]
        fn k_fold_partitions_bags(n in 1usize..40, k_seed in 0usize..40, shuffle: bool, seed: u64) {
            let k = 1 + k_seed % n;
            let cv = CrossValidator::new(CvParams::k_fold(k).with_shuffle(shuffle).with_seed(seed));
            let splits = cv.splits(n).unwrap();
            prop_assert_eq!(splits.len(), k);
            prop_assert_eq!(covered(&splits), (0..n).collect::<Vec<_>>());
            for split in &splits {
                prop_assert_eq!(split.test.len() + split.train.len(), n);
                prop_assert!(split.test.iter().all(|b| !split.train.contains(b)));
                let size = split.test.len();
                prop_assert!(size == n / k || size == n / k + 1);
            }
        }
    }
}
