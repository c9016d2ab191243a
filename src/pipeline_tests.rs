//! End-to-end scenarios across clustering, labelling, training and
//! cross-validation.

use crate::bags::{normalized_co_occurrence, predict_proportions, BagLabels};
use crate::cluster::{CenterInit, Clusterer, HierarchicalKmeans};
use crate::cross_validation::{BagCostTester, CrossValidator, CvParams, UNSET};
use crate::distance::{WeightedEuclidean, WeightedHistogramDistance};
use crate::labelling::{
    BagProportionError, ClusterLabeller, ContinuousLabeller, ExhaustiveLabeller,
};
use crate::metrics::{accuracy, coverage, mean_absolute_error};
use crate::model::ClusterModel;
use crate::testing::blob_bags;
use crate::trainer::{ModelTrainer, Trainer, TrainerParams, WeightSearch};
use crate::Result;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

#[test]
fn three_bags_are_reconstructed() -> Result<()> {
    let data = blob_bags(&[0.2, 0.5, 0.8], 100, 11);
    assert_eq!(data.instances.nrows(), 300);

    let mut trainer = ModelTrainer::new(
        HierarchicalKmeans::new().with_branching(2),
        ContinuousLabeller::new(),
        WeightedEuclidean::unweighted(2)?,
        TrainerParams::new(2).with_max_iterations(4).with_seed(3),
    );
    let trained = trainer.train(&data.labels, data.instances.view(), &data.bags)?;
    assert_eq!(trained.model.n_clusters(), 2);

    let truth = data.labels.as_proportions().map(|p| p.to_vec()).unwrap_or_default();
    let predicted = trained.model.predict_bags(data.instances.view(), &data.bags, 3)?;
    for (y, p) in predicted.iter().zip(&truth) {
        assert!((y - p).abs() < 0.05, "bag prediction {y} vs {p}");
    }
    let instances = trained.model.predict_instances(data.instances.view())?;
    assert!(accuracy(instances.as_slice().unwrap_or(&[]), &data.truth, 0.5) > 0.95);
    Ok(())
}

/// Bag 0 sits around (0, 1), bag 2 around (1, 0), bag 1 is half of each.
#[test]
fn pure_and_mixed_bags_split_into_two_labelled_clusters() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(42);
    let noise = Normal::new(0.0, 0.05).unwrap();
    let mut x = Array2::zeros((300, 2));
    let mut bags = Vec::with_capacity(300);
    for row in 0..300 {
        let bag = row / 100;
        let positive = match bag {
            0 => true,
            1 => row % 2 == 0,
            _ => false,
        };
        let (cx, cy) = if positive { (0.0, 1.0) } else { (1.0, 0.0) };
        x[[row, 0]] = cx + noise.sample(&mut rng);
        x[[row, 1]] = cy + noise.sample(&mut rng);
        bags.push(bag);
    }
    let p = ndarray::array![1.0, 0.5, 0.0];
    let labels = BagLabels::Proportions(p.clone());

    let distance = WeightedEuclidean::unweighted(2)?;
    let clustering = HierarchicalKmeans::new()
        .with_branching(2)
        .with_init(CenterInit::KmeansPlusPlus)
        .cluster(x.view(), &distance, 2, &mut rng)?;
    assert_eq!(clustering.n_clusters(), 2);

    let c = normalized_co_occurrence(&bags, &clustering.indices, 3, 2)?;
    let labelling = ContinuousLabeller::new().label(&labels, c.view(), Array1::zeros(2).view())?;
    let mut sorted = labelling.labels.to_vec();
    sorted.sort_by(f64::total_cmp);
    assert!(sorted[0].abs() < 0.05, "low label {}", sorted[0]);
    assert!((sorted[1] - 1.0).abs() < 0.05, "high label {}", sorted[1]);

    let reconstructed = predict_proportions(c.view(), labelling.labels.view());
    for (y, target) in reconstructed.iter().zip(p.iter()) {
        assert!((y - target).abs() < 0.05, "bag prediction {y} vs {target}");
    }
    Ok(())
}

#[test]
fn cross_validation_predicts_every_bag() -> Result<()> {
    let data = blob_bags(&[0.1, 0.3, 0.5, 0.7, 0.9, 0.4], 40, 21);
    let mut trainer = ModelTrainer::new(
        HierarchicalKmeans::new()
            .with_branching(2)
            .with_init(CenterInit::KmeansPlusPlus),
        ContinuousLabeller::new(),
        WeightedEuclidean::unweighted(2)?,
        TrainerParams::new(2)
            .with_weight_search(WeightSearch::Fixed(1.0))
            .with_seed(8),
    );
    let cv = CrossValidator::new(CvParams::k_fold(3).with_shuffle(true).with_seed(5));
    let tester = BagCostTester::new(BagProportionError::default());
    let result = cv.run(
        &data.labels,
        data.instances.view(),
        &data.bags,
        &mut trainer,
        &tester,
    )?;

    assert_eq!(result.n_folds(), 3);
    assert_eq!(trainer.runs(), 3);
    assert!(result.test_losses.iter().all(|l| l.is_finite()));
    assert!(result.bag_predictions.iter().all(|&p| p != UNSET));
    assert!(result.instance_predictions.iter().all(|&p| p != UNSET));

    let predicted = result.bag_predictions.to_vec();
    let truth = data.labels.as_proportions().map(|p| p.to_vec()).unwrap_or_default();
    assert_eq!(coverage(&predicted), 1.0);
    assert!(mean_absolute_error(&predicted, &truth) < 0.05);
    Ok(())
}

/// Two 4-bin histograms per instance. Only the first separates the classes:
/// positives pile up in bin 0, negatives in bin 3. The second is near-uniform
/// noise.
fn histogram_bags(
    proportions: &[f64],
    per_bag: usize,
    seed: u64,
) -> (Array2<f64>, Vec<usize>, BagLabels) {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = proportions.len() * per_bag;
    let mut x = Array2::zeros((n, 8));
    let mut bags = Vec::with_capacity(n);
    let mut realized = Array1::zeros(proportions.len());

    for (b, &p) in proportions.iter().enumerate() {
        let positives = (p * per_bag as f64).round() as usize;
        realized[b] = positives as f64 / per_bag as f64;
        for i in 0..per_bag {
            let row = b * per_bag + i;
            let peak = if i < positives { 0 } else { 3 };
            for bin in 0..4 {
                let base = if bin == peak { 0.7 } else { 0.1 };
                x[[row, bin]] = base + rng.random_range(-0.02..0.02);
                x[[row, 4 + bin]] = 0.25 + rng.random_range(-0.05..0.05);
            }
            bags.push(b);
        }
    }
    (x, bags, BagLabels::Proportions(realized))
}

#[test]
fn histogram_features_with_exhaustive_labels() -> Result<()> {
    let (x, bags, labels) = histogram_bags(&[0.0, 0.6, 1.0, 0.3], 30, 4);
    let distance = WeightedHistogramDistance::equal_blocks(2, 4, 1.0)?;

    let mut trainer = ModelTrainer::new(
        HierarchicalKmeans::new()
            .with_branching(2)
            .with_init(CenterInit::KmeansPlusPlus),
        ExhaustiveLabeller::new(BagProportionError::default()),
        distance,
        TrainerParams::new(2)
            .with_weight_search(WeightSearch::Fixed(0.5))
            .with_seed(12),
    );
    let trained = trainer.train(&labels, x.view(), &bags)?;
    assert!(trained.loss < 1e-9);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("histograms.model");
    trained.model.save(&path)?;
    let loaded = ClusterModel::<WeightedHistogramDistance>::load(&path)?;
    assert_eq!(loaded.distance().bins(), &[4, 4]);
    assert_eq!(loaded.weights(), trained.model.weights());

    let before = trained.model.predict_bags(x.view(), &bags, 4)?;
    let after = loaded.predict_bags(x.view(), &bags, 4)?;
    assert_eq!(before, after);
    let truth = labels.as_proportions().map(|p| p.to_vec()).unwrap_or_default();
    assert!(mean_absolute_error(before.as_slice().unwrap_or(&[]), &truth) < 1e-9);
    Ok(())
}

#[test]
fn weight_search_on_histograms_stays_in_bounds() -> Result<()> {
    let (x, bags, labels) = histogram_bags(&[0.2, 0.9, 0.5], 20, 6);
    let mut trainer = ModelTrainer::new(
        HierarchicalKmeans::new().with_branching(2),
        ContinuousLabeller::new(),
        WeightedHistogramDistance::equal_blocks(2, 4, 1.0)?,
        TrainerParams::new(2)
            .with_bounds(0.0, 2.0, 1.0)
            .with_max_iterations(3)
            .with_seed(30),
    );
    let trained = trainer.train(&labels, x.view(), &bags)?;
    assert!(trained.loss.is_finite());
    assert!(trained
        .model
        .weights()
        .iter()
        .all(|&w| (0.0..=2.0).contains(&w)));
    Ok(())
}
