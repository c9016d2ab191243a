//! # bagwise
//!
//! Learning from label proportions: train an instance classifier when only
//! bag-level labels are known.
//!
//! Instances are grouped into bags, and each bag carries either the fraction
//! of positive instances it contains or an interval bounding that fraction.
//! `bagwise` clusters the instances, labels each cluster so that the
//! predicted bag labels match the known ones, and searches the weights of the
//! clustering distance to minimize that mismatch.
//!
//! ```text
//! weights ─▶ distance ─▶ hierarchical k-means ─▶ bag × cluster matrix ─▶ labeller ─▶ loss
//!    ▲                                                                                │
//!    └──────────────────────────────────── CMA-ES ◀───────────────────────────────────┘
//! ```
//!
//! | Module | Provides |
//! |--------|----------|
//! | [`distance`] | weighted histogram (EMD) and weighted Euclidean distances |
//! | [`bags`] | bag labels, co-occurrence matrices, validated datasets |
//! | [`cluster`] | branching hierarchical k-means, nearest-center index |
//! | [`labelling`] | continuous, exhaustive and greedy cluster labellers |
//! | [`optim`] | bounded least squares and CMA-ES |
//! | [`trainer`] | [`ModelTrainer`] |
//! | [`model`] | [`ClusterModel`] with text persistence |
//! | [`nearest_neighbour`] | k-nearest-neighbour baseline |
//! | [`cross_validation`] | bag-level k-fold and leave-p-out |
//! | [`metrics`], [`io`] | evaluation and plain-text files |
//!
//! # Example
//!
//! ```rust
//! use bagwise::cluster::CenterInit;
//! use bagwise::{
//!     BagLabels, ContinuousLabeller, HierarchicalKmeans, ModelTrainer, Trainer, TrainerParams,
//!     WeightSearch, WeightedEuclidean,
//! };
//! use ndarray::array;
//!
//! let instances = array![[0.0, 0.1], [0.1, 0.0], [5.0, 5.1], [5.1, 5.0]];
//! let bags = [0, 0, 1, 1];
//! let labels = BagLabels::Proportions(array![0.0, 1.0]);
//!
//! let params = TrainerParams::new(2)
//!     .with_weight_search(WeightSearch::Fixed(1.0))
//!     .with_seed(7);
//! let mut trainer = ModelTrainer::new(
//!     HierarchicalKmeans::new()
//!         .with_branching(2)
//!         .with_init(CenterInit::KmeansPlusPlus),
//!     ContinuousLabeller::new(),
//!     WeightedEuclidean::unweighted(2)?,
//!     params,
//! );
//! let trained = trainer.train(&labels, instances.view(), &bags)?;
//! let predicted = trained.model.predict_bags(instances.view(), &bags, 2)?;
//! assert!(predicted[0] < 1e-3);
//! assert!((predicted[1] - 1.0).abs() < 1e-3);
//! # Ok::<(), bagwise::Error>(())
//! ```

pub mod bags;
pub mod cluster;
pub mod cross_validation;
pub mod distance;
/// Error types used across `bagwise`.
pub mod error;
pub mod io;
pub mod labelling;
pub mod metrics;
pub mod model;
pub mod nearest_neighbour;
pub mod optim;
pub mod trainer;

#[cfg(test)]
mod pipeline_tests;
#[cfg(test)]
mod testing;

pub use bags::{BagDataset, BagLabels};
pub use cluster::{realized_k, Clusterer, Clustering, HierarchicalKmeans, Kmeans};
pub use cross_validation::{
    BagCostTester, CrossValidator, CvParams, CvResult, CvScheme, Tester, UNSET,
};
pub use distance::{Distance, WeightedEuclidean, WeightedHistogramDistance};
pub use error::{Error, Result};
pub use labelling::{
    BagProportionError, ClusterLabeller, ContinuousLabeller, CostFunction, ExhaustiveLabeller,
    GreedyLabeller, IntervalAbsoluteError, IntervalSquaredError, Labelling,
};
pub use model::{BagPredictor, ClusterModel};
pub use nearest_neighbour::{NearestNeighbourModel, NearestNeighbourTrainer};
pub use optim::{BoundedLeastSquares, BoxOptimizer, CmaEs, ProjectedLevenbergMarquardt};
pub use trainer::{ModelBuild, ModelTrainer, Trainer, TrainerParams, WeightSearch};
