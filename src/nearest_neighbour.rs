//! k-nearest-neighbour baseline.
//!
//! Every training instance inherits its bag's label as its own; a query
//! instance gets the mean label of its `k` nearest training instances, and a
//! bag the mean over its instances. There is no clustering and no weight
//! search, so it serves as a yardstick for [`ClusterModel`].
//!
//! Interval labels are reduced to their midpoints.
//!
//! [`ClusterModel`]: crate::model::ClusterModel

use crate::bags::{check_membership, BagLabels};
use crate::cluster::NearestCenterIndex;
use crate::cross_validation::finite_bag_cost;
use crate::distance::Distance;
use crate::error::{Error, Result};
use crate::labelling::CostFunction;
use crate::model::BagPredictor;
use crate::trainer::{Trained, Trainer};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use tracing::info;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Labelled training instances searched by brute force.
#[derive(Debug, Clone)]
pub struct NearestNeighbourModel<D> {
    index: NearestCenterIndex<D>,
    labels: Array1<f64>,
    k: usize,
}

impl<D: Distance> NearestNeighbourModel<D> {
    /// `labels` needs one entry per row of `instances`; `k ≥ 1`.
    pub fn new(instances: Array2<f64>, labels: Array1<f64>, distance: D, k: usize) -> Result<Self> {
        if k == 0 {
            return Err(Error::InvalidParameter {
                name: "k",
                message: "must be at least 1",
            });
        }
        if labels.len() != instances.nrows() {
            return Err(Error::DimensionMismatch {
                expected: instances.nrows(),
                found: labels.len(),
            });
        }
        let index = NearestCenterIndex::new(instances, distance)?;
        Ok(Self { index, labels, k })
    }

    /// Neighbours averaged per prediction.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Training instances, one per row.
    pub fn instances(&self) -> &Array2<f64> {
        self.index.centers()
    }

    /// Label of every training instance.
    pub fn labels(&self) -> &Array1<f64> {
        &self.labels
    }

    /// Distance the neighbours are searched with.
    pub fn distance(&self) -> &D {
        self.index.distance()
    }

    /// Mean label of the `k` training instances nearest to `query`. Uses
    /// every training instance when there are fewer than `k`.
    fn predict_one(&self, query: ArrayView1<'_, f64>) -> f64 {
        let hits = self.index.k_nearest(query, self.k);
        let total: f64 = hits.iter().map(|&(i, _)| self.labels[i]).sum();
        total / hits.len() as f64
    }
}

impl<D: Distance> BagPredictor for NearestNeighbourModel<D> {
    fn predict_instances(&self, instances: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let dim = self.index.centers().ncols();
        if instances.ncols() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                found: instances.ncols(),
            });
        }

        #[cfg(feature = "parallel")]
        let predictions: Vec<f64> = (0..instances.nrows())
            .into_par_iter()
            .map(|i| self.predict_one(instances.row(i)))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let predictions: Vec<f64> = instances
            .outer_iter()
            .map(|row| self.predict_one(row))
            .collect();

        Ok(Array1::from(predictions))
    }
}

/// Builds a [`NearestNeighbourModel`] with every distance weight set to one
/// value.
#[derive(Debug, Clone)]
pub struct NearestNeighbourTrainer<D, C> {
    distance: D,
    k: usize,
    weight: f64,
    cost: C,
    runs: usize,
}

impl<D: Distance, C: CostFunction> NearestNeighbourTrainer<D, C> {
    /// `k` neighbours, weights of `0.5`, training loss measured with `cost`.
    pub fn new(distance: D, k: usize, cost: C) -> Self {
        Self {
            distance,
            k,
            weight: 0.5,
            cost,
            runs: 0,
        }
    }

    /// Value of every distance weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Number of successful `train` calls so far.
    pub fn runs(&self) -> usize {
        self.runs
    }
}

impl<D: Distance, C: CostFunction> Trainer for NearestNeighbourTrainer<D, C> {
    type Model = NearestNeighbourModel<D>;

    fn train(
        &mut self,
        bag_labels: &BagLabels,
        instances: ArrayView2<'_, f64>,
        bags: &[usize],
    ) -> Result<Trained<NearestNeighbourModel<D>>> {
        bag_labels.validate()?;
        if instances.nrows() == 0 {
            return Err(Error::EmptyInput);
        }
        let n_bags = bag_labels.n_bags();
        check_membership(bags, instances.nrows(), n_bags)?;

        let targets = bag_labels.targets();
        let labels: Array1<f64> = bags.iter().map(|&b| targets[b]).collect();
        let weights = vec![self.weight; self.distance.weights().len()];
        let distance = self.distance.with_weights(&weights)?;
        let model = NearestNeighbourModel::new(instances.to_owned(), labels, distance, self.k)?;

        let predicted = model.predict_bags(instances, bags, n_bags)?;
        let loss = finite_bag_cost(&self.cost, bag_labels, predicted.view())?;
        self.runs += 1;
        info!(
            run = self.runs,
            n_instances = instances.nrows(),
            k = self.k,
            loss,
            "trained nearest-neighbour model"
        );
        Ok(Trained { loss, model })
    }
}
