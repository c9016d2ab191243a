//! Training a [`ClusterModel`] from bag-level supervision.
//!
//! The objective of a weight vector `w` is the loss of the best cluster
//! labelling under the distance weighted by `w`:
//!
//! ```text
//! w ─▶ distance ─▶ cluster(k) ─▶ C (row-normalized) ─▶ label ─▶ loss
//! ```
//!
//! A box-constrained optimizer (CMA-ES by default) searches `w`. The final
//! model re-clusters with the best weights, either once or several times
//! keeping the lowest-loss run, since clustering is randomized.
//!
//! Inside the search a failed evaluation costs `+∞` so the optimizer can
//! route around bad regions. A failing optimizer aborts training.

use crate::bags::{check_membership, normalized_co_occurrence, BagLabels};
use crate::cluster::{Clusterer, Clustering};
use crate::distance::Distance;
use crate::error::{Error, Result};
use crate::labelling::{ClusterLabeller, Labelling};
use crate::model::ClusterModel;
use crate::optim::{BoxOptimizer, CmaEs, TraceWriter};
use ndarray::{Array1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// How distance weights are chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WeightSearch {
    /// Search the weight box with the optimizer.
    Optimize,
    /// Use this value for every weight and skip the search.
    Fixed(f64),
}

/// How the final model is built from the chosen weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModelBuild {
    /// Cluster once.
    SingleShot,
    /// Cluster `n` times and keep the lowest loss.
    BestOf(usize),
}

impl ModelBuild {
    fn runs(self) -> usize {
        match self {
            ModelBuild::SingleShot => 1,
            ModelBuild::BestOf(n) => n.max(1),
        }
    }
}

/// Trainer configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainerParams {
    /// Requested number of clusters.
    pub k: usize,
    /// Searched or fixed distance weights.
    pub weight_search: WeightSearch,
    /// Single or best-of-n final clustering.
    pub model_build: ModelBuild,
    /// Initial CMA-ES step size; derived from the bounds when `None`.
    pub sigma: Option<f64>,
    /// CMA-ES offspring per generation; derived from the dimension when `None`.
    pub population: Option<usize>,
    /// Generation cap; left to the optimizer when `None`.
    pub max_iterations: Option<usize>,
    /// Seed for every random choice of a `train` call. Fresh entropy when `None`.
    pub seed: Option<u64>,
    /// Smallest weight the search may try.
    pub lower_bound: f64,
    /// Largest weight the search may try.
    pub upper_bound: f64,
    /// Starting point of the search, the same for every weight.
    pub initial_weight: f64,
    /// Record every objective evaluation in [`Trace`].
    pub trace: bool,
    /// Write `<prefix>_cmaes_trace_<n>.dat` and `<prefix>_<n>.model` per run.
    pub output_prefix: Option<PathBuf>,
}

impl Default for TrainerParams {
    fn default() -> Self {
        Self {
            k: 32,
            weight_search: WeightSearch::Optimize,
            model_build: ModelBuild::BestOf(10),
            sigma: None,
            population: None,
            max_iterations: None,
            seed: None,
            lower_bound: 0.0,
            upper_bound: 1.0,
            initial_weight: 0.5,
            trace: false,
            output_prefix: None,
        }
    }
}

impl TrainerParams {
    /// Defaults with `k` clusters.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    /// Search the weights or fix them.
    pub fn with_weight_search(mut self, weight_search: WeightSearch) -> Self {
        self.weight_search = weight_search;
        self
    }

    /// How many final clusterings to try.
    pub fn with_model_build(mut self, model_build: ModelBuild) -> Self {
        self.model_build = model_build;
        self
    }

    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = Some(sigma);
        self
    }

    pub fn with_population(mut self, population: usize) -> Self {
        self.population = Some(population);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Make `train` deterministic.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Weight box and starting weight.
    pub fn with_bounds(mut self, lower: f64, upper: f64, initial: f64) -> Self {
        self.lower_bound = lower;
        self.upper_bound = upper;
        self.initial_weight = initial;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_output_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.output_prefix = Some(prefix.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::InvalidClusterCount {
                requested: 0,
                reason: "at least one cluster is needed".into(),
            });
        }
        let (lo, hi, x0) = (self.lower_bound, self.upper_bound, self.initial_weight);
        if !(lo.is_finite() && hi.is_finite() && x0.is_finite()) || lo < 0.0 || lo > hi {
            return Err(Error::InvalidParameter {
                name: "bounds",
                message: "need finite 0 <= lower <= upper",
            });
        }
        if x0 < lo || x0 > hi {
            return Err(Error::InvalidParameter {
                name: "initial_weight",
                message: "must lie within the bounds",
            });
        }
        if let WeightSearch::Fixed(w) = self.weight_search {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::InvalidParameter {
                    name: "weight_search",
                    message: "fixed weight must be finite and non-negative",
                });
            }
        }
        Ok(())
    }

    fn optimizer(&self) -> CmaEs {
        let mut cma = CmaEs::new();
        if let Some(sigma) = self.sigma {
            cma = cma.with_sigma(sigma);
        }
        if let Some(population) = self.population {
            cma = cma.with_population(population);
        }
        if let Some(max_iterations) = self.max_iterations {
            cma = cma.with_max_iterations(max_iterations);
        }
        cma
    }
}

/// Every objective evaluation of the traced `train` calls.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    /// Clustering of each evaluation.
    pub clusterings: Vec<Clustering>,
    /// Cluster labels chosen for each clustering.
    pub labellings: Vec<Array1<f64>>,
    /// Loss of each evaluation; failed labellings count as `+∞`.
    pub losses: Vec<f64>,
}

impl Trace {
    /// Number of recorded evaluations.
    pub fn len(&self) -> usize {
        self.losses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.losses.is_empty()
    }

    pub fn clear(&mut self) {
        self.clusterings.clear();
        self.labellings.clear();
        self.losses.clear();
    }
}

/// A trained model and its training loss.
#[derive(Debug, Clone)]
pub struct Trained<M> {
    pub loss: f64,
    pub model: M,
}

/// Anything that turns bag-labelled instances into a model.
pub trait Trainer {
    type Model;

    fn train(
        &mut self,
        bag_labels: &BagLabels,
        instances: ArrayView2<'_, f64>,
        bags: &[usize],
    ) -> Result<Trained<Self::Model>>;
}

/// Training inputs shared by every objective evaluation.
#[derive(Clone, Copy)]
struct Problem<'a> {
    bag_labels: &'a BagLabels,
    instances: ArrayView2<'a, f64>,
    bags: &'a [usize],
}

/// Cluster, label, and score one weighting.
fn evaluate<C, L, D, R>(
    clusterer: &C,
    labeller: &L,
    k: usize,
    distance: &D,
    problem: Problem<'_>,
    rng: &mut R,
) -> Result<(Clustering, Labelling)>
where
    C: Clusterer,
    L: ClusterLabeller,
    D: Distance,
    R: Rng + ?Sized,
{
    let clustering = clusterer.cluster(problem.instances, distance, k, rng)?;
    let n_clusters = clustering.n_clusters();
    let c = normalized_co_occurrence(
        problem.bags,
        &clustering.indices,
        problem.bag_labels.n_bags(),
        n_clusters,
    )?;
    let initial = Array1::zeros(n_clusters);
    let labelling = labeller.label(problem.bag_labels, c.view(), initial.view())?;
    Ok((clustering, labelling))
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(prefix.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Clusterer + labeller + weight search.
#[derive(Debug, Clone)]
pub struct ModelTrainer<C, L, D, O = CmaEs> {
    clusterer: C,
    labeller: L,
    distance: D,
    optimizer: O,
    params: TrainerParams,
    trace: Trace,
    runs: usize,
}

impl<C, L, D> ModelTrainer<C, L, D>
where
    C: Clusterer,
    L: ClusterLabeller,
    D: Distance,
{
    /// `distance` fixes the feature layout; its weights are replaced during
    /// training.
    pub fn new(clusterer: C, labeller: L, distance: D, params: TrainerParams) -> Self {
        let optimizer = params.optimizer();
        Self {
            clusterer,
            labeller,
            distance,
            optimizer,
            params,
            trace: Trace::default(),
            runs: 0,
        }
    }
}

impl<C, L, D, O> ModelTrainer<C, L, D, O>
where
    C: Clusterer,
    L: ClusterLabeller,
    D: Distance,
    O: BoxOptimizer,
{
    /// Swap the weight-search backend.
    pub fn with_optimizer<P: BoxOptimizer>(self, optimizer: P) -> ModelTrainer<C, L, D, P> {
        ModelTrainer {
            clusterer: self.clusterer,
            labeller: self.labeller,
            distance: self.distance,
            optimizer,
            params: self.params,
            trace: self.trace,
            runs: self.runs,
        }
    }

    /// Current configuration.
    pub fn params(&self) -> &TrainerParams {
        &self.params
    }

    /// Optimizer settings (`sigma`, `population`, `max_iterations`) were
    /// read in [`ModelTrainer::new`]; changing them here has no effect.
    pub fn params_mut(&mut self) -> &mut TrainerParams {
        &mut self.params
    }

    pub fn clusterer_mut(&mut self) -> &mut C {
        &mut self.clusterer
    }

    /// Evaluations recorded while `trace` was on.
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn clear_trace(&mut self) {
        self.trace.clear();
    }

    /// Number of `train` calls so far.
    pub fn runs(&self) -> usize {
        self.runs
    }

    fn check_inputs(
        &self,
        bag_labels: &BagLabels,
        instances: ArrayView2<'_, f64>,
        bags: &[usize],
    ) -> Result<()> {
        self.params.validate()?;
        self.clusterer.check_k(self.params.k)?;
        bag_labels.validate()?;
        if instances.nrows() == 0 {
            return Err(Error::EmptyInput);
        }
        check_membership(bags, instances.nrows(), bag_labels.n_bags())?;
        if self.distance.dim() != instances.ncols() {
            return Err(Error::DimensionMismatch {
                expected: self.distance.dim(),
                found: instances.ncols(),
            });
        }
        Ok(())
    }

    /// Run the weight search and return the best weights.
    fn search_weights(&mut self, problem: Problem<'_>, rng: &mut StdRng) -> Result<Array1<f64>> {
        let n_weights = self.distance.weights().len();
        let initial = Array1::from_elem(n_weights, self.params.initial_weight);
        let lower = Array1::from_elem(n_weights, self.params.lower_bound);
        let upper = Array1::from_elem(n_weights, self.params.upper_bound);

        let mut trace_file = match &self.params.output_prefix {
            Some(prefix) => {
                let path = with_suffix(prefix, &format!("_cmaes_trace_{}.dat", self.runs));
                info!(path = %path.display(), "tracing weight search");
                match TraceWriter::create(&path) {
                    Ok(writer) => Some(writer),
                    Err(err) => {
                        warn!(path = %path.display(), %err, "cannot create trace file");
                        None
                    }
                }
            }
            None => None,
        };

        let mut cluster_rng = StdRng::from_rng(rng);
        let k = self.params.k;
        let record = self.params.trace;
        let clusterer = &self.clusterer;
        let labeller = &self.labeller;
        let template = &self.distance;
        let trace = &mut self.trace;

        let outcome = self.optimizer.minimize(
            |w| {
                let distance = match template.with_weights(&w.to_vec()) {
                    Ok(d) => d,
                    Err(err) => {
                        warn!(%err, "rejected weight vector");
                        return f64::INFINITY;
                    }
                };
                match evaluate(clusterer, labeller, k, &distance, problem, &mut cluster_rng) {
                    Ok((clustering, labelling)) => {
                        let loss = if labelling.loss.is_nan() {
                            f64::INFINITY
                        } else {
                            labelling.loss
                        };
                        if record {
                            trace.clusterings.push(clustering);
                            trace.labellings.push(labelling.labels);
                            trace.losses.push(loss);
                        }
                        loss
                    }
                    Err(err) => {
                        warn!(%err, "objective evaluation failed");
                        f64::INFINITY
                    }
                }
            },
            initial.view(),
            lower.view(),
            upper.view(),
            rng,
            |progress| {
                debug!(
                    iteration = progress.iteration,
                    best_loss = progress.best_f,
                    sigma = progress.sigma,
                    "weight search progress"
                );
                if let Some(writer) = trace_file.as_mut() {
                    if let Err(err) = writer.record(progress) {
                        warn!(%err, "stopped writing trace file");
                        trace_file = None;
                    }
                }
            },
        );

        if let Some(writer) = trace_file {
            if let Err(err) = writer.finish() {
                warn!(%err, "cannot flush trace file");
            }
        }
        if outcome.stop.is_failure() {
            let code = outcome.status();
            error!(code, "weight search failed");
            return Err(Error::OptimizerFailure { code });
        }
        info!(
            iterations = outcome.iterations,
            evaluations = outcome.evaluations,
            best_loss = outcome.best_f,
            "weight search finished"
        );
        Ok(outcome.best_x)
    }
}

impl<C, L, D, O> Trainer for ModelTrainer<C, L, D, O>
where
    C: Clusterer,
    L: ClusterLabeller,
    D: Distance,
    O: BoxOptimizer,
{
    type Model = ClusterModel<D>;

    fn train(
        &mut self,
        bag_labels: &BagLabels,
        instances: ArrayView2<'_, f64>,
        bags: &[usize],
    ) -> Result<Trained<ClusterModel<D>>> {
        self.check_inputs(bag_labels, instances, bags)?;
        self.runs += 1;
        info!(
            run = self.runs,
            n_instances = instances.nrows(),
            n_bags = bag_labels.n_bags(),
            k = self.params.k,
            "training cluster model"
        );

        let mut rng = match self.params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        let problem = Problem {
            bag_labels,
            instances: instances.reborrow(),
            bags,
        };
        let weights = match self.params.weight_search {
            WeightSearch::Fixed(w) => Array1::from_elem(self.distance.weights().len(), w),
            WeightSearch::Optimize => self.search_weights(problem, &mut rng)?,
        };
        let distance = self.distance.with_weights(&weights.to_vec())?;

        let mut best: Option<(Clustering, Labelling)> = None;
        for run in 0..self.params.model_build.runs() {
            let (clustering, labelling) = evaluate(
                &self.clusterer,
                &self.labeller,
                self.params.k,
                &distance,
                problem,
                &mut rng,
            )?;
            debug!(run, loss = labelling.loss, n_clusters = clustering.n_clusters(), "final clustering");
            let better = best
                .as_ref()
                .map_or(true, |(_, b)| labelling.loss < b.loss);
            if better {
                best = Some((clustering, labelling));
            }
        }
        let Some((clustering, labelling)) = best else {
            return Err(Error::invalid("no final clustering was produced"));
        };

        let mut model = ClusterModel::new(clustering.centers, labelling.labels, distance)?;
        model.build()?;

        if let Some(prefix) = &self.params.output_prefix {
            let path = with_suffix(prefix, &format!("_{}.model", self.runs));
            if let Err(err) = model.save(&path) {
                warn!(path = %path.display(), %err, "cannot write model");
            }
        }

        info!(loss = labelling.loss, n_clusters = model.n_clusters(), "training finished");
        Ok(Trained {
            loss: labelling.loss,
            model,
        })
    }
}
