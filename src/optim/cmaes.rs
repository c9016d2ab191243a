//! Separable CMA-ES with box constraints.
//!
//! Covariance Matrix Adaptation Evolution Strategy restricted to a diagonal
//! covariance (Ros & Hansen, 2008). The outer search space here is a handful
//! of distance weights whose objective is noisy and expensive, so the
//! diagonal variant's faster learning rates matter more than rotation
//! invariance.
//!
//! # Bounds
//!
//! The strategy samples in an unbounded space and maps every candidate into
//! the box with [`BoxTransform`]: identity in the interior, quadratic near the
//! bounds, periodic outside. The objective only ever sees feasible points.
//!
//! # Status codes
//!
//! Positive codes are normal stops, negative codes are failures:
//!
//! | code | meaning |
//! |------|---------|
//! | 1 | function values stalled (`tol_fun`) |
//! | 2 | step size collapsed (`tol_x`) |
//! | 3 | iteration budget exhausted |
//! | -1 | zero dimension or inconsistent bounds |
//! | -2 | invalid step size or population |
//! | -3 | objective returned NaN |

use ndarray::{Array1, ArrayView1, Zip};
use rand::Rng;
use rand_distr::StandardNormal;
use std::collections::VecDeque;
use tracing::debug;

/// Why the optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TolFun,
    TolX,
    MaxIterations,
    InvalidProblem,
    InvalidSettings,
    NanObjective,
}

impl StopReason {
    /// Signed status code; negative means failure.
    pub fn code(self) -> i32 {
        match self {
            StopReason::TolFun => 1,
            StopReason::TolX => 2,
            StopReason::MaxIterations => 3,
            StopReason::InvalidProblem => -1,
            StopReason::InvalidSettings => -2,
            StopReason::NanObjective => -3,
        }
    }

    pub fn is_failure(self) -> bool {
        self.code() < 0
    }
}

/// Snapshot handed to the progress observer once per generation.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    pub iteration: usize,
    pub evaluations: usize,
    pub sigma: f64,
    pub best_f: f64,
    pub best_x: ArrayView1<'a, f64>,
}

/// Result of a bounded minimization.
#[derive(Debug, Clone)]
pub struct BoxOutcome {
    /// Best feasible point seen.
    pub best_x: Array1<f64>,
    /// Objective value at `best_x`.
    pub best_f: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub stop: StopReason,
}

impl BoxOutcome {
    /// Signed status code of [`BoxOutcome::stop`].
    pub fn status(&self) -> i32 {
        self.stop.code()
    }

    fn failed(stop: StopReason, initial: ArrayView1<'_, f64>) -> Self {
        Self {
            best_x: initial.to_owned(),
            best_f: f64::INFINITY,
            iterations: 0,
            evaluations: 0,
            stop,
        }
    }
}

/// Derivative-free minimizer over a box.
pub trait BoxOptimizer {
    /// Minimize `objective` over `lower ≤ x ≤ upper` starting from `initial`.
    ///
    /// `observer` is called after every generation.
    fn minimize<F, O, R>(
        &self,
        objective: F,
        initial: ArrayView1<'_, f64>,
        lower: ArrayView1<'_, f64>,
        upper: ArrayView1<'_, f64>,
        rng: &mut R,
        observer: O,
    ) -> BoxOutcome
    where
        F: FnMut(ArrayView1<'_, f64>) -> f64,
        O: FnMut(&Progress<'_>),
        R: Rng + ?Sized;
}

/// Linear/quadratic periodic map from `ℝ` onto `[lower, upper]`.
#[derive(Debug, Clone)]
pub struct BoxTransform {
    lower: Array1<f64>,
    upper: Array1<f64>,
}

impl BoxTransform {
    /// Bounds must have equal length and `lower ≤ upper`; the caller checks.
    pub fn new(lower: ArrayView1<'_, f64>, upper: ArrayView1<'_, f64>) -> Self {
        Self {
            lower: lower.to_owned(),
            upper: upper.to_owned(),
        }
    }

    /// Widths of the quadratic regions at the lower and upper bound.
    fn margins(lb: f64, ub: f64) -> (f64, f64) {
        let half = (ub - lb) / 2.0;
        let al = half.min((1.0 + lb.abs()) / 20.0);
        let au = half.min((1.0 + ub.abs()) / 20.0);
        (al, au)
    }

    fn map_one(x: f64, lb: f64, ub: f64) -> f64 {
        if ub <= lb {
            return lb;
        }
        let (al, au) = Self::margins(lb, ub);
        let width = ub - lb;
        let xlow = lb - 2.0 * al - width / 2.0;
        let xup = ub + 2.0 * au + width / 2.0;
        let r = 2.0 * (width + al + au);

        let mut x = x;
        if x < xlow {
            x += r * (1.0 + ((xlow - x) / r).floor());
        }
        if x > xup {
            x -= r * (1.0 + ((x - xup) / r).floor());
        }
        if x < lb - al {
            x += 2.0 * (lb - al - x);
        }
        if x > ub + au {
            x -= 2.0 * (x - ub - au);
        }

        let y = if x < lb + al {
            lb + (x - (lb - al)).powi(2) / (4.0 * al)
        } else if x > ub - au {
            ub - (x - (ub + au)).powi(2) / (4.0 * au)
        } else {
            x
        };
        y.clamp(lb, ub)
    }

    fn unmap_one(y: f64, lb: f64, ub: f64) -> f64 {
        if ub <= lb {
            return lb;
        }
        let (al, au) = Self::margins(lb, ub);
        let y = y.clamp(lb, ub);
        if y < lb + al {
            (lb - al) + 2.0 * (al * (y - lb)).sqrt()
        } else if y > ub - au {
            (ub + au) - 2.0 * (au * (ub - y)).sqrt()
        } else {
            y
        }
    }

    /// Feasible image of a genotype.
    pub fn map(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        Zip::from(x)
            .and(&self.lower)
            .and(&self.upper)
            .map_collect(|&x, &lb, &ub| Self::map_one(x, lb, ub))
    }

    /// A genotype that maps onto `y`.
    pub fn unmap(&self, y: ArrayView1<'_, f64>) -> Array1<f64> {
        Zip::from(y)
            .and(&self.lower)
            .and(&self.upper)
            .map_collect(|&y, &lb, &ub| Self::unmap_one(y, lb, ub))
    }
}

/// Separable CMA-ES.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CmaEs {
    sigma: Option<f64>,
    population: Option<usize>,
    max_iterations: Option<usize>,
    tol_fun: f64,
    tol_x: f64,
}

impl Default for CmaEs {
    fn default() -> Self {
        Self::new()
    }
}

impl CmaEs {
    /// Default step size, population and budget are derived from the problem.
    pub fn new() -> Self {
        Self {
            sigma: None,
            population: None,
            max_iterations: None,
            tol_fun: 1e-12,
            tol_x: 1e-11,
        }
    }

    /// Initial step size. Defaults to `0.3 · mean(upper − lower)`.
    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = Some(sigma);
        self
    }

    /// Offspring per generation. Defaults to `4 + ⌊3 ln n⌋`.
    pub fn with_population(mut self, population: usize) -> Self {
        self.population = Some(population);
        self
    }

    /// Generation cap. Defaults to `100 + 150 (n + 3)² / √λ`.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Stop when recent function values span less than this.
    pub fn with_tol_fun(mut self, tol: f64) -> Self {
        self.tol_fun = tol;
        self
    }

    /// Stop when every coordinate's step falls below this.
    pub fn with_tol_x(mut self, tol: f64) -> Self {
        self.tol_x = tol;
        self
    }

    /// Population size used for an `n`-dimensional problem.
    pub fn population_for(&self, n: usize) -> usize {
        self.population
            .unwrap_or_else(|| 4 + (3.0 * (n.max(1) as f64).ln()).floor() as usize)
    }

    /// Generation cap used for an `n`-dimensional problem.
    pub fn max_iterations_for(&self, n: usize) -> usize {
        self.max_iterations.unwrap_or_else(|| {
            let lambda = self.population_for(n) as f64;
            100 + (150.0 * ((n + 3) as f64).powi(2) / lambda.sqrt()) as usize
        })
    }
}

/// Strategy constants for one run.
struct Constants {
    lambda: usize,
    weights: Vec<f64>,
    mueff: f64,
    cc: f64,
    cs: f64,
    c1: f64,
    cmu: f64,
    damps: f64,
    chin: f64,
}

impl Constants {
    fn new(n: usize, lambda: usize) -> Self {
        let nf = n as f64;
        let mu = lambda / 2;
        let raw: Vec<f64> = (0..mu)
            .map(|i| (mu as f64 + 0.5).ln() - ((i + 1) as f64).ln())
            .collect();
        let total: f64 = raw.iter().sum();
        let weights: Vec<f64> = raw.iter().map(|w| w / total).collect();
        let mueff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let cc = (4.0 + mueff / nf) / (nf + 4.0 + 2.0 * mueff / nf);
        let cs = (mueff + 2.0) / (nf + mueff + 5.0);
        let c1_full = 2.0 / ((nf + 1.3).powi(2) + mueff);
        let cmu_full =
            (1.0 - c1_full).min(2.0 * (mueff - 2.0 + 1.0 / mueff) / ((nf + 2.0).powi(2) + mueff));
        // Diagonal-only learning can afford larger rates.
        let boost = (nf + 2.0) / 3.0;
        let c1 = (c1_full * boost).min(1.0);
        let cmu = (cmu_full * boost).min(1.0 - c1);
        let damps = 1.0 + 2.0 * (((mueff - 1.0) / (nf + 1.0)).sqrt() - 1.0).max(0.0) + cs;
        let chin = nf.sqrt() * (1.0 - 1.0 / (4.0 * nf) + 1.0 / (21.0 * nf * nf));

        Self {
            lambda,
            weights,
            mueff,
            cc,
            cs,
            c1,
            cmu,
            damps,
            chin,
        }
    }
}

impl BoxOptimizer for CmaEs {
    fn minimize<F, O, R>(
        &self,
        mut objective: F,
        initial: ArrayView1<'_, f64>,
        lower: ArrayView1<'_, f64>,
        upper: ArrayView1<'_, f64>,
        rng: &mut R,
        mut observer: O,
    ) -> BoxOutcome
    where
        F: FnMut(ArrayView1<'_, f64>) -> f64,
        O: FnMut(&Progress<'_>),
        R: Rng + ?Sized,
    {
        let n = initial.len();
        if n == 0 || lower.len() != n || upper.len() != n {
            return BoxOutcome::failed(StopReason::InvalidProblem, initial);
        }
        if Zip::from(lower)
            .and(upper)
            .fold(false, |bad, &lo, &hi| bad || !(lo <= hi) || !lo.is_finite() || !hi.is_finite())
        {
            return BoxOutcome::failed(StopReason::InvalidProblem, initial);
        }

        let lambda = self.population_for(n);
        let sigma0 = self
            .sigma
            .unwrap_or_else(|| 0.3 * (&upper - &lower).mean().unwrap_or(1.0));
        if lambda < 2 || !(sigma0 > 0.0) || !sigma0.is_finite() {
            return BoxOutcome::failed(StopReason::InvalidSettings, initial);
        }

        let k = Constants::new(n, lambda);
        let max_iterations = self.max_iterations_for(n);
        let history_len = 10 + (30.0 * n as f64 / lambda as f64).ceil() as usize;
        let tol_x = self.tol_x * sigma0;

        let transform = BoxTransform::new(lower, upper);
        let mut mean = transform.unmap(initial);
        let mut sigma = sigma0;
        let mut diag_c = Array1::<f64>::ones(n);
        let mut pc = Array1::<f64>::zeros(n);
        let mut ps = Array1::<f64>::zeros(n);

        let mut best_x = transform.map(mean.view());
        let mut best_f = f64::INFINITY;
        let mut evaluations = 0;
        let mut history: VecDeque<f64> = VecDeque::with_capacity(history_len);
        let mut stop = StopReason::MaxIterations;
        let mut iteration = 0;

        while iteration < max_iterations {
            iteration += 1;

            // Sample and evaluate.
            let sqrt_c = diag_c.mapv(f64::sqrt);
            let mut offspring: Vec<(f64, Array1<f64>)> = Vec::with_capacity(lambda);
            for _ in 0..lambda {
                let z: Array1<f64> = (0..n).map(|_| rng.sample::<f64, _>(StandardNormal)).collect();
                let y = &sqrt_c * &z;
                let genotype = &mean + &(sigma * &y);
                let phenotype = transform.map(genotype.view());
                let f = objective(phenotype.view());
                evaluations += 1;
                if f.is_nan() {
                    debug!(iteration, evaluations, "objective returned NaN");
                    return BoxOutcome {
                        best_x,
                        best_f,
                        iterations: iteration,
                        evaluations,
                        stop: StopReason::NanObjective,
                    };
                }
                if f < best_f {
                    best_f = f;
                    best_x = phenotype;
                }
                offspring.push((f, y));
            }
            offspring.sort_by(|a, b| a.0.total_cmp(&b.0));

            // Recombination.
            let mut y_w = Array1::<f64>::zeros(n);
            for (w, (_, y)) in k.weights.iter().zip(offspring.iter()) {
                y_w.scaled_add(*w, y);
            }
            mean.scaled_add(sigma, &y_w);

            // Step-size path.
            let cs_norm = (k.cs * (2.0 - k.cs) * k.mueff).sqrt();
            ps = &ps * (1.0 - k.cs) + &((&y_w / &sqrt_c) * cs_norm);
            let ps_norm = ps.dot(&ps).sqrt();
            let decay = 1.0 - (1.0 - k.cs).powi(2 * iteration as i32);
            let hsig = ps_norm / decay.sqrt() / k.chin < 1.4 + 2.0 / (n as f64 + 1.0);

            // Covariance path and diagonal update.
            let cc_norm = (k.cc * (2.0 - k.cc) * k.mueff).sqrt();
            pc = &pc * (1.0 - k.cc);
            if hsig {
                pc.scaled_add(cc_norm, &y_w);
            }
            let correction = if hsig { 0.0 } else { k.c1 * k.cc * (2.0 - k.cc) };
            let mut rank_mu = Array1::<f64>::zeros(n);
            for (w, (_, y)) in k.weights.iter().zip(offspring.iter()) {
                rank_mu.scaled_add(*w, &y.mapv(|v| v * v));
            }
            diag_c = &diag_c * (1.0 - k.c1 - k.cmu + correction)
                + &(pc.mapv(|v| v * v) * k.c1)
                + &(rank_mu * k.cmu);
            diag_c.mapv_inplace(|v| v.max(1e-300));

            sigma *= ((k.cs / k.damps) * (ps_norm / k.chin - 1.0)).exp();

            observer(&Progress {
                iteration,
                evaluations,
                sigma,
                best_f,
                best_x: best_x.view(),
            });

            // Termination.
            let gen_best = offspring[0].0;
            let gen_worst = offspring[offspring.len() - 1].0;
            if history.len() == history_len {
                history.pop_front();
            }
            history.push_back(gen_best);
            if history.len() == history_len && gen_best.is_finite() && gen_worst.is_finite() {
                let (lo, hi) = history
                    .iter()
                    .chain([gen_best, gen_worst].iter())
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &f| {
                        (lo.min(f), hi.max(f))
                    });
                if hi - lo < self.tol_fun {
                    stop = StopReason::TolFun;
                    break;
                }
            }
            let spread = diag_c
                .iter()
                .zip(pc.iter())
                .map(|(c, p)| c.sqrt().max(p.abs()))
                .fold(0.0_f64, f64::max);
            if sigma * spread < tol_x {
                stop = StopReason::TolX;
                break;
            }
        }

        debug!(
            iterations = iteration,
            evaluations,
            best_f,
            status = stop.code(),
            "cma-es finished"
        );
        BoxOutcome {
            best_x,
            best_f,
            iterations: iteration,
            evaluations,
            stop,
        }
    }
}
