//! Bound-constrained nonlinear least squares.
//!
//! Minimizes `½‖r(x)‖²` subject to `lower ≤ x ≤ upper` given a residual
//! function that can also fill its Jacobian.
//!
//! # Projected Levenberg–Marquardt
//!
//! Each iteration:
//!
//! 1. Compute the gradient `g = Jᵀr`.
//! 2. Freeze variables sitting on a bound whose gradient pushes them further
//!    out. The rest form the free set `F`.
//! 3. Solve the damped normal equations on `F`:
//!
//! ```text
//! (J_Fᵀ J_F + μ · diag(J_Fᵀ J_F)) d = −g_F
//! ```
//!
//! 4. Project `x + d` back onto the box. Accept if the cost drops
//!    (then `μ ← μ/3`), otherwise retry with `μ ← 2μ`.
//!
//! The normal equations are solved with `faer`'s pivoted LU.

use crate::error::{Error, Result};
use faer::prelude::*;
use faer::Mat;
use ndarray::{Array1, Array2, ArrayView1, Zip};

/// Residuals `r(x)` with an optional Jacobian.
pub trait ResidualFunction {
    /// Number of parameters.
    fn n_params(&self) -> usize;

    /// Number of residuals.
    fn n_residuals(&self) -> usize;

    /// Write `r(x)` into `residuals` and, when requested, `∂r_i/∂x_j` into
    /// `jacobian` (`n_residuals × n_params`).
    fn evaluate(
        &self,
        x: ArrayView1<'_, f64>,
        residuals: &mut Array1<f64>,
        jacobian: Option<&mut Array2<f64>>,
    );
}

/// Why a solve stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A tolerance was met.
    Converged,
    /// Ran out of iterations. The last point is still usable.
    NoConvergence,
    /// Residuals became non-finite. The point must not be used.
    Failure,
}

impl Termination {
    /// Whether the returned point can be used.
    pub fn is_usable(self) -> bool {
        !matches!(self, Termination::Failure)
    }
}

/// Result of a bounded least-squares solve.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Final point, inside the bounds.
    pub x: Array1<f64>,
    /// `½‖r(x)‖²` at the final point.
    pub cost: f64,
    /// Accepted or rejected steps taken.
    pub iterations: usize,
    pub termination: Termination,
}

/// Box-constrained least-squares backend.
pub trait BoundedLeastSquares {
    /// Minimize `½‖r(x)‖²` from `initial`, keeping `lower ≤ x ≤ upper`.
    ///
    /// Malformed inputs are errors. Numerical trouble is reported through
    /// [`Solution::termination`].
    fn solve<F: ResidualFunction>(
        &self,
        function: &F,
        initial: ArrayView1<'_, f64>,
        lower: ArrayView1<'_, f64>,
        upper: ArrayView1<'_, f64>,
    ) -> Result<Solution>;
}

/// Projected Levenberg–Marquardt solver.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProjectedLevenbergMarquardt {
    max_iterations: usize,
    function_tolerance: f64,
    gradient_tolerance: f64,
    parameter_tolerance: f64,
    initial_damping: f64,
}

impl Default for ProjectedLevenbergMarquardt {
    fn default() -> Self {
        Self::new()
    }
}

const MAX_DAMPING: f64 = 1e16;
const MIN_DAMPING: f64 = 1e-16;

impl ProjectedLevenbergMarquardt {
    /// 150 iterations, tolerances `1e-6` (cost), `1e-10` (gradient), `1e-8` (step).
    pub fn new() -> Self {
        Self {
            max_iterations: 150,
            function_tolerance: 1e-6,
            gradient_tolerance: 1e-10,
            parameter_tolerance: 1e-8,
            initial_damping: 1e-4,
        }
    }

    /// Set the iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the relative cost-decrease tolerance.
    pub fn with_function_tolerance(mut self, tol: f64) -> Self {
        self.function_tolerance = tol;
        self
    }

    /// Set the projected-gradient tolerance.
    pub fn with_gradient_tolerance(mut self, tol: f64) -> Self {
        self.gradient_tolerance = tol;
        self
    }

    /// Set the relative step-size tolerance.
    pub fn with_parameter_tolerance(mut self, tol: f64) -> Self {
        self.parameter_tolerance = tol;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }
}

fn half_squared_norm(r: &Array1<f64>) -> f64 {
    0.5 * r.dot(r)
}

fn project(x: &mut Array1<f64>, lower: ArrayView1<'_, f64>, upper: ArrayView1<'_, f64>) {
    Zip::from(x).and(lower).and(upper).for_each(|x, &lo, &hi| {
        *x = x.clamp(lo, hi);
    });
}

/// Solve `(A + μ·diag(A)) d = b` for the free variables.
fn damped_step(jac: &Array2<f64>, grad: &Array1<f64>, free: &[usize], mu: f64) -> Option<Array1<f64>> {
    let m = free.len();
    let mut lhs = Mat::<f64>::zeros(m, m);
    let mut rhs = Mat::<f64>::zeros(m, 1);
    for (a, &ja) in free.iter().enumerate() {
        let col_a = jac.column(ja);
        for (b, &jb) in free.iter().enumerate().skip(a) {
            let v = col_a.dot(&jac.column(jb));
            lhs[(a, b)] = v;
            lhs[(b, a)] = v;
        }
        rhs[(a, 0)] = -grad[ja];
    }
    for a in 0..m {
        let diag = lhs[(a, a)].max(1e-12);
        lhs[(a, a)] += mu * diag;
    }
    let sol = lhs.full_piv_lu().solve(&rhs);
    let step: Array1<f64> = (0..m).map(|a| sol[(a, 0)]).collect();
    step.iter().all(|v| v.is_finite()).then_some(step)
}

impl BoundedLeastSquares for ProjectedLevenbergMarquardt {
    fn solve<F: ResidualFunction>(
        &self,
        function: &F,
        initial: ArrayView1<'_, f64>,
        lower: ArrayView1<'_, f64>,
        upper: ArrayView1<'_, f64>,
    ) -> Result<Solution> {
        let n = function.n_params();
        let n_res = function.n_residuals();
        for len in [initial.len(), lower.len(), upper.len()] {
            if len != n {
                return Err(Error::DimensionMismatch {
                    expected: n,
                    found: len,
                });
            }
        }
        if Zip::from(lower).and(upper).fold(false, |bad, &lo, &hi| bad || lo > hi) {
            return Err(Error::invalid("lower bound above upper bound"));
        }

        let mut x = initial.to_owned();
        project(&mut x, lower, upper);
        let mut residuals = Array1::zeros(n_res);
        let mut jacobian = Array2::zeros((n_res, n));
        function.evaluate(x.view(), &mut residuals, Some(&mut jacobian));
        let mut cost = half_squared_norm(&residuals);

        let failure = |x: Array1<f64>, iterations| Solution {
            x,
            cost: f64::INFINITY,
            iterations,
            termination: Termination::Failure,
        };
        if !cost.is_finite() || jacobian.iter().any(|v| !v.is_finite()) {
            return Ok(failure(x, 0));
        }

        let mut mu = self.initial_damping;
        let mut trial_residuals = Array1::zeros(n_res);
        let mut iterations = 0;
        let mut termination = Termination::NoConvergence;

        'outer: while iterations < self.max_iterations {
            let grad = jacobian.t().dot(&residuals);

            let mut projected_grad = 0.0_f64;
            let mut free = Vec::with_capacity(n);
            for j in 0..n {
                let pinned_low = x[j] <= lower[j] && grad[j] > 0.0;
                let pinned_high = x[j] >= upper[j] && grad[j] < 0.0;
                if !(pinned_low || pinned_high) {
                    free.push(j);
                }
                let moved = (x[j] - grad[j]).clamp(lower[j], upper[j]) - x[j];
                projected_grad = projected_grad.max(moved.abs());
            }
            if free.is_empty() || projected_grad <= self.gradient_tolerance {
                termination = Termination::Converged;
                break;
            }

            loop {
                iterations += 1;
                let Some(step) = damped_step(&jacobian, &grad, &free, mu) else {
                    mu *= 2.0;
                    if mu > MAX_DAMPING {
                        termination = Termination::Converged;
                        break 'outer;
                    }
                    continue;
                };

                let mut trial = x.clone();
                for (a, &j) in free.iter().enumerate() {
                    trial[j] += step[a];
                }
                project(&mut trial, lower, upper);

                let step_norm = (&trial - &x).dot(&(&trial - &x)).sqrt();
                let x_norm = x.dot(&x).sqrt();
                if step_norm <= self.parameter_tolerance * (x_norm + self.parameter_tolerance) {
                    termination = Termination::Converged;
                    break 'outer;
                }

                function.evaluate(trial.view(), &mut trial_residuals, None);
                let trial_cost = half_squared_norm(&trial_residuals);
                if trial_cost.is_finite() && trial_cost < cost {
                    let decrease = cost - trial_cost;
                    x = trial;
                    cost = trial_cost;
                    function.evaluate(x.view(), &mut residuals, Some(&mut jacobian));
                    if jacobian.iter().any(|v| !v.is_finite()) {
                        return Ok(failure(x, iterations));
                    }
                    mu = (mu / 3.0).max(MIN_DAMPING);
                    if decrease <= self.function_tolerance * (cost + decrease) {
                        termination = Termination::Converged;
                        break 'outer;
                    }
                    break;
                }

                mu *= 2.0;
                if mu > MAX_DAMPING {
                    termination = Termination::Converged;
                    break 'outer;
                }
                if iterations >= self.max_iterations {
                    break 'outer;
                }
            }
        }

        if !cost.is_finite() {
            return Ok(failure(x, iterations));
        }
        Ok(Solution {
            x,
            cost,
            iterations,
            termination,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// r(x) = A x − b
    struct Linear {
        a: Array2<f64>,
        b: Array1<f64>,
    }

    impl ResidualFunction for Linear {
        fn n_params(&self) -> usize {
            self.a.ncols()
        }
        fn n_residuals(&self) -> usize {
            self.a.nrows()
        }
        fn evaluate(
            &self,
            x: ArrayView1<'_, f64>,
            residuals: &mut Array1<f64>,
            jacobian: Option<&mut Array2<f64>>,
        ) {
            residuals.assign(&(self.a.dot(&x) - &self.b));
            if let Some(j) = jacobian {
                j.assign(&self.a);
            }
        }
    }

    /// Rosenbrock as two residuals.
    struct Rosenbrock;

    impl ResidualFunction for Rosenbrock {
        fn n_params(&self) -> usize {
            2
        }
        fn n_residuals(&self) -> usize {
            2
        }
        fn evaluate(
            &self,
            x: ArrayView1<'_, f64>,
            residuals: &mut Array1<f64>,
            jacobian: Option<&mut Array2<f64>>,
        ) {
            residuals[0] = 10.0 * (x[1] - x[0] * x[0]);
            residuals[1] = 1.0 - x[0];
            if let Some(j) = jacobian {
                j[[0, 0]] = -20.0 * x[0];
                j[[0, 1]] = 10.0;
                j[[1, 0]] = -1.0;
                j[[1, 1]] = 0.0;
            }
        }
    }

    struct Poisoned;

    impl ResidualFunction for Poisoned {
        fn n_params(&self) -> usize {
            1
        }
        fn n_residuals(&self) -> usize {
            1
        }
        fn evaluate(
            &self,
            _x: ArrayView1<'_, f64>,
            residuals: &mut Array1<f64>,
            _jacobian: Option<&mut Array2<f64>>,
        ) {
            residuals[0] = f64::NAN;
        }
    }

    #[test]
    fn solves_unconstrained_interior_problem() {
        let f = Linear {
            a: Array2::eye(2),
            b: array![0.3, 0.7],
        };
        let sol = ProjectedLevenbergMarquardt::new()
            .solve(&f, array![0.5, 0.5].view(), array![0.0, 0.0].view(), array![1.0, 1.0].view())
            .unwrap();
        assert!(sol.termination.is_usable());
        assert_abs_diff_eq!(sol.x[0], 0.3, epsilon = 1e-4);
        assert_abs_diff_eq!(sol.x[1], 0.7, epsilon = 1e-4);
    }

    #[test]
    fn active_bound_is_respected() {
        // Unconstrained optimum (1.5, -0.2) lies outside the unit box.
        let f = Linear {
            a: Array2::eye(2),
            b: array![1.5, -0.2],
        };
        let sol = ProjectedLevenbergMarquardt::new()
            .solve(&f, array![0.5, 0.5].view(), array![0.0, 0.0].view(), array![1.0, 1.0].view())
            .unwrap();
        assert_abs_diff_eq!(sol.x[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(sol.x[1], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(sol.cost, 0.5 * (0.25 + 0.04), epsilon = 1e-6);
    }

    #[test]
    fn rosenbrock_converges() {
        let sol = ProjectedLevenbergMarquardt::new()
            .with_max_iterations(500)
            .with_function_tolerance(1e-12)
            .solve(
                &Rosenbrock,
                array![-1.2, 1.0].view(),
                array![-2.0, -2.0].view(),
                array![2.0, 2.0].view(),
            )
            .unwrap();
        assert_abs_diff_eq!(sol.x[0], 1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(sol.x[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn initial_point_is_projected() {
        let f = Linear {
            a: Array2::eye(1),
            b: array![0.5],
        };
        let sol = ProjectedLevenbergMarquardt::new()
            .solve(&f, array![7.0].view(), array![0.0].view(), array![1.0].view())
            .unwrap();
        assert!(sol.x[0] <= 1.0);
        assert_abs_diff_eq!(sol.x[0], 0.5, epsilon = 1e-4);
    }

    #[test]
    fn nan_residuals_are_a_failure() {
        let sol = ProjectedLevenbergMarquardt::new()
            .solve(&Poisoned, array![0.5].view(), array![0.0].view(), array![1.0].view())
            .unwrap();
        assert_eq!(sol.termination, Termination::Failure);
        assert!(!sol.termination.is_usable());
        assert!(sol.cost.is_infinite());
    }

    #[test]
    fn mismatched_bounds_are_errors() {
        let f = Linear {
            a: Array2::eye(2),
            b: array![0.0, 0.0],
        };
        let lm = ProjectedLevenbergMarquardt::new();
        assert!(lm
            .solve(&f, array![0.5].view(), array![0.0, 0.0].view(), array![1.0, 1.0].view())
            .is_err());
        assert!(lm
            .solve(&f, array![0.5, 0.5].view(), array![1.0, 0.0].view(), array![0.0, 1.0].view())
            .is_err());
    }
}
