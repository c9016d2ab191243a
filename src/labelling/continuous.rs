//! Continuous cluster labels in `[0, 1]`.
//!
//! Solves
//!
//! ```text
//! min_x  ½ Σ_i (p_i − (Cx)_i)²  +  λ (Σ_i (p_i − (Cx)_i))²     s.t. 0 ≤ x ≤ 1
//! ```
//!
//! as a least-squares problem with `N + 1` residuals: one per bag plus the
//! summed residual scaled by `√(2λ)`. The default `λ = ½` weighs the summed
//! residual like any other residual.

use super::traits::{check_shapes, ClusterLabeller, Labelling};
use crate::bags::{predict_proportions, BagLabels};
use crate::error::{Error, Result};
use crate::optim::{BoundedLeastSquares, ProjectedLevenbergMarquardt, ResidualFunction};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use tracing::warn;

struct ProportionResiduals<'a> {
    p: &'a Array1<f64>,
    c: ArrayView2<'a, f64>,
    sum_scale: f64,
}

impl ResidualFunction for ProportionResiduals<'_> {
    fn n_params(&self) -> usize {
        self.c.ncols()
    }

    fn n_residuals(&self) -> usize {
        self.c.nrows() + 1
    }

    fn evaluate(
        &self,
        x: ArrayView1<'_, f64>,
        residuals: &mut Array1<f64>,
        jacobian: Option<&mut Array2<f64>>,
    ) {
        let n = self.c.nrows();
        let predicted = predict_proportions(self.c, x);
        let mut sum = 0.0_f64;
        for i in 0..n {
            residuals[i] = self.p[i] - predicted[i];
            sum += residuals[i];
        }
        residuals[n] = self.sum_scale * sum;

        if let Some(jac) = jacobian {
            for j in 0..self.c.ncols() {
                let mut column_sum = 0.0_f64;
                for i in 0..n {
                    jac[[i, j]] = -self.c[[i, j]];
                    column_sum += self.c[[i, j]];
                }
                jac[[n, j]] = -self.sum_scale * column_sum;
            }
        }
    }
}

/// Box-constrained least-squares labeller.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ContinuousLabeller<S = ProjectedLevenbergMarquardt> {
    lambda: f64,
    solver: S,
}

impl Default for ContinuousLabeller {
    fn default() -> Self {
        Self::new()
    }
}

impl ContinuousLabeller {
    /// `λ = ½`, projected Levenberg–Marquardt capped at 150 iterations.
    pub fn new() -> Self {
        Self {
            lambda: 0.5,
            solver: ProjectedLevenbergMarquardt::new(),
        }
    }
}

impl<S: BoundedLeastSquares> ContinuousLabeller<S> {
    /// Use a different least-squares backend.
    pub fn with_solver<T: BoundedLeastSquares>(self, solver: T) -> ContinuousLabeller<T> {
        ContinuousLabeller {
            lambda: self.lambda,
            solver,
        }
    }

    /// Weight of the summed-residual term. Must be finite and `≥ 0`.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    /// Weight of the summed-residual term.
    pub fn lambda(&self) -> f64 {
        self.lambda
    }
}

impl<S: BoundedLeastSquares> ClusterLabeller for ContinuousLabeller<S> {
    fn label(
        &self,
        bag_labels: &BagLabels,
        co_occurrence: ArrayView2<'_, f64>,
        initial: ArrayView1<'_, f64>,
    ) -> Result<Labelling> {
        check_shapes(bag_labels, co_occurrence, initial)?;
        let p = bag_labels
            .as_proportions()
            .ok_or_else(|| Error::invalid("continuous labelling needs bag proportions"))?;
        if self.lambda < 0.0 || !self.lambda.is_finite() {
            return Err(Error::InvalidParameter {
                name: "lambda",
                message: "must be finite and non-negative",
            });
        }

        let k = co_occurrence.ncols();
        let residuals = ProportionResiduals {
            p,
            c: co_occurrence.reborrow(),
            sum_scale: (2.0 * self.lambda).sqrt(),
        };
        let lower = Array1::zeros(k);
        let upper = Array1::ones(k);
        let solution = self
            .solver
            .solve(&residuals, initial, lower.view(), upper.view())?;

        if !solution.termination.is_usable() {
            warn!(
                iterations = solution.iterations,
                n_clusters = k,
                "continuous labelling produced no usable solution"
            );
            return Ok(Labelling {
                loss: f64::INFINITY,
                labels: initial.to_owned(),
            });
        }
        Ok(Labelling {
            loss: solution.cost,
            labels: solution.x,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn identity_recovers_proportions() {
        let labels = BagLabels::Proportions(array![0.3, 0.7]);
        let c = Array2::<f64>::eye(2);
        let out = ContinuousLabeller::new()
            .with_lambda(0.0)
            .label(&labels, c.view(), array![0.5, 0.5].view())
            .unwrap();
        assert_abs_diff_eq!(out.labels[0], 0.3, epsilon = 1e-4);
        assert_abs_diff_eq!(out.labels[1], 0.7, epsilon = 1e-4);
        assert!(out.loss < 1e-8);
    }

    #[test]
    fn uniform_rows_predict_the_mean() {
        let labels = BagLabels::Proportions(array![0.2, 0.5, 0.8]);
        let c = Array2::from_elem((3, 2), 0.5);
        let out = ContinuousLabeller::new()
            .with_lambda(0.0)
            .label(&labels, c.view(), array![0.1, 0.1].view())
            .unwrap();
        let predicted = predict_proportions(c.view(), out.labels.view());
        for y in predicted.iter() {
            assert_abs_diff_eq!(*y, 0.5, epsilon = 1e-4);
        }
        // ½ Σ (p − 0.5)²
        assert_abs_diff_eq!(out.loss, 0.09, epsilon = 1e-6);
    }

    #[test]
    fn labels_stay_in_unit_box() {
        let labels = BagLabels::Proportions(array![1.0, 0.0]);
        let c = array![[0.5, 0.5], [0.5, 0.5]];
        let out = ContinuousLabeller::new()
            .label(&labels, c.view(), array![0.5, 0.5].view())
            .unwrap();
        assert!(out.labels.iter().all(|&x| (0.0..=1.0).contains(&x)));
    }

    #[test]
    fn penalty_keeps_exact_solution() {
        let labels = BagLabels::Proportions(array![0.2, 0.4]);
        let c = array![[1.0, 0.0], [0.0, 1.0]];
        let strict = ContinuousLabeller::new()
            .with_lambda(5.0)
            .label(&labels, c.view(), array![0.9, 0.9].view())
            .unwrap();
        assert_abs_diff_eq!(strict.labels[0], 0.2, epsilon = 1e-4);
        assert_abs_diff_eq!(strict.labels[1], 0.4, epsilon = 1e-4);
    }

    #[test]
    fn shape_and_label_kind_are_checked() {
        let p = BagLabels::Proportions(array![0.3, 0.7]);
        let c = Array2::<f64>::eye(2);
        let labeller = ContinuousLabeller::new();
        assert!(matches!(
            labeller.label(&p, c.view(), array![0.5].view()),
            Err(Error::DimensionMismatch { .. })
        ));
        let i = BagLabels::Intervals(array![[0.0, 0.5], [0.5, 1.0]]);
        assert!(labeller.label(&i, c.view(), array![0.5, 0.5].view()).is_err());
        let three_bags = BagLabels::Proportions(array![0.1, 0.2, 0.3]);
        assert!(labeller
            .label(&three_bags, c.view(), array![0.5, 0.5].view())
            .is_err());
    }
}
