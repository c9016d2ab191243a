//! Evaluation metrics for bag and instance predictions.
//!
//! Predictions that are not finite or are negative (the cross-validation
//! [`UNSET`](crate::cross_validation::UNSET) sentinel) count as "no
//! prediction" and are skipped. Every metric returns `NaN` when nothing is
//! left to score or the inputs disagree in length.
//!
//! | Metric | Compares | Best |
//! |--------|----------|------|
//! | [`mean_absolute_error`] | proportions | 0 |
//! | [`root_mean_squared_error`] | proportions | 0 |
//! | [`interval_error`] | proportions vs `[low, high]` | 0 |
//! | [`accuracy`] | thresholded instance labels | 1 |
//! | [`coverage`] | fraction with a prediction | 1 |
//!
//! # Example
//!
//! ```rust
//! use bagwise::metrics::{coverage, mean_absolute_error};
//!
//! let predicted = [0.5, f64::NAN, 0.25];
//! let truth = [0.4, 0.9, 0.25];
//! assert!((mean_absolute_error(&predicted, &truth) - 0.05).abs() < 1e-12);
//! assert!((coverage(&predicted) - 2.0 / 3.0).abs() < 1e-12);
//! ```

use ndarray::ArrayView2;

fn has_prediction(y: f64) -> bool {
    y.is_finite() && y >= 0.0
}

/// Mean of `f(prediction, index)` over positions with a prediction.
fn mean_over_predicted(predicted: &[f64], f: impl Fn(f64, usize) -> f64) -> f64 {
    let (sum, n) = predicted
        .iter()
        .enumerate()
        .filter(|(_, &y)| has_prediction(y))
        .fold((0.0, 0usize), |(sum, n), (i, &y)| (sum + f(y, i), n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Mean absolute difference between predicted and true proportions.
pub fn mean_absolute_error(predicted: &[f64], truth: &[f64]) -> f64 {
    if predicted.len() != truth.len() {
        return f64::NAN;
    }
    mean_over_predicted(predicted, |y, i| (y - truth[i]).abs())
}

/// Root of the mean squared difference between predicted and true
/// proportions.
pub fn root_mean_squared_error(predicted: &[f64], truth: &[f64]) -> f64 {
    if predicted.len() != truth.len() {
        return f64::NAN;
    }
    mean_over_predicted(predicted, |y, i| (y - truth[i]).powi(2)).sqrt()
}

/// Mean distance from each prediction to its `[low, high]` row; zero inside.
pub fn interval_error(predicted: &[f64], intervals: ArrayView2<'_, f64>) -> f64 {
    if predicted.len() != intervals.nrows() || intervals.ncols() != 2 {
        return f64::NAN;
    }
    mean_over_predicted(predicted, |y, i| {
        let (low, high) = (intervals[[i, 0]], intervals[[i, 1]]);
        (low - y).max(0.0) + (y - high).max(0.0)
    })
}

/// Fraction of instances whose prediction, thresholded at `threshold`,
/// matches the binary truth.
pub fn accuracy(predicted: &[f64], truth: &[f64], threshold: f64) -> f64 {
    if predicted.len() != truth.len() {
        return f64::NAN;
    }
    mean_over_predicted(predicted, |y, i| {
        let hit = (y >= threshold) == (truth[i] >= threshold);
        if hit {
            1.0
        } else {
            0.0
        }
    })
}

/// Fraction of positions that carry a prediction.
pub fn coverage(predicted: &[f64]) -> f64 {
    if predicted.is_empty() {
        return f64::NAN;
    }
    predicted.iter().filter(|&&y| has_prediction(y)).count() as f64 / predicted.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cross_validation::UNSET;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn skips_missing_predictions() {
        let predicted = [0.2, UNSET, f64::NAN, 0.6];
        let truth = [0.0, 0.5, 0.5, 1.0];
        assert_relative_eq!(mean_absolute_error(&predicted, &truth), 0.3, epsilon = 1e-12);
        assert_relative_eq!(
            root_mean_squared_error(&predicted, &truth),
            0.1f64.sqrt(),
            epsilon = 1e-12
        );
        assert_relative_eq!(coverage(&predicted), 0.5);
    }

    #[test]
    fn nothing_to_score() {
        assert!(mean_absolute_error(&[f64::NAN], &[0.5]).is_nan());
        assert!(mean_absolute_error(&[0.5], &[0.5, 0.5]).is_nan());
        assert!(coverage(&[]).is_nan());
    }

    #[test]
    fn interval_error_is_zero_inside() {
        let intervals = array![[0.0, 0.5], [0.2, 0.4], [0.6, 1.0]];
        assert_eq!(interval_error(&[0.3, 0.3, 0.6], intervals.view()), 0.0);
        assert_relative_eq!(
            interval_error(&[0.7, 0.1, 0.6], intervals.view()),
            0.1,
            epsilon = 1e-12
        );
        assert!(interval_error(&[0.3], intervals.view()).is_nan());
    }

    #[test]
    fn accuracy_thresholds_predictions() {
        let predicted = [0.9, 0.2, 0.6, UNSET];
        let truth = [1.0, 0.0, 0.0, 1.0];
        assert_relative_eq!(accuracy(&predicted, &truth, 0.5), 2.0 / 3.0, epsilon = 1e-12);
    }
}
