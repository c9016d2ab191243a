//! Bag-level cost functions.
//!
//! | Cost | Labels | Value |
//! |------|--------|-------|
//! | [`BagProportionError`] | proportions | `‖p − y‖² + λ (Σ (p − y))²` |
//! | [`IntervalAbsoluteError`] | intervals | `Σ dist(y_i, [lo_i, hi_i])` |
//! | [`IntervalSquaredError`] | intervals | `Σ dist(y_i, [lo_i, hi_i])²` |
//!
//! `dist` is zero inside the interval and the distance to the nearest bound
//! outside it.

use super::traits::CostFunction;
use crate::bags::BagLabels;
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1};

fn proportions<'a>(bag_labels: &'a BagLabels, predicted: ArrayView1<'_, f64>) -> Result<&'a Array1<f64>> {
    let p = bag_labels
        .as_proportions()
        .ok_or_else(|| Error::invalid("this cost needs bag proportions, got intervals"))?;
    if p.len() != predicted.len() {
        return Err(Error::DimensionMismatch {
            expected: p.len(),
            found: predicted.len(),
        });
    }
    Ok(p)
}

fn intervals<'a>(bag_labels: &'a BagLabels, predicted: ArrayView1<'_, f64>) -> Result<&'a Array2<f64>> {
    let i = bag_labels
        .as_intervals()
        .ok_or_else(|| Error::invalid("this cost needs bag intervals, got proportions"))?;
    if i.nrows() != predicted.len() {
        return Err(Error::DimensionMismatch {
            expected: i.nrows(),
            found: predicted.len(),
        });
    }
    Ok(i)
}

/// Distance from `y` to `[low, high]`.
fn outside(y: f64, low: f64, high: f64) -> f64 {
    if y < low {
        low - y
    } else if y > high {
        y - high
    } else {
        0.0
    }
}

/// Squared error plus a penalty on the summed signed error.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BagProportionError {
    pub lambda: f64,
}

impl Default for BagProportionError {
    fn default() -> Self {
        Self { lambda: 1.0 }
    }
}

impl BagProportionError {
    pub fn new(lambda: f64) -> Self {
        Self { lambda }
    }
}

impl CostFunction for BagProportionError {
    fn cost(&self, bag_labels: &BagLabels, predicted: ArrayView1<'_, f64>) -> Result<f64> {
        let p = proportions(bag_labels, predicted)?;
        let diff = p - &predicted;
        let sum = diff.sum();
        Ok(diff.dot(&diff) + self.lambda * sum * sum)
    }
}

/// Sum of absolute distances to the bag intervals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IntervalAbsoluteError;

impl CostFunction for IntervalAbsoluteError {
    fn cost(&self, bag_labels: &BagLabels, predicted: ArrayView1<'_, f64>) -> Result<f64> {
        let bounds = intervals(bag_labels, predicted)?;
        Ok(bounds
            .outer_iter()
            .zip(predicted.iter())
            .map(|(b, &y)| outside(y, b[0], b[1]))
            .sum())
    }
}

/// Sum of squared distances to the bag intervals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IntervalSquaredError;

impl CostFunction for IntervalSquaredError {
    fn cost(&self, bag_labels: &BagLabels, predicted: ArrayView1<'_, f64>) -> Result<f64> {
        let bounds = intervals(bag_labels, predicted)?;
        Ok(bounds
            .outer_iter()
            .zip(predicted.iter())
            .map(|(b, &y)| outside(y, b[0], b[1]).powi(2))
            .sum())
    }
}
