//! Weighted distances over concatenated feature blocks.
//!
//! An instance is a row of `D` features made of `G` contiguous sub-histograms
//! (for example one intensity histogram per filter response). Each block gets
//! its own non-negative weight, and the outer optimizer searches those weights.
//!
//! ## Public invariants
//!
//! - **Self-distance is exactly zero** for every distance in this module.
//! - **No hidden normalization**: histograms are compared as given. A
//!   zero-mass block is the caller's problem.
//! - **Layout is fixed at construction**: `with_weights` keeps the block
//!   layout and only swaps the weights.
//!
//! ## Weighted histogram distance
//!
//! For each block `g` with bins `i ∈ [s_g, e_g)`:
//!
//! ```text
//! emd_g(a, b) = Σ_i | Σ_{t ≤ i} (a_t − b_t) |
//! d(a, b)     = Σ_g w_g · emd_g(a, b)
//! ```
//!
//! The inner term is the 1-D earth mover's distance between two histograms
//! with unit ground distance between neighbouring bins.

use crate::error::{Error, Result};
use ndarray::ArrayView1;

/// A dissimilarity usable for clustering and nearest-center search.
///
/// Implementations carry their own weights, so a value of this type is a
/// complete, frozen distance function.
pub trait Distance: Clone + Send + Sync {
    /// Distance between two feature vectors of length [`Distance::dim`].
    fn eval(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64;

    /// Number of features this distance expects.
    fn dim(&self) -> usize;

    /// Current weights.
    fn weights(&self) -> &[f64];

    /// Same layout, new weights.
    fn with_weights(&self, weights: &[f64]) -> Result<Self>;

    /// Rebuild a distance from a persisted `(#weights, #features, weights)`
    /// triple.
    fn from_layout(n_weights: usize, n_features: usize, weights: &[f64]) -> Result<Self>;
}

fn check_weights(weights: &[f64], expected: usize) -> Result<()> {
    if weights.len() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            found: weights.len(),
        });
    }
    if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(Error::invalid(format!(
            "weights must be finite and non-negative, got {w}"
        )));
    }
    Ok(())
}

/// Earth-mover style distance over independently weighted sub-histograms.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WeightedHistogramDistance {
    /// Bin count of each block, in feature order.
    bins: Vec<usize>,
    /// One weight per block.
    weights: Vec<f64>,
    /// Sum of `bins`.
    dim: usize,
}

impl WeightedHistogramDistance {
    /// Create from ordered `(bin_count, weight)` pairs.
    pub fn new(blocks: &[(usize, f64)]) -> Result<Self> {
        if blocks.is_empty() {
            return Err(Error::EmptyInput);
        }
        if blocks.iter().any(|(b, _)| *b == 0) {
            return Err(Error::InvalidParameter {
                name: "bins",
                message: "every histogram needs at least one bin",
            });
        }
        let bins: Vec<usize> = blocks.iter().map(|(b, _)| *b).collect();
        let weights: Vec<f64> = blocks.iter().map(|(_, w)| *w).collect();
        check_weights(&weights, bins.len())?;
        let dim = bins.iter().sum();
        Ok(Self { bins, weights, dim })
    }

    /// `n_histograms` blocks of `n_bins` bins, all with the same weight.
    pub fn equal_blocks(n_histograms: usize, n_bins: usize, weight: f64) -> Result<Self> {
        Self::new(&vec![(n_bins, weight); n_histograms])
    }

    /// Bin count of each block.
    pub fn bins(&self) -> &[usize] {
        &self.bins
    }

    /// Number of blocks.
    pub fn n_blocks(&self) -> usize {
        self.bins.len()
    }
}

impl Distance for WeightedHistogramDistance {
    fn eval(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        debug_assert_eq!(a.len(), self.dim);
        debug_assert_eq!(b.len(), self.dim);
        let mut pairs = a.iter().zip(b.iter());
        let mut result = 0.0_f64;
        for (&n_bins, &w) in self.bins.iter().zip(self.weights.iter()) {
            let mut emd = 0.0_f64;
            let mut block = 0.0_f64;
            for (x, y) in pairs.by_ref().take(n_bins) {
                emd += x - y;
                block += emd.abs();
            }
            result += w * block;
        }
        result
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn with_weights(&self, weights: &[f64]) -> Result<Self> {
        check_weights(weights, self.bins.len())?;
        Ok(Self {
            bins: self.bins.clone(),
            weights: weights.to_vec(),
            dim: self.dim,
        })
    }

    fn from_layout(n_weights: usize, n_features: usize, weights: &[f64]) -> Result<Self> {
        if n_weights == 0 || n_features % n_weights != 0 {
            return Err(Error::invalid(format!(
                "{n_features} features cannot be split into {n_weights} equal histograms"
            )));
        }
        let n_bins = n_features / n_weights;
        let blocks: Vec<(usize, f64)> = weights.iter().map(|w| (n_bins, *w)).collect();
        if blocks.len() != n_weights {
            return Err(Error::DimensionMismatch {
                expected: n_weights,
                found: blocks.len(),
            });
        }
        Self::new(&blocks)
    }
}

/// Squared Euclidean distance with one weight per feature.
///
/// ```text
/// d(a, b) = Σ_j w_j (a_j − b_j)²
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WeightedEuclidean {
    weights: Vec<f64>,
}

impl WeightedEuclidean {
    /// Create from per-feature weights.
    pub fn new(weights: impl Into<Vec<f64>>) -> Result<Self> {
        let weights = weights.into();
        if weights.is_empty() {
            return Err(Error::EmptyInput);
        }
        check_weights(&weights, weights.len())?;
        Ok(Self { weights })
    }

    /// All `dim` weights set to one.
    pub fn unweighted(dim: usize) -> Result<Self> {
        Self::new(vec![1.0; dim])
    }
}

impl Distance for WeightedEuclidean {
    fn eval(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        a.iter()
            .zip(b.iter())
            .zip(self.weights.iter())
            .map(|((x, y), w)| w * (x - y) * (x - y))
            .sum()
    }

    fn dim(&self) -> usize {
        self.weights.len()
    }

    fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn with_weights(&self, weights: &[f64]) -> Result<Self> {
        check_weights(weights, self.weights.len())?;
        Ok(Self {
            weights: weights.to_vec(),
        })
    }

    fn from_layout(n_weights: usize, n_features: usize, weights: &[f64]) -> Result<Self> {
        if n_weights != n_features {
            return Err(Error::DimensionMismatch {
                expected: n_features,
                found: n_weights,
            });
        }
        Self::new(weights.to_vec())
    }
}
