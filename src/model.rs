//! Frozen nearest-center classifier.
//!
//! A [`ClusterModel`] is the artifact a training run produces: cluster
//! centers, one label per center, and the distance (with its weights) the
//! centers were found under. An instance is labelled with the label of its
//! nearest center; a bag with the mean label of its instances.
//!
//! # Lifecycle
//!
//! 1. Construct (or [`ClusterModel::load`]).
//! 2. [`ClusterModel::build`] freezes centers and distance into a search
//!    index. `load` builds automatically.
//! 3. Predict. Any setter drops the index, so predictions after a change
//!    fail with [`Error::ModelNotBuilt`] until `build` is called again.
//!
//! # Text format
//!
//! ```text
//! # bagwise cluster model
//! <#weights> <#clusters> <#features>
//! <weights…>
//! <labels…>
//! <center row 1…>
//! …
//! ```
//!
//! Values are whitespace separated. Blank lines and lines starting with `#`
//! are ignored when reading.

use crate::bags::check_membership;
use crate::cluster::NearestCenterIndex;
use crate::distance::Distance;
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const HEADER: &str = "# bagwise cluster model";

/// A trained model that labels instances, and bags through them.
pub trait BagPredictor {
    /// One prediction per row of `instances`.
    fn predict_instances(&self, instances: ArrayView2<'_, f64>) -> Result<Array1<f64>>;

    /// Mean instance prediction per bag; `NaN` for bags without instances.
    fn predict_bags(
        &self,
        instances: ArrayView2<'_, f64>,
        bags: &[usize],
        n_bags: usize,
    ) -> Result<Array1<f64>> {
        check_membership(bags, instances.nrows(), n_bags)?;
        let per_instance = self.predict_instances(instances)?;
        Ok(bag_means(per_instance.view(), bags, n_bags))
    }
}

/// Mean of `values` per bag, `NaN` where a bag has no entries. `bags` must
/// already be checked against `n_bags`.
pub(crate) fn bag_means(values: ArrayView1<'_, f64>, bags: &[usize], n_bags: usize) -> Array1<f64> {
    let mut sums = Array1::<f64>::zeros(n_bags);
    let mut counts = vec![0usize; n_bags];
    for (&b, &y) in bags.iter().zip(values.iter()) {
        sums[b] += y;
        counts[b] += 1;
    }
    for (s, &n) in sums.iter_mut().zip(counts.iter()) {
        *s = if n == 0 { f64::NAN } else { *s / n as f64 };
    }
    sums
}

/// Labelled centers plus the distance they live under.
#[derive(Debug, Clone)]
pub struct ClusterModel<D> {
    centers: Array2<f64>,
    labels: Array1<f64>,
    distance: D,
    index: Option<NearestCenterIndex<D>>,
}

impl<D: Distance> ClusterModel<D> {
    /// Unbuilt model. `labels` needs one entry per center row and the
    /// distance must match the center dimension.
    pub fn new(centers: Array2<f64>, labels: Array1<f64>, distance: D) -> Result<Self> {
        if labels.len() != centers.nrows() {
            return Err(Error::DimensionMismatch {
                expected: centers.nrows(),
                found: labels.len(),
            });
        }
        if distance.dim() != centers.ncols() {
            return Err(Error::DimensionMismatch {
                expected: centers.ncols(),
                found: distance.dim(),
            });
        }
        Ok(Self {
            centers,
            labels,
            distance,
            index: None,
        })
    }

    /// Freeze centers and distance into a fresh search index.
    pub fn build(&mut self) -> Result<()> {
        self.index = Some(NearestCenterIndex::new(
            self.centers.clone(),
            self.distance.clone(),
        )?);
        Ok(())
    }

    /// Whether predictions can run without another `build`.
    pub fn is_built(&self) -> bool {
        self.index.is_some()
    }

    /// Replace the centers. Labels must be replaced to match before `build`.
    pub fn set_centers(&mut self, centers: Array2<f64>) {
        self.index = None;
        self.centers = centers;
    }

    /// Replace the per-center labels.
    pub fn set_labels(&mut self, labels: Array1<f64>) {
        self.index = None;
        self.labels = labels;
    }

    /// Keep the distance layout, swap its weights.
    pub fn set_weights(&mut self, weights: &[f64]) -> Result<()> {
        self.distance = self.distance.with_weights(weights)?;
        self.index = None;
        Ok(())
    }

    pub fn centers(&self) -> &Array2<f64> {
        &self.centers
    }

    pub fn labels(&self) -> &Array1<f64> {
        &self.labels
    }

    pub fn weights(&self) -> &[f64] {
        self.distance.weights()
    }

    pub fn distance(&self) -> &D {
        &self.distance
    }

    pub fn n_clusters(&self) -> usize {
        self.centers.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.centers.ncols()
    }

    fn index(&self) -> Result<&NearestCenterIndex<D>> {
        self.index.as_ref().ok_or(Error::ModelNotBuilt)
    }

    /// Label of every instance's nearest center.
    pub fn predict_instances(&self, instances: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let index = self.index()?;
        if self.labels.len() != index.len() {
            return Err(Error::DimensionMismatch {
                expected: index.len(),
                found: self.labels.len(),
            });
        }
        let (nearest, _) = index.query(instances)?;
        Ok(nearest.iter().map(|&k| self.labels[k]).collect())
    }

    /// Mean instance prediction per bag; `NaN` for bags without instances.
    pub fn predict_bags(
        &self,
        instances: ArrayView2<'_, f64>,
        bags: &[usize],
        n_bags: usize,
    ) -> Result<Array1<f64>> {
        check_membership(bags, instances.nrows(), n_bags)?;
        let per_instance = self.predict_instances(instances)?;
        Ok(bag_means(per_instance.view(), bags, n_bags))
    }

    /// Write the text format.
    pub fn write_to<W: Write>(&self, mut out: W) -> Result<()> {
        write!(out, "{self}")?;
        out.flush()?;
        Ok(())
    }

    /// Parse the text format and build the model.
    pub fn read_from<R: BufRead>(input: R) -> Result<Self> {
        let mut rows = Vec::new();
        for (n, line) in input.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            rows.push((n + 1, trimmed.to_owned()));
        }
        let mut rows = rows.into_iter();
        let mut next_row = |what: &str| {
            rows.next().ok_or_else(|| Error::Parse {
                line: 0,
                message: format!("unexpected end of input, expected {what}"),
            })
        };

        let (line, header) = next_row("header")?;
        let dims = parse_values::<usize>(line, &header, 3)?;
        let (n_weights, n_clusters, n_features) = (dims[0], dims[1], dims[2]);
        if n_weights > n_features {
            return Err(Error::Parse {
                line,
                message: format!("{n_weights} weights for {n_features} features"),
            });
        }

        let (line, text) = next_row("weights")?;
        let weights = parse_values::<f64>(line, &text, n_weights)?;
        let (line, text) = next_row("labels")?;
        let labels = parse_values::<f64>(line, &text, n_clusters)?;

        let mut centers = Array2::zeros((n_clusters, n_features));
        for mut center in centers.outer_iter_mut() {
            let (line, text) = next_row("a center row")?;
            let values = parse_values::<f64>(line, &text, n_features)?;
            center.assign(&Array1::from(values));
        }
        if let Some((line, _)) = rows.next() {
            return Err(Error::Parse {
                line,
                message: format!("more than {n_clusters} center rows"),
            });
        }

        let distance = D::from_layout(n_weights, n_features, &weights)?;
        let mut model = Self::new(centers, Array1::from(labels), distance)?;
        model.build()?;
        Ok(model)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_to(BufWriter::new(File::create(path)?))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::read_from(BufReader::new(File::open(path)?))
    }
}

fn parse_values<T: std::str::FromStr>(line: usize, text: &str, expected: usize) -> Result<Vec<T>> {
    let values = text
        .split_whitespace()
        .map(|tok| {
            tok.parse::<T>().map_err(|_| Error::Parse {
                line,
                message: format!("cannot parse '{tok}'"),
            })
        })
        .collect::<Result<Vec<T>>>()?;
    if values.len() != expected {
        return Err(Error::Parse {
            line,
            message: format!("expected {expected} values, found {}", values.len()),
        });
    }
    Ok(values)
}

fn write_row<'a>(
    f: &mut fmt::Formatter<'_>,
    values: impl IntoIterator<Item = &'a f64>,
) -> fmt::Result {
    for (i, v) in values.into_iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{v}")?;
    }
    writeln!(f)
}

impl<D: Distance> BagPredictor for ClusterModel<D> {
    fn predict_instances(&self, instances: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        ClusterModel::predict_instances(self, instances)
    }

    fn predict_bags(
        &self,
        instances: ArrayView2<'_, f64>,
        bags: &[usize],
        n_bags: usize,
    ) -> Result<Array1<f64>> {
        ClusterModel::predict_bags(self, instances, bags, n_bags)
    }
}

impl<D: Distance> fmt::Display for ClusterModel<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{HEADER}")?;
        writeln!(
            f,
            "{} {} {}",
            self.weights().len(),
            self.n_clusters(),
            self.n_features()
        )?;
        write_row(f, self.weights())?;
        write_row(f, self.labels.iter())?;
        for center in self.centers.outer_iter() {
            write_row(f, center.iter())?;
        }
        Ok(())
    }
}
