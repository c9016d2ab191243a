//! Branching hierarchical k-means.
//!
//! Top-down clustering in the style of FLANN's k-means tree: the data is
//! split into `branching` groups by k-means, each group is split again, and
//! so on. Cluster centers are read off the tree instead of running one big
//! k-means, which keeps every Lloyd step small.
//!
//! # Reading Centers Off The Tree
//!
//! Starting from the root, the frontier node whose split yields the lowest
//! total within-cluster cost is replaced by its children:
//!
//! ```text
//! cost(frontier) = Σ_node Σ_{x ∈ node} d(x, pivot(node))
//! ```
//!
//! Every split replaces one center by `branching`, so only counts of the form
//! `(branching − 1)·n + 1` are reachable. The target is the largest such
//! count not above the requested `k`; see [`realized_k`].
//!
//! Nodes are expanded lazily, only when they reach the frontier.

use super::index::NearestCenterIndex;
use super::kmeans::{mean_of, CenterInit, Kmeans};
use super::traits::{check_instances, Clusterer, Clustering};
use crate::distance::Distance;
use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;
use tracing::debug;

/// Largest `(branching − 1)·n + 1` not above `requested`.
///
/// Returns `requested` unchanged when `branching < 2` or `requested == 0`;
/// the clusterer rejects those inputs before using this value.
pub fn realized_k(requested: usize, branching: usize) -> usize {
    if branching < 2 || requested == 0 {
        return requested;
    }
    let step = branching - 1;
    step * ((requested - 1) / step) + 1
}

/// Cheapest `(position, n_children, total)` candidate whose split adds at
/// most `room` centers. Leaves (no children) never qualify.
fn cheapest_split(candidates: &[(usize, usize, f64)], room: usize) -> Option<(usize, f64)> {
    candidates
        .iter()
        .filter(|&&(_, n_children, _)| n_children >= 2 && n_children - 1 <= room)
        .fold(None, |best: Option<(usize, f64)>, &(pos, _, total)| match best {
            Some((_, b)) if b <= total => best,
            _ => Some((pos, total)),
        })
}

#[derive(Debug)]
struct Node {
    members: Vec<usize>,
    pivot: Array1<f64>,
    /// Sum of member distances to the pivot.
    cost: f64,
    /// `None` until expanded; `Some(empty)` for a leaf.
    children: Option<Vec<usize>>,
}

/// Hierarchical k-means with a fixed branching factor.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HierarchicalKmeans {
    /// Children per tree node.
    branching: usize,
    /// Lloyd iterations per node split.
    iterations: usize,
    /// Seeding for each node split.
    init: CenterInit,
}

impl Default for HierarchicalKmeans {
    fn default() -> Self {
        Self::new()
    }
}

impl HierarchicalKmeans {
    /// Branching 32, 11 iterations, random seeding.
    pub fn new() -> Self {
        Self {
            branching: 32,
            iterations: 11,
            init: CenterInit::Random,
        }
    }

    /// Set the branching factor.
    pub fn with_branching(mut self, branching: usize) -> Self {
        self.branching = branching;
        self
    }

    /// Set Lloyd iterations per split.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set seeding strategy.
    pub fn with_init(mut self, init: CenterInit) -> Self {
        self.init = init;
        self
    }

    /// Set the branching factor in place.
    pub fn set_branching(&mut self, branching: usize) {
        self.branching = branching;
    }

    /// Set Lloyd iterations per split in place.
    pub fn set_iterations(&mut self, iterations: usize) {
        self.iterations = iterations;
    }

    /// Children per tree node.
    pub fn branching(&self) -> usize {
        self.branching
    }

    /// Lloyd iterations per node split.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    fn make_node<D: Distance>(data: ArrayView2<'_, f64>, members: Vec<usize>, dist: &D) -> Node {
        let pivot = mean_of(data, &members);
        let cost = members
            .iter()
            .map(|&m| dist.eval(data.row(m), pivot.view()))
            .sum();
        Node {
            members,
            pivot,
            cost,
            children: None,
        }
    }

    /// Split `nodes[id]` unless it is too small or has too few distinct points.
    fn expand<D: Distance, R: Rng + ?Sized>(
        &self,
        nodes: &mut Vec<Node>,
        id: usize,
        data: ArrayView2<'_, f64>,
        dist: &D,
        kmeans: &Kmeans,
        rng: &mut R,
    ) {
        if nodes[id].children.is_some() {
            return;
        }
        let members = &nodes[id].members;
        let fit = if members.len() < self.branching {
            None
        } else {
            kmeans.fit_subset(data, members, self.branching, dist, rng)
        };
        let Some(fit) = fit else {
            nodes[id].children = Some(Vec::new());
            return;
        };

        let mut groups: Vec<Vec<usize>> = vec![Vec::new(); self.branching];
        for (slot, &label) in fit.labels.iter().enumerate() {
            groups[label].push(nodes[id].members[slot]);
        }
        let mut children = Vec::with_capacity(self.branching);
        for group in groups.into_iter().filter(|g| !g.is_empty()) {
            children.push(nodes.len());
            nodes.push(Self::make_node(data, group, dist));
        }
        // A split into a single group would loop forever.
        if children.len() < 2 {
            nodes.truncate(nodes.len() - children.len());
            children.clear();
        }
        nodes[id].children = Some(children);
    }

    /// Tree centers for a target count, before the final assignment.
    fn select_centers<D: Distance, R: Rng + ?Sized>(
        &self,
        data: ArrayView2<'_, f64>,
        dist: &D,
        target: usize,
        rng: &mut R,
    ) -> Array2<f64> {
        let kmeans = Kmeans::new()
            .with_max_iter(self.iterations)
            .with_init(self.init);
        let mut nodes = vec![Self::make_node(data, (0..data.nrows()).collect(), dist)];
        let mut frontier = vec![0usize];
        let mut total = nodes[0].cost;

        while frontier.len() < target {
            let mut candidates = Vec::with_capacity(frontier.len());
            for pos in 0..frontier.len() {
                let id = frontier[pos];
                self.expand(&mut nodes, id, data, dist, &kmeans, rng);
                let Some(children) = nodes[id].children.as_ref() else {
                    continue;
                };
                let split_total = total - nodes[id].cost
                    + children.iter().map(|&c| nodes[c].cost).sum::<f64>();
                candidates.push((pos, children.len(), split_total));
            }
            let room = target - frontier.len();
            let Some((pos, split_total)) = cheapest_split(&candidates, room) else {
                break;
            };
            let id = frontier[pos];
            let children = nodes[id].children.clone().unwrap_or_default();
            total = split_total;
            frontier[pos] = children[0];
            frontier.extend_from_slice(&children[1..]);
        }

        let mut centers = Array2::zeros((frontier.len(), data.ncols()));
        for (row, &id) in frontier.iter().enumerate() {
            centers.row_mut(row).assign(&nodes[id].pivot);
        }
        centers
    }
}

impl Clusterer for HierarchicalKmeans {
    fn cluster<D: Distance, R: Rng + ?Sized>(
        &self,
        instances: ArrayView2<'_, f64>,
        distance: &D,
        requested_k: usize,
        rng: &mut R,
    ) -> Result<Clustering> {
        self.check_k(requested_k)?;
        check_instances(instances, distance)?;

        let target = realized_k(requested_k, self.branching);
        let centers = self.select_centers(instances, distance, target, rng);
        if centers.nrows() < target {
            debug!(
                target,
                realized = centers.nrows(),
                n_instances = instances.nrows(),
                "data supports fewer clusters than requested"
            );
        }

        let index = NearestCenterIndex::new(centers, distance.clone())?;
        let (indices, distances) = index.query(instances)?;
        Ok(Clustering {
            centers: index.centers().clone(),
            indices,
            distances,
        })
    }

    fn realized_k(&self, requested_k: usize) -> usize {
        realized_k(requested_k, self.branching)
    }
    fn check_k(&self, requested_k: usize) -> Result<()> {
        if self.branching < 2 {
            return Err(Error::InvalidParameter {
                name: "branching",
                message: "must be at least 2",
            });
        }
        if requested_k < self.branching {
            return Err(Error::InvalidClusterCount {
                requested: requested_k,
                reason: format!("must be at least the branching factor {}", self.branching),
            });
        }
        Ok(())
    }
}
