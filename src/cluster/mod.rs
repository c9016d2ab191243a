//! Clustering under weighted distances.
//!
//! Every clusterer takes the distance per call, so the trainer can hand a
//! freshly re-weighted distance to the same clusterer at each objective
//! evaluation.
//!
//! ## Algorithms
//!
//! ### Branching hierarchical k-means
//!
//! The workhorse. Builds a k-means tree with a fixed branching factor and
//! reads the lowest-cost set of nodes off it as centers:
//!
//! ```text
//! k' = (branching − 1)·⌊(k − 1)/(branching − 1)⌋ + 1
//! ```
//!
//! Only counts of that form are reachable, so the realized `k'` can be lower
//! than the requested `k`. Every instance is then assigned to its nearest
//! center with an exact linear search under the same distance.
//!
//! ### K-means
//!
//! Flat Lloyd iterations with mean centers. Used for each node split of the
//! tree, and usable directly when the exact `k` matters more than speed.
//!
//! ## Usage
//!
//! ```rust
//! use bagwise::cluster::{Clusterer, HierarchicalKmeans};
//! use bagwise::distance::WeightedEuclidean;
//! use ndarray::array;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let data = array![[0.0, 0.0], [0.1, 0.1], [10.0, 10.0], [10.1, 10.1]];
//! let dist = WeightedEuclidean::unweighted(2).unwrap();
//! let clustering = HierarchicalKmeans::new()
//!     .with_branching(2)
//!     .cluster(data.view(), &dist, 2, &mut StdRng::seed_from_u64(0))
//!     .unwrap();
//! assert_eq!(clustering.indices[0], clustering.indices[1]);
//! assert_ne!(clustering.indices[0], clustering.indices[2]);
//! ```

mod hierarchical;
mod index;
mod kmeans;
mod traits;

pub use hierarchical::{realized_k, HierarchicalKmeans};
pub use index::NearestCenterIndex;
pub use kmeans::{CenterInit, Kmeans};
pub use traits::{Clusterer, Clustering};
