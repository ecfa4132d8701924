use faer::{MatRef, RowRef};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thousands::*;

use crate::error::{AtriaError, Result};
use crate::point_set::PointSet;
use crate::utils::*;

/// Arena position of the root cluster
const ROOT: u32 = 0;

/////////////
// Helpers //
/////////////

/// Find furthest point from pivot
///
/// ### Params
///
/// * `pivot` - Pivot point
/// * `points` - The point set
/// * `indices` - The indices of the active points
///
/// ### Return
///
/// Furthest point from the pivot (first one on ties)
fn find_furthest_from<T, M>(pivot: &[T], points: &PointSet<T, M>, indices: &[usize]) -> usize
where
    T: AtriaFloat,
    M: Metric<T>,
{
    let metric = points.metric();
    let mut max_dist = T::zero();
    let mut furthest = indices[0];

    for &idx in indices {
        let dist = metric.distance(pivot, points.point(idx));
        if dist > max_dist {
            max_dist = dist;
            furthest = idx;
        }
    }

    furthest
}

/// Partition points into two sets via the pivots
///
/// Ties go to the first pivot.
///
/// ### Params
///
/// * `points` - The point set
/// * `indices` - The indices of the active points
/// * `pivot_1` - The left pivot point
/// * `pivot_2` - The right pivot point
///
/// ### Return
///
/// `(indices left, indices right)`
fn partition_by_nearest<T, M>(
    points: &PointSet<T, M>,
    indices: &[usize],
    pivot_1: &[T],
    pivot_2: &[T],
) -> (Vec<usize>, Vec<usize>)
where
    T: AtriaFloat,
    M: Metric<T>,
{
    let metric = points.metric();
    let mut left: Vec<usize> = Vec::with_capacity(indices.len() / 2 + 1);
    let mut right: Vec<usize> = Vec::with_capacity(indices.len() / 2 + 1);

    for &idx in indices {
        let vec = points.point(idx);
        let d1 = metric.distance(pivot_1, vec);
        let d2 = metric.distance(pivot_2, vec);

        if d1 <= d2 {
            left.push(idx);
        } else {
            right.push(idx);
        }
    }

    (left, right)
}

/// Compute the centroid
///
/// ### Params
///
/// * `points` - The point set
/// * `indices` - The index vector
///
/// ### Returns
///
/// The coordinate-wise mean of the indexed points
fn compute_centroid<T, M>(points: &PointSet<T, M>, indices: &[usize]) -> Vec<T>
where
    T: AtriaFloat,
    M: Metric<T>,
{
    let dim = points.dimension();
    let mut centroid = vec![T::zero(); dim];
    // from_usize never fails for f32 / f64
    let n = T::from_usize(indices.len()).unwrap_or_else(T::one);

    for &idx in indices {
        let vec = points.point(idx);
        for d in 0..dim {
            centroid[d] = centroid[d] + vec[d];
        }
    }

    for d in 0..dim {
        centroid[d] = centroid[d] / n;
    }

    centroid
}

/// Calculate the radius of the ball
///
/// ### Params
///
/// * `center` - The center of the given ball
/// * `points` - The point set
/// * `indices` - The indices of the data
///
/// ### Return
///
/// The maximum distance of the data against the center
fn ball_radius<T, M>(center: &[T], points: &PointSet<T, M>, indices: &[usize]) -> T
where
    T: AtriaFloat,
    M: Metric<T>,
{
    let metric = points.metric();
    indices.iter().fold(T::zero(), |max_dist, &idx| {
        max_dist.max(metric.distance(center, points.point(idx)))
    })
}

////////////
// Params //
////////////

/// Construction parameters of the ball tree
///
/// ### Fields
///
/// * `cluster_max_points` - Maximum number of points in a leaf cluster
/// * `seed` - Seed for the pivot selection
/// * `exclude_samples` - Number of points at the end of the set that are left
///   out of the tree and can never be returned as neighbours
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AtriaParams {
    pub cluster_max_points: usize,
    pub seed: u64,
    pub exclude_samples: usize,
}

impl Default for AtriaParams {
    fn default() -> Self {
        Self {
            cluster_max_points: DEFAULT_CLUSTER_MAX_POINTS,
            seed: DEFAULT_SEED,
            exclude_samples: 0,
        }
    }
}

impl AtriaParams {
    /// Set the maximum leaf size
    pub fn with_cluster_max_points(mut self, cluster_max_points: usize) -> Self {
        self.cluster_max_points = cluster_max_points;
        self
    }

    /// Set the seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the number of trailing samples left out of the tree
    pub fn with_exclude_samples(mut self, exclude_samples: usize) -> Self {
        self.exclude_samples = exclude_samples;
        self
    }

    /// Check the parameters against a point set of size `n`
    fn validate(&self, n: usize) -> Result<()> {
        if self.cluster_max_points < 1 {
            return Err(AtriaError::invalid_argument(
                "cluster_max_points must be at least 1",
            ));
        }
        if self.exclude_samples >= n {
            return Err(AtriaError::invalid_argument(format!(
                "exclude_samples ({}) must be smaller than the number of points ({})",
                self.exclude_samples, n
            )));
        }
        if n - self.exclude_samples > u32::MAX as usize {
            return Err(AtriaError::invalid_argument(format!(
                "At most {} searchable points are supported",
                u32::MAX
            )));
        }
        Ok(())
    }
}

////////////////
// Main types //
////////////////

/// Cluster record in the flattened tree arena
///
/// ### Fields
///
/// * `is_leaf` - Leaf or split node
/// * `child_a` - For split: left child index; For leaf: start index in
///   leaf_indices
/// * `child_b` - For split: right child index; For leaf: count of items
/// * `size` - Number of points in the subtree
/// * `radius` - Upper bound of the distance from the centre to any point in
///   the subtree
#[derive(Clone, Copy, Debug, PartialEq)]
struct BallNode<T> {
    is_leaf: bool,
    child_a: u32,
    child_b: u32,
    size: u32,
    radius: T,
}

/// Build-time node representation
///
/// Temporary structure used during tree construction, later flattened into
/// BallNode format. Nodes are stored in pre-order.
#[derive(Clone)]
enum BuildNode<T> {
    Split {
        /// Centroid of the ball
        center: Vec<T>,
        /// Radius of the ball
        radius: T,
        /// Number of points below this node
        size: usize,
        /// Index of left child in build tree
        left: usize,
        /// Index of right child in build tree
        right: usize,
    },
    Leaf {
        /// Centroid of the ball
        center: Vec<T>,
        /// Radius of the ball
        radius: T,
        /// Original data indices in this leaf
        items: Vec<usize>,
        /// Distance of every item to the centroid
        center_dists: Vec<T>,
    },
}

/// Flattened arena, as produced by `flatten_tree`
struct FlatTree<T> {
    nodes: Vec<BallNode<T>>,
    centers_data: Vec<T>,
    leaf_indices: Vec<usize>,
    leaf_dists: Vec<T>,
}

///////////////////
// BallTreeIndex //
///////////////////

/// Exclusion-aware ball tree over a point set
///
/// Clusters live in a single arena in pre-order; the root is at position 0.
/// Centres are the centroids of the cluster members. Leaves keep the distance
/// of every member to the leaf centre, which gives a per-point lower bound
/// `|d(q, c) - d(p, c)|` before the true distance is evaluated.
///
/// ### Fields
///
/// * `points` - The owned point set (with metric)
/// * `n_searchable` - Points `[0, n_searchable)` are in the tree
/// * `nodes` - Flattened tree structure containing all split and leaf nodes
/// * `centers_data` - Centre of node `i` at `[i * dim, (i + 1) * dim)`
/// * `leaf_indices` - Actual data indices stored in leaf nodes
/// * `leaf_dists` - Distance of each leaf entry to its leaf centre
/// * `cluster_max_points` - Maximum leaf size used at construction
/// * `seed` - Seed used at construction
pub struct BallTreeIndex<T, M = Dist> {
    points: PointSet<T, M>,
    n_searchable: usize,
    nodes: Vec<BallNode<T>>,
    centers_data: Vec<T>,
    leaf_indices: Vec<usize>,
    leaf_dists: Vec<T>,
    cluster_max_points: usize,
    seed: u64,
}

impl<T, M> BallTreeIndex<T, M>
where
    T: AtriaFloat,
    M: Metric<T>,
{
    //////////////////////
    // Index generation //
    //////////////////////

    /// Generate a new BallTreeIndex
    ///
    /// ### Params
    ///
    /// * `data` - Data matrix (rows = samples, columns = dimensions)
    /// * `metric` - Distance metric
    /// * `params` - Construction parameters
    ///
    /// ### Returns
    ///
    /// Index ready for querying
    pub fn new(data: MatRef<T>, metric: M, params: &AtriaParams) -> Result<Self> {
        let points = PointSet::new(data, metric)?;
        Self::from_point_set(points, params)
    }

    /// Generate a new BallTreeIndex over an existing point set
    ///
    /// ### Params
    ///
    /// * `points` - The point set; moved into the index
    /// * `params` - Construction parameters
    ///
    /// ### Returns
    ///
    /// Index ready for querying
    pub fn from_point_set(points: PointSet<T, M>, params: &AtriaParams) -> Result<Self> {
        params.validate(points.size())?;

        let n_searchable = points.size() - params.exclude_samples;
        let mut items = Vec::new();
        items
            .try_reserve_exact(n_searchable)
            .map_err(|e| AtriaError::from_reserve("tree items", e))?;
        items.extend(0..n_searchable);

        let max_parallel_depth = (rayon::current_num_threads() as f32).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);

        let tree = Self::build_tree_parallel(
            &points,
            items,
            &mut rng,
            params.cluster_max_points,
            max_parallel_depth,
        );

        let flat = Self::flatten_tree(tree, points.dimension(), n_searchable)?;

        Ok(BallTreeIndex {
            points,
            n_searchable,
            nodes: flat.nodes,
            centers_data: flat.centers_data,
            leaf_indices: flat.leaf_indices,
            leaf_dists: flat.leaf_dists,
            cluster_max_points: params.cluster_max_points,
            seed: params.seed,
        })
    }

    /// Build the whole tree
    ///
    /// ### Params
    ///
    /// * `points` - The point set
    /// * `items` - Which data points are in the tree
    /// * `rng` - Random number generator
    /// * `cluster_max_points` - Maximum leaf size
    /// * `max_parallel_depth` - Maximum depth until which to execute parallel
    ///   threading
    ///
    /// ### Returns
    ///
    /// The vec of `BuildNode`'s in pre-order
    fn build_tree_parallel(
        points: &PointSet<T, M>,
        items: Vec<usize>,
        rng: &mut StdRng,
        cluster_max_points: usize,
        max_parallel_depth: usize,
    ) -> Vec<BuildNode<T>> {
        let mut nodes = Vec::new();
        Self::build_node_local(
            points,
            items,
            &mut nodes,
            rng,
            cluster_max_points,
            0,
            max_parallel_depth,
        );
        nodes
    }

    /// Build a local node and its subtree
    ///
    /// Every split draws one seed per child from its own generator, so the
    /// resulting tree does not depend on which levels ran in parallel.
    ///
    /// ### Params
    ///
    /// * `points` - The point set
    /// * `items` - Which data points are in that node
    /// * `nodes` - Output arena
    /// * `rng` - Random number generator of this node
    /// * `cluster_max_points` - Maximum leaf size
    /// * `depth` - The current depth
    /// * `max_parallel_depth` - Maximum depth until which to execute parallel
    ///   threading
    ///
    /// ### Returns
    ///
    /// Position of the node in `nodes`
    fn build_node_local(
        points: &PointSet<T, M>,
        items: Vec<usize>,
        nodes: &mut Vec<BuildNode<T>>,
        rng: &mut StdRng,
        cluster_max_points: usize,
        depth: usize,
        max_parallel_depth: usize,
    ) -> usize {
        let metric = points.metric();
        let center = compute_centroid(points, &items);

        if items.len() <= cluster_max_points {
            let center_dists: Vec<T> = items
                .iter()
                .map(|&idx| metric.distance(&center, points.point(idx)))
                .collect();
            let radius = center_dists.iter().fold(T::zero(), |a, &b| a.max(b));

            let node_idx = nodes.len();
            nodes.push(BuildNode::Leaf {
                center,
                radius,
                items,
                center_dists,
            });
            return node_idx;
        }

        let radius = ball_radius(&center, points, &items);

        // cheap diameter approximation: random point -> furthest -> furthest
        let p0_idx = items[rng.random_range(0..items.len())];
        let p1_idx = find_furthest_from(points.point(p0_idx), points, &items);
        let p1 = points.point(p1_idx);
        let p2_idx = find_furthest_from(p1, points, &items);
        let p2 = points.point(p2_idx);

        let (mut left_items, mut right_items) = partition_by_nearest(points, &items, p1, p2);

        // all points coincide
        if left_items.is_empty() || right_items.is_empty() {
            let mid = items.len() / 2;
            left_items = items[..mid].to_vec();
            right_items = items[mid..].to_vec();
        }

        let seed_left: u64 = rng.random();
        let seed_right: u64 = rng.random();

        let node_idx = nodes.len();
        nodes.push(BuildNode::Split {
            center,
            radius,
            size: items.len(),
            left: 0,
            right: 0,
        });
        drop(items);

        let (left_idx, right_idx) = if depth < max_parallel_depth {
            let (mut left_tree, mut right_tree) = rayon::join(
                || {
                    let mut left_rng = StdRng::seed_from_u64(seed_left);
                    Self::build_subtree(
                        points,
                        left_items,
                        &mut left_rng,
                        cluster_max_points,
                        depth + 1,
                        max_parallel_depth,
                    )
                },
                || {
                    let mut right_rng = StdRng::seed_from_u64(seed_right);
                    Self::build_subtree(
                        points,
                        right_items,
                        &mut right_rng,
                        cluster_max_points,
                        depth + 1,
                        max_parallel_depth,
                    )
                },
            );

            let left_offset = nodes.len();
            Self::adjust_subtree_indices(&mut left_tree, left_offset);
            nodes.extend(left_tree);

            let right_offset = nodes.len();
            Self::adjust_subtree_indices(&mut right_tree, right_offset);
            nodes.extend(right_tree);

            (left_offset, right_offset)
        } else {
            let mut left_rng = StdRng::seed_from_u64(seed_left);
            let left_idx = Self::build_node_local(
                points,
                left_items,
                nodes,
                &mut left_rng,
                cluster_max_points,
                depth + 1,
                max_parallel_depth,
            );
            let mut right_rng = StdRng::seed_from_u64(seed_right);
            let right_idx = Self::build_node_local(
                points,
                right_items,
                nodes,
                &mut right_rng,
                cluster_max_points,
                depth + 1,
                max_parallel_depth,
            );
            (left_idx, right_idx)
        };

        if let BuildNode::Split {
            ref mut left,
            ref mut right,
            ..
        } = nodes[node_idx]
        {
            *left = left_idx;
            *right = right_idx;
        }

        node_idx
    }

    /// Helper function to build a sub tree into its own arena
    ///
    /// ### Params
    ///
    /// * `points` - The point set
    /// * `items` - Which data points are in that node
    /// * `rng` - Random number generator
    /// * `cluster_max_points` - Maximum leaf size
    /// * `depth` - The current depth
    /// * `max_parallel_depth` - Maximum depth until which to execute parallel
    ///   threading
    fn build_subtree(
        points: &PointSet<T, M>,
        items: Vec<usize>,
        rng: &mut StdRng,
        cluster_max_points: usize,
        depth: usize,
        max_parallel_depth: usize,
    ) -> Vec<BuildNode<T>> {
        let mut nodes = Vec::new();
        Self::build_node_local(
            points,
            items,
            &mut nodes,
            rng,
            cluster_max_points,
            depth,
            max_parallel_depth,
        );
        nodes
    }

    fn adjust_subtree_indices(nodes: &mut [BuildNode<T>], offset: usize) {
        for node in nodes.iter_mut() {
            if let BuildNode::Split { left, right, .. } = node {
                *left += offset;
                *right += offset;
            }
        }
    }

    /// Flatten the tree structures
    ///
    /// ### Params
    ///
    /// * `tree` - The vector of the BuildNodes in pre-order
    /// * `dim` - Dimensionality of the data
    /// * `n_items` - Number of points in the tree
    ///
    /// ### Returns
    ///
    /// The arena, or `ResourceExhausted` if it cannot be allocated
    fn flatten_tree(tree: Vec<BuildNode<T>>, dim: usize, n_items: usize) -> Result<FlatTree<T>> {
        let mut nodes = Vec::new();
        let mut centers_data = Vec::new();
        let mut leaf_indices = Vec::new();
        let mut leaf_dists = Vec::new();

        nodes
            .try_reserve_exact(tree.len())
            .map_err(|e| AtriaError::from_reserve("tree arena", e))?;
        centers_data
            .try_reserve_exact(tree.len() * dim)
            .map_err(|e| AtriaError::from_reserve("cluster centres", e))?;
        leaf_indices
            .try_reserve_exact(n_items)
            .map_err(|e| AtriaError::from_reserve("leaf indices", e))?;
        leaf_dists
            .try_reserve_exact(n_items)
            .map_err(|e| AtriaError::from_reserve("leaf distances", e))?;

        for node in tree {
            match node {
                BuildNode::Split {
                    center,
                    radius,
                    size,
                    left,
                    right,
                } => {
                    centers_data.extend(center);
                    nodes.push(BallNode {
                        is_leaf: false,
                        child_a: left as u32,
                        child_b: right as u32,
                        size: size as u32,
                        radius,
                    });
                }
                BuildNode::Leaf {
                    center,
                    radius,
                    items,
                    center_dists,
                } => {
                    centers_data.extend(center);

                    let start = leaf_indices.len() as u32;
                    let len = items.len() as u32;
                    leaf_indices.extend(items);
                    leaf_dists.extend(center_dists);

                    nodes.push(BallNode {
                        is_leaf: true,
                        child_a: start,
                        child_b: len,
                        size: len,
                        radius,
                    });
                }
            }
        }

        Ok(FlatTree {
            nodes,
            centers_data,
            leaf_indices,
            leaf_dists,
        })
    }

    ///////////////////
    // Introspection //
    ///////////////////

    /// Total number of points in the point set
    pub fn point_count(&self) -> usize {
        self.points.size()
    }

    /// Number of points that can be returned as neighbours
    pub fn searchable_count(&self) -> usize {
        self.n_searchable
    }

    /// Dimensionality of the points
    pub fn dimension(&self) -> usize {
        self.points.dimension()
    }

    /// Radius of the root cluster, an approximate scale of the data set
    pub fn data_set_radius(&self) -> T {
        self.nodes[ROOT as usize].radius
    }

    /// The underlying point set
    pub fn points(&self) -> &PointSet<T, M> {
        &self.points
    }

    /// The metric of the index
    pub fn metric(&self) -> M {
        self.points.metric()
    }

    /// Maximum leaf size used at construction
    pub fn cluster_max_points(&self) -> usize {
        self.cluster_max_points
    }

    /// Seed used at construction
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of clusters in the tree
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaf clusters in the tree
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_leaf).count()
    }

    /// Depth of the tree (a single leaf has depth 1)
    pub fn depth(&self) -> usize {
        let mut max_depth = 0;
        let mut stack = vec![(ROOT, 1_usize)];
        while let Some((node_idx, depth)) = stack.pop() {
            let node = &self.nodes[node_idx as usize];
            max_depth = max_depth.max(depth);
            if !node.is_leaf {
                stack.push((node.child_a, depth + 1));
                stack.push((node.child_b, depth + 1));
            }
        }
        max_depth
    }

    /// Number of points not hidden by the exclusion window
    ///
    /// ### Params
    ///
    /// * `exclude` - Optional exclusion window
    ///
    /// ### Returns
    ///
    /// Number of points a query with this window can return
    pub fn eligible_count(&self, exclude: Option<ExclusionWindow>) -> usize {
        self.n_searchable - exclude.map_or(0, |w| w.overlap(self.n_searchable))
    }

    /// Returns the size of the index in bytes
    ///
    /// ### Returns
    ///
    /// Number of bytes used by the index
    pub fn memory_usage_bytes(&self) -> usize {
        std::mem::size_of_val(self)
            + self.points.memory_usage_bytes()
            - std::mem::size_of_val(&self.points)
            + self.nodes.capacity() * std::mem::size_of::<BallNode<T>>()
            + self.centers_data.capacity() * std::mem::size_of::<T>()
            + self.leaf_indices.capacity() * std::mem::size_of::<usize>()
            + self.leaf_dists.capacity() * std::mem::size_of::<T>()
    }

    /////////////
    // Helpers //
    /////////////

    #[inline(always)]
    fn center(&self, node_idx: u32) -> &[T] {
        let dim = self.points.dimension();
        let start = node_idx as usize * dim;
        &self.centers_data[start..start + dim]
    }

    #[inline(always)]
    fn center_dist(&self, node_idx: u32, query_vec: &[T]) -> T {
        self.points.metric().distance(self.center(node_idx), query_vec)
    }

    fn check_query(&self, query_vec: &[T]) -> Result<()> {
        if query_vec.len() != self.dimension() {
            return Err(AtriaError::invalid_argument(format!(
                "Query has {} dimensions, index expects {}",
                query_vec.len(),
                self.dimension()
            )));
        }
        if query_vec.iter().any(|v| !v.is_finite()) {
            return Err(AtriaError::invalid_argument(
                "Query contains non-finite values",
            ));
        }
        Ok(())
    }

    fn check_knn_args(&self, k: usize, epsilon: T, exclude: Option<ExclusionWindow>) -> Result<()> {
        if k == 0 {
            return Err(AtriaError::invalid_argument(
                "Number of neighbours must be positive",
            ));
        }
        if !epsilon.is_finite() || epsilon < T::zero() {
            return Err(AtriaError::invalid_argument(format!(
                "epsilon must be finite and non-negative, got {:?}",
                epsilon
            )));
        }
        let available = self.eligible_count(exclude);
        if k > available {
            return Err(AtriaError::insufficient_data(k, available));
        }
        Ok(())
    }

    fn check_radius(radius: T) -> Result<()> {
        if radius.is_nan() || radius < T::zero() {
            return Err(AtriaError::invalid_argument(format!(
                "Radius can not be negative, got {:?}",
                radius
            )));
        }
        Ok(())
    }

    ///////////
    // Query //
    ///////////

    /// k-nearest-neighbour query
    ///
    /// Best-first traversal: clusters are popped in order of their lower
    /// bound `max(0, d(q, c) - r)`, and the search stops once that bound
    /// exceeds `kth / (1 + epsilon)`. With `epsilon = 0` the result is exact.
    ///
    /// ### Params
    ///
    /// * `query_vec` - The vector to query against
    /// * `k` - Number of neighbours to return
    /// * `exclude` - Optional window of point indices to skip
    /// * `epsilon` - Relative error tolerance (`0` = exact)
    ///
    /// ### Returns
    ///
    /// Exactly `k` neighbours sorted by ascending distance, ties by index
    pub fn k_nearest(
        &self,
        query_vec: &[T],
        k: usize,
        exclude: Option<ExclusionWindow>,
        epsilon: T,
    ) -> Result<Vec<Neighbour<T>>> {
        self.check_query(query_vec)?;
        self.check_knn_args(k, epsilon, exclude)?;

        let scale = T::one() / (T::one() + epsilon);
        let mut top_k = NeighbourHeap::with_capacity(k);
        let mut pq: BinaryHeap<BacktrackEntry<T>> = BinaryHeap::with_capacity(64);

        let root_dist = self.center_dist(ROOT, query_vec);
        let root_radius = self.nodes[ROOT as usize].radius;
        let slack = rounding_slack(root_dist, root_radius, self.dimension());
        pq.push(BacktrackEntry {
            lower_bound: ball_lower_bound(root_dist, root_radius),
            center_dist: root_dist,
            node_idx: ROOT,
        });

        while let Some(entry) = pq.pop() {
            if entry.lower_bound - slack > top_k.worst_distance() * scale {
                break;
            }

            let node = &self.nodes[entry.node_idx as usize];

            if node.is_leaf {
                let start = node.child_a as usize;
                let end = start + node.child_b as usize;

                for slot in start..end {
                    let idx = self.leaf_indices[slot];
                    if is_excluded(exclude, idx) {
                        continue;
                    }

                    let kth_dist = top_k.worst_distance();
                    let lower_bound = (entry.center_dist - self.leaf_dists[slot]).abs();
                    if lower_bound - slack > kth_dist * scale {
                        continue;
                    }

                    let dist = self
                        .points
                        .distance_to_query_bounded(idx, query_vec, kth_dist);
                    top_k.offer(idx, dist);
                }
            } else {
                for child in [node.child_a, node.child_b] {
                    let child_node = &self.nodes[child as usize];
                    let center_dist = self.center_dist(child, query_vec);
                    let lower_bound = ball_lower_bound(center_dist, child_node.radius);

                    if lower_bound - slack <= top_k.worst_distance() * scale {
                        pq.push(BacktrackEntry {
                            lower_bound,
                            center_dist,
                            node_idx: child,
                        });
                    }
                }
            }
        }

        Ok(top_k.into_sorted_vec())
    }

    /// Walk every eligible point within `radius` of the query
    ///
    /// Depth-first with an explicit stack; the nearer child is visited first.
    fn visit_range<F>(
        &self,
        query_vec: &[T],
        radius: T,
        exclude: Option<ExclusionWindow>,
        mut on_hit: F,
    ) where
        F: FnMut(usize, T),
    {
        let root_dist = self.center_dist(ROOT, query_vec);
        let slack = rounding_slack(root_dist, self.nodes[ROOT as usize].radius, self.dimension());
        let mut stack: Vec<(u32, T)> = Vec::with_capacity(64);
        stack.push((ROOT, root_dist));

        while let Some((node_idx, center_dist)) = stack.pop() {
            let node = &self.nodes[node_idx as usize];
            if ball_lower_bound(center_dist, node.radius) - slack > radius {
                continue;
            }

            if node.is_leaf {
                let start = node.child_a as usize;
                let end = start + node.child_b as usize;

                for slot in start..end {
                    let idx = self.leaf_indices[slot];
                    if is_excluded(exclude, idx) {
                        continue;
                    }
                    if (center_dist - self.leaf_dists[slot]).abs() - slack > radius {
                        continue;
                    }

                    let dist = self
                        .points
                        .distance_to_query_bounded(idx, query_vec, radius);
                    if dist <= radius {
                        on_hit(idx, dist);
                    }
                }
            } else {
                let dist_a = self.center_dist(node.child_a, query_vec);
                let dist_b = self.center_dist(node.child_b, query_vec);

                if dist_a <= dist_b {
                    stack.push((node.child_b, dist_b));
                    stack.push((node.child_a, dist_a));
                } else {
                    stack.push((node.child_a, dist_a));
                    stack.push((node.child_b, dist_b));
                }
            }
        }
    }

    /// Fixed-radius query
    ///
    /// ### Params
    ///
    /// * `query_vec` - The vector to query against
    /// * `radius` - Search radius (inclusive, non-negative)
    /// * `exclude` - Optional window of point indices to skip
    ///
    /// ### Returns
    ///
    /// All eligible points within `radius`, sorted by ascending distance,
    /// ties by index
    pub fn range_search(
        &self,
        query_vec: &[T],
        radius: T,
        exclude: Option<ExclusionWindow>,
    ) -> Result<Vec<Neighbour<T>>> {
        self.check_query(query_vec)?;
        Self::check_radius(radius)?;

        let mut results = Vec::new();
        self.visit_range(query_vec, radius, exclude, |idx, dist| {
            results.push(Neighbour::new(idx, dist));
        });
        sort_neighbours(&mut results);

        Ok(results)
    }

    /// Count the eligible points within `radius` without collecting them
    ///
    /// ### Params
    ///
    /// * `query_vec` - The vector to query against
    /// * `radius` - Search radius (inclusive, non-negative)
    /// * `exclude` - Optional window of point indices to skip
    ///
    /// ### Returns
    ///
    /// Number of points `range_search` would return
    pub fn count_range(
        &self,
        query_vec: &[T],
        radius: T,
        exclude: Option<ExclusionWindow>,
    ) -> Result<usize> {
        self.check_query(query_vec)?;
        Self::check_radius(radius)?;

        let mut count = 0;
        self.visit_range(query_vec, radius, exclude, |_, _| count += 1);
        Ok(count)
    }

    /// k-NN query with a faer row
    ///
    /// ### Params
    ///
    /// * `query_row` - The row to query.
    /// * `k` - Number of neighbours to return.
    /// * `exclude` - Optional window of point indices to skip
    /// * `epsilon` - Relative error tolerance
    ///
    /// ### Returns
    ///
    /// See [`Self::k_nearest`]
    pub fn k_nearest_row(
        &self,
        query_row: RowRef<T>,
        k: usize,
        exclude: Option<ExclusionWindow>,
        epsilon: T,
    ) -> Result<Vec<Neighbour<T>>> {
        let query_vec: Vec<T> = query_row.iter().copied().collect();
        self.k_nearest(&query_vec, k, exclude, epsilon)
    }

    /// Range query with a faer row
    ///
    /// ### Params
    ///
    /// * `query_row` - The row to query.
    /// * `radius` - Search radius
    /// * `exclude` - Optional window of point indices to skip
    ///
    /// ### Returns
    ///
    /// See [`Self::range_search`]
    pub fn range_search_row(
        &self,
        query_row: RowRef<T>,
        radius: T,
        exclude: Option<ExclusionWindow>,
    ) -> Result<Vec<Neighbour<T>>> {
        let query_vec: Vec<T> = query_row.iter().copied().collect();
        self.range_search(&query_vec, radius, exclude)
    }

    /// Generate the kNN graph of the point set against itself
    ///
    /// Each stored point queries the tree with the Theiler window
    /// `[i - theiler_window, i + theiler_window]` hidden, which removes the
    /// point itself and its temporal neighbours.
    ///
    /// ### Params
    ///
    /// * `k` - Number of neighbours to return.
    /// * `theiler_window` - Half width of the exclusion window
    /// * `epsilon` - Relative error tolerance
    /// * `verbose` - Controls verbosity
    ///
    /// ### Returns
    ///
    /// `(indices, distances)` with one row per stored point
    pub fn generate_knn(
        &self,
        k: usize,
        theiler_window: usize,
        epsilon: T,
        verbose: bool,
    ) -> Result<(Vec<Vec<usize>>, Vec<Vec<T>>)> {
        let n = self.point_count();
        let counter = AtomicUsize::new(0);

        let results: Vec<Vec<Neighbour<T>>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let exclude = Some(ExclusionWindow::around(i, theiler_window));
                let res = self.k_nearest(self.points.point(i), k, exclude, epsilon);

                if verbose {
                    let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
                    if count.is_multiple_of(100_000) {
                        println!(
                            "  Processed {} / {} samples.",
                            count.separate_with_underscores(),
                            n.separate_with_underscores()
                        );
                    }
                }

                res
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(results.into_iter().map(unzip_neighbours).unzip())
    }
}

///////////////////
// KnnValidation //
///////////////////

/// KnnValidation trait implementation for the BallTreeIndex
impl<T, M> KnnValidation<T> for BallTreeIndex<T, M>
where
    T: AtriaFloat,
    M: Metric<T>,
{
    fn query_for_validation(
        &self,
        query_vec: &[T],
        k: usize,
        exclude: Option<ExclusionWindow>,
    ) -> Result<Vec<Neighbour<T>>> {
        self.k_nearest(query_vec, k, exclude, T::zero())
    }

    fn n(&self) -> usize {
        self.n_searchable
    }

    fn dim(&self) -> usize {
        self.points.dimension()
    }

    fn sample(&self, idx: usize) -> &[T] {
        self.points.point(idx)
    }

    fn distance_to_query(&self, idx: usize, query_vec: &[T]) -> T {
        self.points.distance_to_query(idx, query_vec)
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use faer::Mat;

    fn create_scenario_matrix() -> Mat<f32> {
        let data = [
            0.0, 0.0, // Point 0
            1.0, 0.0, // Point 1
            0.0, 1.0, // Point 2
            5.0, 5.0, // Point 3
            10.0, 10.0, // Point 4
        ];
        Mat::from_fn(5, 2, |i, j| data[i * 2 + j])
    }

    fn random_matrix(n: usize, dim: usize, seed: u64) -> Mat<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let data: Vec<f64> = (0..n * dim).map(|_| rng.random_range(-1.0..1.0)).collect();
        Mat::from_fn(n, dim, |i, j| data[i * dim + j])
    }

    fn random_query(dim: usize, rng: &mut StdRng) -> Vec<f64> {
        (0..dim).map(|_| rng.random_range(-1.2..1.2)).collect()
    }

    fn indices_of<T>(res: &[Neighbour<T>]) -> Vec<usize> {
        res.iter().map(|nb| nb.index).collect()
    }

    fn small_leaves() -> AtriaParams {
        AtriaParams::default()
            .with_cluster_max_points(4)
            .with_seed(42)
    }

    /// Walk the arena and check the structural invariants
    fn check_tree_invariants<M: Metric<f64>>(index: &BallTreeIndex<f64, M>) {
        let mut seen = vec![0_usize; index.searchable_count()];
        let mut stack = vec![ROOT];

        while let Some(node_idx) = stack.pop() {
            let node = index.nodes[node_idx as usize];
            let center = index.center(node_idx).to_vec();

            if node.is_leaf {
                assert!(node.child_b as usize <= index.cluster_max_points);
                let start = node.child_a as usize;
                let end = start + node.child_b as usize;
                for slot in start..end {
                    let idx = index.leaf_indices[slot];
                    seen[idx] += 1;
                    let d = index.metric().distance(&center, index.points.point(idx));
                    assert_eq!(d, index.leaf_dists[slot]);
                    assert!(d <= node.radius);
                }
            } else {
                let a = index.nodes[node.child_a as usize];
                let b = index.nodes[node.child_b as usize];
                assert_eq!(node.size, a.size + b.size);
                assert!(node.child_a > node_idx && node.child_b > node_idx);
                stack.push(node.child_a);
                stack.push(node.child_b);
            }

            // radius bounds every point in the subtree
            let mut sub = vec![node_idx];
            while let Some(s) = sub.pop() {
                let sn = index.nodes[s as usize];
                if sn.is_leaf {
                    let start = sn.child_a as usize;
                    for slot in start..start + sn.child_b as usize {
                        let p = index.points.point(index.leaf_indices[slot]);
                        assert!(index.metric().distance(&center, p) <= node.radius);
                    }
                } else {
                    sub.push(sn.child_a);
                    sub.push(sn.child_b);
                }
            }
        }

        assert!(seen.iter().all(|&c| c == 1), "every point in exactly one leaf");
        assert_eq!(index.nodes[ROOT as usize].size as usize, index.searchable_count());
    }

    #[test]
    fn test_ball_tree_index_creation() {
        let mat = create_scenario_matrix();
        let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &AtriaParams::default())
            .unwrap();

        assert_eq!(index.point_count(), 5);
        assert_eq!(index.searchable_count(), 5);
        assert_eq!(index.dimension(), 2);
        assert_eq!(index.n_nodes(), 1);
        assert_eq!(index.n_leaves(), 1);
        assert_eq!(index.depth(), 1);
        assert!(index.memory_usage_bytes() > 0);
    }

    #[test]
    fn test_scenario_knn_tie_break() {
        let mat = create_scenario_matrix();
        for leaf_size in [1, 2, 64] {
            let params = AtriaParams::default().with_cluster_max_points(leaf_size);
            let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &params).unwrap();

            let res = index.k_nearest(&[0.0, 0.0], 2, None, 0.0).unwrap();
            assert_eq!(res, vec![Neighbour::new(0, 0.0), Neighbour::new(1, 1.0)]);
        }
    }

    #[test]
    fn test_scenario_self_exclusion() {
        let mat = create_scenario_matrix();
        for leaf_size in [1, 2, 64] {
            let params = AtriaParams::default().with_cluster_max_points(leaf_size);
            let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &params).unwrap();

            let res = index
                .k_nearest(&[0.0, 0.0], 1, Some(ExclusionWindow::new(0, 0)), 0.0)
                .unwrap();
            assert_eq!(res, vec![Neighbour::new(1, 1.0)]);
        }
    }

    #[test]
    fn test_scenario_range() {
        let mat = create_scenario_matrix();
        for leaf_size in [1, 2, 64] {
            let params = AtriaParams::default().with_cluster_max_points(leaf_size);
            let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &params).unwrap();

            let res = index.range_search(&[0.0, 0.0], 1.5, None).unwrap();
            assert_eq!(indices_of(&res), vec![0, 1, 2]);
            assert_relative_eq!(res[0].distance, 0.0);
            assert_relative_eq!(res[1].distance, 1.0);
            assert_relative_eq!(res[2].distance, 1.0);
            assert_eq!(index.count_range(&[0.0, 0.0], 1.5, None).unwrap(), 3);
        }
    }

    #[test]
    fn test_data_set_radius() {
        let mat = create_scenario_matrix();
        let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &AtriaParams::default())
            .unwrap();

        // centroid is (3.2, 3.2), furthest point is (10, 10)
        let expected = (2.0_f32 * 6.8 * 6.8).sqrt();
        assert_relative_eq!(index.data_set_radius(), expected, epsilon = 1e-4);
    }

    #[test]
    fn test_tree_invariants() {
        let mat = random_matrix(500, 5, 1);
        for leaf_size in [1, 3, 16, 64] {
            for metric in [Dist::Euclidean, Dist::Maximum, Dist::Manhattan] {
                let params = AtriaParams::default()
                    .with_cluster_max_points(leaf_size)
                    .with_seed(7);
                let index = BallTreeIndex::new(mat.as_ref(), metric, &params).unwrap();
                check_tree_invariants(&index);
                assert_eq!(index.n_nodes(), 2 * index.n_leaves() - 1);
            }
        }
    }

    #[test]
    fn test_knn_matches_brute_force() {
        let mat = random_matrix(700, 6, 3);
        let mut rng = StdRng::seed_from_u64(99);

        for metric in [Dist::Euclidean, Dist::Maximum, Dist::Manhattan] {
            let index = BallTreeIndex::new(mat.as_ref(), metric, &small_leaves()).unwrap();

            for _ in 0..25 {
                let query = random_query(6, &mut rng);
                for k in [1, 5, 20] {
                    let res = index.k_nearest(&query, k, None, 0.0).unwrap();
                    let truth = index.exhaustive_query(&query, k, None);
                    assert_eq!(res, truth);
                }
            }
        }
    }

    #[test]
    fn test_knn_with_exclusion_matches_brute_force() {
        let mat = random_matrix(400, 3, 5);
        let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &small_leaves()).unwrap();

        for i in (0..400).step_by(37) {
            let query = index.points().point(i).to_vec();
            let window = ExclusionWindow::around(i, 10);
            let res = index.k_nearest(&query, 8, Some(window), 0.0).unwrap();
            let truth = index.exhaustive_query(&query, 8, Some(window));

            assert_eq!(res, truth);
            assert!(res.iter().all(|nb| !window.contains(nb.index)));
        }
    }

    #[test]
    fn test_approximate_knn_bound() {
        let mat = random_matrix(1000, 8, 11);
        let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &small_leaves()).unwrap();
        let mut rng = StdRng::seed_from_u64(5);

        for epsilon in [0.1, 0.5, 2.0] {
            for _ in 0..20 {
                let query = random_query(8, &mut rng);
                let k = 10;
                let approx = index.k_nearest(&query, k, None, epsilon).unwrap();
                let exact = index.exhaustive_query(&query, k, None);

                assert_eq!(approx.len(), k);
                let kth = exact[k - 1].distance;
                for nb in &approx {
                    assert!(nb.distance <= (1.0 + epsilon) * kth + 1e-12);
                }
                for w in approx.windows(2) {
                    assert!(w[0].distance <= w[1].distance);
                }
            }
        }
    }

    #[test]
    fn test_range_matches_brute_force() {
        let mat = random_matrix(600, 4, 21);
        let mut rng = StdRng::seed_from_u64(8);

        for metric in [Dist::Euclidean, Dist::Maximum, Dist::Manhattan] {
            let index = BallTreeIndex::new(mat.as_ref(), metric, &small_leaves()).unwrap();
            for radius in [0.0, 0.1, 0.4, 1.0, 10.0] {
                let query = random_query(4, &mut rng);
                let window = Some(ExclusionWindow::new(100, 250));

                let res = index.range_search(&query, radius, window).unwrap();
                let truth = index.exhaustive_range(&query, radius, window);
                assert_eq!(res, truth);
                assert_eq!(index.count_range(&query, radius, window).unwrap(), truth.len());
            }
        }
    }

    /// All points of `{-1, 0, 1}^4` with three non-zero coordinates, plus a
    /// few points at other distances from the origin
    fn sqrt3_shell() -> Mat<f64> {
        let mut rows: Vec<[f64; 4]> = Vec::new();
        for zero in 0..4 {
            for signs in 0..8_u32 {
                let mut row = [0.0; 4];
                let mut bit = 0;
                for (j, v) in row.iter_mut().enumerate() {
                    if j != zero {
                        *v = if signs >> bit & 1 == 1 { -1.0 } else { 1.0 };
                        bit += 1;
                    }
                }
                rows.push(row);
            }
        }
        rows.push([2.0, 0.0, 0.0, 0.0]);
        rows.push([1.0, 1.0, 0.0, 0.0]);
        rows.push([0.0, 0.0, 0.5, 0.0]);
        rows.push([1.0, 1.0, 1.0, 1.0]);
        Mat::from_fn(rows.len(), 4, |i, j| rows[i][j])
    }

    #[test]
    fn test_range_includes_point_on_irrational_boundary() {
        let mat = Mat::from_fn(1, 4, |_, j| if j < 3 { 1.0_f64 } else { 0.0 });
        let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &AtriaParams::default())
            .unwrap();
        let query = [0.0_f64; 4];
        let radius = 3.0_f64.sqrt();

        let res = index.range_search(&query, radius, None).unwrap();
        assert_eq!(res, vec![Neighbour::new(0, radius)]);
        assert_eq!(index.count_range(&query, radius, None).unwrap(), 1);
    }

    #[test]
    fn test_range_on_irrational_shell_matches_brute_force() {
        let mat = sqrt3_shell();
        let query = [0.0_f64; 4];
        let radius = 3.0_f64.sqrt();

        for seed in 0..20 {
            for leaf in [1, 2, 4] {
                let params = AtriaParams::default()
                    .with_cluster_max_points(leaf)
                    .with_seed(seed);
                let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &params).unwrap();

                let res = index.range_search(&query, radius, None).unwrap();
                let truth = index.exhaustive_range(&query, radius, None);
                assert_eq!(truth.len(), 34);
                assert_eq!(res, truth);
            }
        }
    }

    #[test]
    fn test_knn_ties_on_irrational_distance_match_brute_force() {
        let mat = sqrt3_shell();
        let query = [0.0_f64; 4];

        for seed in 0..20 {
            for leaf in [1, 2, 4] {
                let params = AtriaParams::default()
                    .with_cluster_max_points(leaf)
                    .with_seed(seed);
                let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &params).unwrap();

                for k in [1, 3, 10] {
                    let res = index.k_nearest(&query, k, None, 0.0).unwrap();
                    let truth = index.exhaustive_query(&query, k, None);
                    assert_eq!(res, truth);
                }
            }
        }
    }

    #[test]
    fn test_range_radius_zero_returns_duplicates() {
        let data = [
            1.0, 1.0, // 0
            2.0, 2.0, // 1
            1.0, 1.0, // 2 (duplicate of 0)
            3.0, 0.0, // 3
        ];
        let mat = Mat::from_fn(4, 2, |i, j| data[i * 2 + j]);
        let params = AtriaParams::default().with_cluster_max_points(1);
        let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &params).unwrap();

        let res = index.range_search(&[1.0, 1.0], 0.0, None).unwrap();
        assert_eq!(res, vec![Neighbour::new(0, 0.0), Neighbour::new(2, 0.0)]);

        let res = index
            .range_search(&[1.0, 1.0], 0.0, Some(ExclusionWindow::new(0, 0)))
            .unwrap();
        assert_eq!(res, vec![Neighbour::new(2, 0.0)]);

        let res = index.range_search(&[1.5, 1.0], 0.0, None).unwrap();
        assert!(res.is_empty());
    }

    #[test]
    fn test_shrinking_exclusion_keeps_admissible_neighbours() {
        let mat = random_matrix(300, 2, 17);
        let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &small_leaves()).unwrap();
        let query = index.points().point(150).to_vec();

        let wide = ExclusionWindow::around(150, 40);
        let narrow = ExclusionWindow::around(150, 5);
        let r_wide = index.range_search(&query, 0.3, Some(wide)).unwrap();
        let r_narrow = index.range_search(&query, 0.3, Some(narrow)).unwrap();
        let r_none = index.range_search(&query, 0.3, None).unwrap();

        for nb in &r_wide {
            assert!(r_narrow.contains(nb));
        }
        for nb in &r_narrow {
            assert!(r_none.contains(nb));
        }
    }

    #[test]
    fn test_k_equal_to_eligible_returns_all() {
        let mat = random_matrix(50, 3, 2);
        let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &small_leaves()).unwrap();
        let window = Some(ExclusionWindow::new(10, 19));

        let res = index.k_nearest(&[0.0, 0.0, 0.0], 40, window, 0.0).unwrap();
        assert_eq!(res.len(), 40);
        let mut idx = indices_of(&res);
        idx.sort_unstable();
        let expected: Vec<usize> = (0..10).chain(20..50).collect();
        assert_eq!(idx, expected);
    }

    #[test]
    fn test_k_larger_than_eligible_fails() {
        let mat = random_matrix(50, 3, 2);
        let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &small_leaves()).unwrap();

        let err = index
            .k_nearest(&[0.0; 3], 41, Some(ExclusionWindow::new(10, 19)), 0.0)
            .unwrap_err();
        assert_eq!(err, AtriaError::insufficient_data(41, 40));

        let err = index.k_nearest(&[0.0; 3], 51, None, 0.0).unwrap_err();
        assert_eq!(err, AtriaError::insufficient_data(51, 50));
    }

    #[test]
    fn test_invalid_query_arguments() {
        let mat = create_scenario_matrix();
        let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &AtriaParams::default())
            .unwrap();

        let is_invalid = |r: Result<Vec<Neighbour<f32>>>| {
            matches!(r, Err(AtriaError::InvalidArgument { .. }))
        };

        assert!(is_invalid(index.k_nearest(&[0.0, 0.0], 0, None, 0.0)));
        assert!(is_invalid(index.k_nearest(&[0.0, 0.0], 1, None, -0.1)));
        assert!(is_invalid(index.k_nearest(&[0.0, 0.0], 1, None, f32::NAN)));
        assert!(is_invalid(index.k_nearest(&[0.0, 0.0, 0.0], 1, None, 0.0)));
        assert!(is_invalid(index.k_nearest(&[f32::NAN, 0.0], 1, None, 0.0)));
        assert!(is_invalid(index.range_search(&[0.0, 0.0], -1.0, None)));
        assert!(is_invalid(index.range_search(&[0.0, 0.0], f32::NAN, None)));
        assert!(is_invalid(index.range_search(&[0.0], 1.0, None)));
    }

    #[test]
    fn test_invalid_build_arguments() {
        let mat = create_scenario_matrix();

        let params = AtriaParams::default().with_cluster_max_points(0);
        let err = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &params)
            .err()
            .unwrap();
        assert!(matches!(err, AtriaError::InvalidArgument { .. }));

        let params = AtriaParams::default().with_exclude_samples(5);
        let err = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &params)
            .err()
            .unwrap();
        assert!(matches!(err, AtriaError::InvalidArgument { .. }));

        let empty = Mat::<f32>::zeros(0, 2);
        let err = BallTreeIndex::new(empty.as_ref(), Dist::Euclidean, &AtriaParams::default())
            .err()
            .unwrap();
        assert!(matches!(err, AtriaError::InvalidArgument { .. }));
    }

    #[test]
    fn test_exclude_samples_hides_tail() {
        let mat = random_matrix(100, 2, 4);
        let params = small_leaves().with_exclude_samples(30);
        let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &params).unwrap();

        assert_eq!(index.point_count(), 100);
        assert_eq!(index.searchable_count(), 70);
        check_tree_invariants(&index);

        // a tail point never finds itself
        let query = index.points().point(90).to_vec();
        let res = index.k_nearest(&query, 5, None, 0.0).unwrap();
        assert!(res.iter().all(|nb| nb.index < 70));
        assert_eq!(res, index.exhaustive_query(&query, 5, None));

        let err = index.k_nearest(&query, 71, None, 0.0).unwrap_err();
        assert_eq!(err, AtriaError::insufficient_data(71, 70));
    }

    #[test]
    fn test_all_points_identical() {
        let mat = Mat::from_fn(40, 3, |_, _| 2.5_f64);
        let params = AtriaParams::default().with_cluster_max_points(3);
        let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &params).unwrap();

        check_tree_invariants(&index);
        assert_eq!(index.data_set_radius(), 0.0);

        let res = index.k_nearest(&[2.5, 2.5, 2.5], 4, None, 0.0).unwrap();
        assert_eq!(indices_of(&res), vec![0, 1, 2, 3]);
        assert_eq!(index.range_search(&[2.5, 2.5, 2.5], 0.0, None).unwrap().len(), 40);
    }

    #[test]
    fn test_ball_tree_reproducibility() {
        let mat = random_matrix(800, 4, 13);
        let params = small_leaves().with_seed(1234);

        let index1 = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &params).unwrap();
        let index2 = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &params).unwrap();

        assert_eq!(index1.nodes, index2.nodes);
        assert_eq!(index1.leaf_indices, index2.leaf_indices);
        assert_eq!(index1.centers_data, index2.centers_data);

        let query = vec![0.1, -0.3, 0.2, 0.0];
        assert_eq!(
            index1.k_nearest(&query, 10, None, 0.0).unwrap(),
            index2.k_nearest(&query, 10, None, 0.0).unwrap()
        );
    }

    #[test]
    fn test_tree_shape_independent_of_thread_count() {
        let mat = random_matrix(1000, 3, 31);
        let params = small_leaves().with_seed(77);

        let single = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap()
            .install(|| BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &params).unwrap());
        let multi = rayon::ThreadPoolBuilder::new()
            .num_threads(8)
            .build()
            .unwrap()
            .install(|| BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &params).unwrap());

        assert_eq!(single.nodes, multi.nodes);
        assert_eq!(single.leaf_indices, multi.leaf_indices);
    }

    #[test]
    fn test_ball_tree_different_seeds() {
        let mat = random_matrix(300, 3, 19);
        let index1 = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &small_leaves()).unwrap();
        let index2 = BallTreeIndex::new(
            mat.as_ref(),
            Dist::Euclidean,
            &small_leaves().with_seed(123),
        )
        .unwrap();

        // shapes may differ, answers may not
        let query = vec![0.5, 0.5, 0.0];
        assert_eq!(
            index1.k_nearest(&query, 7, None, 0.0).unwrap(),
            index2.k_nearest(&query, 7, None, 0.0).unwrap()
        );
    }

    #[test]
    fn test_generic_metric_struct() {
        let mat = random_matrix(200, 3, 23);
        let index = BallTreeIndex::new(mat.as_ref(), Maximum, &small_leaves()).unwrap();
        let query = vec![0.0, 0.2, -0.1];

        let res = index.k_nearest(&query, 6, None, 0.0).unwrap();
        assert_eq!(res, index.exhaustive_query(&query, 6, None));
    }

    #[test]
    fn test_query_row() {
        let mat = create_scenario_matrix();
        let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &AtriaParams::default())
            .unwrap();

        let res = index.k_nearest_row(mat.row(3), 1, None, 0.0).unwrap();
        assert_eq!(res, vec![Neighbour::new(3, 0.0)]);

        let res = index.range_search_row(mat.row(4), 0.5, None).unwrap();
        assert_eq!(res, vec![Neighbour::new(4, 0.0)]);
    }

    #[test]
    fn test_generate_knn_theiler_window() {
        let mat = random_matrix(120, 2, 29);
        let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &small_leaves()).unwrap();

        let (indices, distances) = index.generate_knn(3, 2, 0.0, false).unwrap();
        assert_eq!(indices.len(), 120);
        for (i, (row, dist)) in indices.iter().zip(distances.iter()).enumerate() {
            assert_eq!(row.len(), 3);
            assert_eq!(dist.len(), 3);
            assert!(row.iter().all(|&j| (j as i64 - i as i64).abs() > 2));
        }
    }

    #[test]
    fn test_validate_index_exact_recall() {
        let mat = random_matrix(500, 4, 37);
        let index = BallTreeIndex::new(mat.as_ref(), Dist::Euclidean, &small_leaves()).unwrap();
        let recall = index.validate_index(10, 42, Some(50)).unwrap();
        assert_relative_eq!(recall, 1.0);
    }

    #[test]
    fn test_index_is_send_and_sync() {
        fn assert_send_sync<S: Send + Sync>() {}
        assert_send_sync::<BallTreeIndex<f32>>();
        assert_send_sync::<BallTreeIndex<f64, Manhattan>>();
    }
}
