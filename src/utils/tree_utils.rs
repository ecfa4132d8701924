use num_traits::{Float, FromPrimitive};
use std::cmp::Ordering;

use crate::utils::heap_structs::OrderedFloat;

/// Default maximum number of points per leaf cluster
pub const DEFAULT_CLUSTER_MAX_POINTS: usize = 64;

/// Default seed for the pivot selection
pub const DEFAULT_SEED: u64 = 9_345_356_234;

/////////////
// Helpers //
/////////////

/// Priority queue entry for best-first search
///
/// The max-heap pops the entry with the smallest lower bound first; ties go to
/// the smaller node index so that the visiting order is deterministic.
///
/// ### Fields
///
/// * `lower_bound` - `max(0, d(query, centre) - radius)`
/// * `center_dist` - `d(query, centre)`, reused for the per-point filter in
///   leaves
/// * `node_idx` - Index of node to explore
#[derive(Clone, Copy, Debug)]
pub struct BacktrackEntry<T> {
    pub lower_bound: T,
    pub center_dist: T,
    pub node_idx: u32,
}

impl<T: Float> PartialEq for BacktrackEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: Float> Eq for BacktrackEntry<T> {}

impl<T: Float> PartialOrd for BacktrackEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Float> Ord for BacktrackEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        OrderedFloat(other.lower_bound)
            .cmp(&OrderedFloat(self.lower_bound))
            .then_with(|| other.node_idx.cmp(&self.node_idx))
    }
}

/// Lower bound on the distance from the query to any point inside a ball
#[inline(always)]
pub fn ball_lower_bound<T: Float>(center_dist: T, radius: T) -> T {
    (center_dist - radius).max(T::zero())
}

/// Absolute tolerance for the triangle-inequality tests of one query
///
/// Centre distances and radii below the root are bounded by
/// `root_dist + 3 * root_radius`, and each carries a rounding error that grows
/// with the dimension. A bound only prunes once it clears this slack, so a
/// point whose computed distance equals the search bound is never skipped.
///
/// ### Params
///
/// * `root_dist` - Distance from the query to the root centre
/// * `root_radius` - Radius of the root ball
/// * `dim` - Dimensionality of the points
#[inline]
pub fn rounding_slack<T: Float + FromPrimitive>(root_dist: T, root_radius: T, dim: usize) -> T {
    let magnitude = root_dist + root_radius + root_radius + root_radius;
    let ulps = T::from_usize(dim.saturating_add(4)).unwrap_or_else(T::one);
    magnitude * T::epsilon() * ulps
}

/////////////////////
// ExclusionWindow //
/////////////////////

/// Inclusive range of point indices hidden from a single query
///
/// Bounds are signed so that windows around early samples of a time series
/// (e.g. `[i - w, i + w]` with `i < w`) need no clamping. A point `i` is
/// excluded iff `first <= i <= last`; `first > last` hides nothing, and so
/// does the `(-1, -1)` convention used by host bindings to disable exclusion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExclusionWindow {
    pub first: i64,
    pub last: i64,
}

impl ExclusionWindow {
    /// Generate a new window
    ///
    /// ### Params
    ///
    /// * `first` - First excluded index (inclusive)
    /// * `last` - Last excluded index (inclusive)
    pub fn new(first: i64, last: i64) -> Self {
        Self { first, last }
    }

    /// Theiler window `[center - half_width, center + half_width]`
    ///
    /// ### Params
    ///
    /// * `center` - Index of the query's own sample
    /// * `half_width` - Number of temporal neighbours to hide on each side
    pub fn around(center: usize, half_width: usize) -> Self {
        let c = center as i64;
        let w = half_width as i64;
        Self {
            first: c - w,
            last: c + w,
        }
    }

    /// Is the index hidden by the window
    #[inline(always)]
    pub fn contains(&self, idx: usize) -> bool {
        let i = idx as i64;
        self.first <= i && i <= self.last
    }

    /// Number of indices in `[0, n)` hidden by the window
    pub fn overlap(&self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let lo = self.first.max(0);
        let hi = self.last.min(n as i64 - 1);
        if lo > hi {
            0
        } else {
            (hi - lo + 1) as usize
        }
    }
}

impl From<[i64; 2]> for ExclusionWindow {
    fn from(bounds: [i64; 2]) -> Self {
        Self::new(bounds[0], bounds[1])
    }
}

/// Is `idx` hidden by an optional window
#[inline(always)]
pub fn is_excluded(exclude: Option<ExclusionWindow>, idx: usize) -> bool {
    exclude.is_some_and(|w| w.contains(idx))
}

///////////
// Tests //
///////////
