#![allow(clippy::needless_range_loop)] // I want these loops!

pub mod ball_tree;
pub mod error;
pub mod point_set;
pub mod synthetic;
pub mod utils;

use faer::MatRef;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thousands::*;

use crate::ball_tree::*;
use crate::error::{AtriaError, Result};
use crate::utils::*;

/// Per query: `(neighbour indices, distances)`, both in result order
pub type KnnResult<T> = (Vec<Vec<usize>>, Vec<Vec<T>>);

/// Per query: `(indices within the radius, distances)`, both in result order
pub type RangeResult<T> = (Vec<Vec<usize>>, Vec<Vec<T>>);

/// Commonly used types in one import
pub mod prelude {
    pub use crate::ball_tree::{AtriaParams, BallTreeIndex};
    pub use crate::error::{AtriaError, Result};
    pub use crate::point_set::PointSet;
    pub use crate::utils::dist::{parse_dist, Dist, Euclidean, Manhattan, Maximum, Metric};
    pub use crate::utils::heap_structs::Neighbour;
    pub use crate::utils::traits::AtriaFloat;
    pub use crate::utils::tree_utils::ExclusionWindow;
    pub use crate::{
        build_atria_index, query_atria_k_nearest, query_atria_range, query_atria_self,
        KnnResult, RangeResult,
    };
}

/////////////
// Helpers //
/////////////

/// Turn optional per-row exclusion pairs into windows
///
/// ### Params
///
/// * `exclude` - Optional `[first, last]` pair per query row
/// * `n_queries` - Number of query rows
///
/// ### Returns
///
/// One optional window per query, or an error on a row count mismatch
fn exclusion_windows(
    exclude: Option<&[[i64; 2]]>,
    n_queries: usize,
) -> Result<Vec<Option<ExclusionWindow>>> {
    match exclude {
        None => Ok(vec![None; n_queries]),
        Some(pairs) => {
            if pairs.len() != n_queries {
                return Err(AtriaError::invalid_argument(format!(
                    "Exclusion list has {} rows, expected one per query ({})",
                    pairs.len(),
                    n_queries
                )));
            }
            Ok(pairs
                .iter()
                .map(|&pair| Some(ExclusionWindow::from(pair)))
                .collect())
        }
    }
}

fn report_progress(counter: &AtomicUsize, total: usize, verbose: bool) {
    if verbose {
        let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if count.is_multiple_of(100_000) {
            println!(
                "  Processed {} / {} queries.",
                count.separate_with_underscores(),
                total.separate_with_underscores()
            );
        }
    }
}

///////////
// ATRIA //
///////////

/// Build an ATRIA ball tree index
///
/// ### Params
///
/// * `mat` - The data matrix. Rows represent the samples, columns represent
///   the embedding dimensions
/// * `metric` - The distance metric to use
/// * `params` - Construction parameters (leaf size, seed, excluded tail)
/// * `verbose` - Print a summary of the built tree
///
/// ### Return
///
/// The `BallTreeIndex`.
pub fn build_atria_index<T>(
    mat: MatRef<T>,
    metric: Dist,
    params: &AtriaParams,
    verbose: bool,
) -> Result<BallTreeIndex<T>>
where
    T: AtriaFloat,
{
    let start = Instant::now();
    let index = BallTreeIndex::new(mat, metric, params)?;

    if verbose {
        println!(
            "Built ATRIA tree over {} points ({} searchable, {} dims) in {:.2?}.",
            index.point_count().separate_with_underscores(),
            index.searchable_count().separate_with_underscores(),
            index.dimension(),
            start.elapsed()
        );
        println!(
            "  {} clusters, {} leaves, depth {}, approximate data set radius: {:?}",
            index.n_nodes().separate_with_underscores(),
            index.n_leaves().separate_with_underscores(),
            index.depth(),
            index.data_set_radius()
        );
    }

    Ok(index)
}

/// Batched k-nearest-neighbour query against an ATRIA index
///
/// ### Params
///
/// * `query_mat` - The query matrix containing the samples x features
/// * `index` - Reference to the built index
/// * `k` - Number of neighbours to return
/// * `exclude` - Optional `[first, last]` exclusion pair per query row
/// * `epsilon` - Relative error tolerance (`0` = exact)
/// * `verbose` - Print progress information
///
/// ### Returns
///
/// A tuple of `(knn_indices, distances)`
///
/// ### Note
///
/// The distance metric is determined at index build time and cannot be changed
/// during querying.
pub fn query_atria_k_nearest<T, M>(
    query_mat: MatRef<T>,
    index: &BallTreeIndex<T, M>,
    k: usize,
    exclude: Option<&[[i64; 2]]>,
    epsilon: T,
    verbose: bool,
) -> Result<KnnResult<T>>
where
    T: AtriaFloat,
    M: Metric<T>,
{
    let n_samples = query_mat.nrows();
    let windows = exclusion_windows(exclude, n_samples)?;
    let counter = Arc::new(AtomicUsize::new(0));

    let results: Vec<Vec<Neighbour<T>>> = (0..n_samples)
        .into_par_iter()
        .map(|i| {
            let res = index.k_nearest_row(query_mat.row(i), k, windows[i], epsilon);
            report_progress(&counter, n_samples, verbose);
            res
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(results.into_iter().map(unzip_neighbours).unzip())
}

/// Batched fixed-radius query against an ATRIA index
///
/// ### Params
///
/// * `query_mat` - The query matrix containing the samples x features
/// * `index` - Reference to the built index
/// * `radius` - Search radius (inclusive)
/// * `exclude` - Optional `[first, last]` exclusion pair per query row
/// * `verbose` - Print progress information
///
/// ### Returns
///
/// A tuple of `(indices, distances)`; rows have varying lengths
pub fn query_atria_range<T, M>(
    query_mat: MatRef<T>,
    index: &BallTreeIndex<T, M>,
    radius: T,
    exclude: Option<&[[i64; 2]]>,
    verbose: bool,
) -> Result<RangeResult<T>>
where
    T: AtriaFloat,
    M: Metric<T>,
{
    let n_samples = query_mat.nrows();
    let windows = exclusion_windows(exclude, n_samples)?;
    let counter = Arc::new(AtomicUsize::new(0));

    let results: Vec<Vec<Neighbour<T>>> = (0..n_samples)
        .into_par_iter()
        .map(|i| {
            let res = index.range_search_row(query_mat.row(i), radius, windows[i]);
            report_progress(&counter, n_samples, verbose);
            res
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(results.into_iter().map(unzip_neighbours).unzip())
}

/// kNN graph of the indexed points against themselves
///
/// Every stored point is queried with the Theiler window
/// `[i - window_half_width, i + window_half_width]` excluded, which removes
/// the point itself and its temporal neighbours. `window_half_width = 0` only
/// removes the point itself.
///
/// ### Params
///
/// * `index` - Reference to the built index
/// * `k` - Number of neighbours per point
/// * `window_half_width` - Half width of the exclusion window
/// * `epsilon` - Relative error tolerance (`0` = exact)
/// * `verbose` - Print progress information
///
/// ### Returns
///
/// A tuple of `(knn_indices, distances)` with one row per stored point
pub fn query_atria_self<T, M>(
    index: &BallTreeIndex<T, M>,
    k: usize,
    window_half_width: usize,
    epsilon: T,
    verbose: bool,
) -> Result<KnnResult<T>>
where
    T: AtriaFloat,
    M: Metric<T>,
{
    let start = Instant::now();
    let res = index.generate_knn(k, window_half_width, epsilon, verbose)?;

    if verbose {
        println!(
            "Self query of {} points (k = {}, Theiler window = {}) done in {:.2?}.",
            index.point_count().separate_with_underscores(),
            k,
            window_half_width,
            start.elapsed()
        );
    }

    Ok(res)
}

///////////
// Tests //
///////////
