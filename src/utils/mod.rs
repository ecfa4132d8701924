pub mod dist;
pub mod heap_structs;
pub mod simd;
pub mod traits;
pub mod tree_utils;

pub use dist::*;
pub use heap_structs::*;
pub use simd::*;
pub use traits::*;
pub use tree_utils::*;

use faer::MatRef;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rustc_hash::FxHashSet;

use crate::error::{AtriaError, Result};

/////////////
// Helpers //
/////////////

/// Copy a matrix into a flat, row-major vector
///
/// ### Params
///
/// * `data` - The matrix (rows = samples, columns = dimensions)
///
/// ### Returns
///
/// `(vectors_flat, n, dim)`
pub fn matrix_to_flat<T: Copy>(data: MatRef<T>) -> Result<(Vec<T>, usize, usize)> {
    let n = data.nrows();
    let dim = data.ncols();
    let len = n.checked_mul(dim).ok_or_else(|| {
        AtriaError::resource_exhausted(format!("{} x {} matrix overflows usize", n, dim))
    })?;

    let mut vectors_flat = Vec::new();
    vectors_flat
        .try_reserve_exact(len)
        .map_err(|e| AtriaError::from_reserve("point set", e))?;

    for i in 0..n {
        vectors_flat.extend(data.row(i).iter().copied());
    }

    Ok((vectors_flat, n, dim))
}

////////////////
// Validation //
////////////////

/// Brute-force reference answers and recall estimation
///
/// Implementors expose their stored vectors; the provided methods scan all of
/// them with the same distance function and the same exclusion semantics as
/// the index, so the answers can be compared bit for bit.
pub trait KnnValidation<T>
where
    T: AtriaFloat,
{
    /// Query the index for validation purposes
    ///
    /// * `query_vec` - The query vector
    /// * `k` - Number of neighbours to return
    /// * `exclude` - Optional exclusion window
    fn query_for_validation(
        &self,
        query_vec: &[T],
        k: usize,
        exclude: Option<ExclusionWindow>,
    ) -> Result<Vec<Neighbour<T>>>;

    /// Returns number of searchable samples
    fn n(&self) -> usize;

    /// Returns the dimensionality
    fn dim(&self) -> usize;

    /// Coordinates of sample `idx`
    fn sample(&self, idx: usize) -> &[T];

    /// Distance between sample `idx` and the query
    fn distance_to_query(&self, idx: usize, query_vec: &[T]) -> T;

    /// Exhaustive k-NN search for ground truth
    ///
    /// ### Params
    ///
    /// * `query_vec` - The query vector
    /// * `k` - Number of neighbours to return
    /// * `exclude` - Optional exclusion window
    ///
    /// ### Returns
    ///
    /// Up to `k` neighbours in result order
    fn exhaustive_query(
        &self,
        query_vec: &[T],
        k: usize,
        exclude: Option<ExclusionWindow>,
    ) -> Vec<Neighbour<T>> {
        let mut heap = NeighbourHeap::with_capacity(k);
        for idx in 0..self.n() {
            if is_excluded(exclude, idx) {
                continue;
            }
            heap.offer(idx, self.distance_to_query(idx, query_vec));
        }
        heap.into_sorted_vec()
    }

    /// Exhaustive range search for ground truth
    ///
    /// ### Params
    ///
    /// * `query_vec` - The query vector
    /// * `radius` - Search radius (inclusive)
    /// * `exclude` - Optional exclusion window
    ///
    /// ### Returns
    ///
    /// All eligible neighbours within `radius` in result order
    fn exhaustive_range(
        &self,
        query_vec: &[T],
        radius: T,
        exclude: Option<ExclusionWindow>,
    ) -> Vec<Neighbour<T>> {
        let mut res: Vec<Neighbour<T>> = (0..self.n())
            .filter(|&idx| !is_excluded(exclude, idx))
            .map(|idx| Neighbour::new(idx, self.distance_to_query(idx, query_vec)))
            .filter(|nb| nb.distance <= radius)
            .collect();
        sort_neighbours(&mut res);
        res
    }

    /// Validation function for the index
    ///
    /// ### Params
    ///
    /// * `k` - Number of neighbours to return
    /// * `seed` - Seed for reproducibility
    /// * `no_samples` - Optional number of samples to. Otherwise defaults to
    ///   `1000` or n, whichever is smaller.
    ///
    /// ### Returns
    ///
    /// Recall@k for a subset of queried samples, or the first error the
    /// index returned for a validation query.
    fn validate_index(&self, k: usize, seed: u64, no_samples: Option<usize>) -> Result<f64> {
        let k = k.min(self.n());
        let no_samples = no_samples.unwrap_or(1000).min(self.n());
        if k == 0 || no_samples == 0 {
            return Ok(0.0);
        }
        let mut rng = StdRng::seed_from_u64(seed);

        let query_indices: Vec<usize> = (0..no_samples)
            .map(|_| rng.random_range(0..self.n()))
            .collect();

        let mut total_recall = 0.0;

        for &query_idx in &query_indices {
            let query_vec = self.sample(query_idx);

            let approx = self.query_for_validation(query_vec, k, None)?;
            let truth = self.exhaustive_query(query_vec, k, None);

            let approx_set: FxHashSet<usize> = approx.iter().map(|nb| nb.index).collect();
            let matches = truth
                .iter()
                .filter(|nb| approx_set.contains(&nb.index))
                .count();

            total_recall += matches as f64 / k as f64;
        }

        Ok(total_recall / no_samples as f64)
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;

    struct TestVectors {
        data: Vec<f64>,
        dim: usize,
    }

    impl KnnValidation<f64> for TestVectors {
        fn query_for_validation(
            &self,
            query_vec: &[f64],
            k: usize,
            exclude: Option<ExclusionWindow>,
        ) -> Result<Vec<Neighbour<f64>>> {
            Ok(self.exhaustive_query(query_vec, k, exclude))
        }

        fn n(&self) -> usize {
            self.data.len() / self.dim
        }

        fn dim(&self) -> usize {
            self.dim
        }

        fn sample(&self, idx: usize) -> &[f64] {
            &self.data[idx * self.dim..(idx + 1) * self.dim]
        }

        fn distance_to_query(&self, idx: usize, query_vec: &[f64]) -> f64 {
            Dist::Euclidean.distance(self.sample(idx), query_vec)
        }
    }

    fn line() -> TestVectors {
        TestVectors {
            data: (0..10).map(|i| i as f64).collect(),
            dim: 1,
        }
    }

    #[test]
    fn test_matrix_to_flat() {
        let mat = Mat::from_fn(3, 2, |i, j| (i * 10 + j) as f32);
        let (flat, n, dim) = matrix_to_flat(mat.as_ref()).unwrap();
        assert_eq!(n, 3);
        assert_eq!(dim, 2);
        assert_eq!(flat, vec![0.0, 1.0, 10.0, 11.0, 20.0, 21.0]);
    }

    #[test]
    fn test_exhaustive_query_with_exclusion() {
        let v = line();
        let res = v.exhaustive_query(&[4.0], 3, Some(ExclusionWindow::new(3, 5)));
        let indices: Vec<usize> = res.iter().map(|nb| nb.index).collect();
        assert_eq!(indices, vec![2, 6, 1]);
    }

    #[test]
    fn test_exhaustive_range() {
        let v = line();
        let res = v.exhaustive_range(&[4.0], 1.0, None);
        let indices: Vec<usize> = res.iter().map(|nb| nb.index).collect();
        assert_eq!(indices, vec![4, 3, 5]);
    }

    #[test]
    fn test_validate_exhaustive_is_perfect() {
        let v = line();
        let recall = v.validate_index(3, 42, Some(5)).unwrap();
        assert!((recall - 1.0).abs() < 1e-12);
    }

    /// Validation target whose queries always fail
    struct FailingVectors(TestVectors);

    impl KnnValidation<f64> for FailingVectors {
        fn query_for_validation(
            &self,
            _query_vec: &[f64],
            _k: usize,
            _exclude: Option<ExclusionWindow>,
        ) -> Result<Vec<Neighbour<f64>>> {
            Err(AtriaError::invalid_argument("query rejected"))
        }

        fn n(&self) -> usize {
            self.0.n()
        }

        fn dim(&self) -> usize {
            self.0.dim()
        }

        fn sample(&self, idx: usize) -> &[f64] {
            self.0.sample(idx)
        }

        fn distance_to_query(&self, idx: usize, query_vec: &[f64]) -> f64 {
            self.0.distance_to_query(idx, query_vec)
        }
    }

    #[test]
    fn test_validate_propagates_query_errors() {
        let v = FailingVectors(line());
        let err = v.validate_index(3, 42, Some(5)).unwrap_err();
        assert!(matches!(err, AtriaError::InvalidArgument { .. }));
    }
}
