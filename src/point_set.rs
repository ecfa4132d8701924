use faer::MatRef;

use crate::error::{AtriaError, Result};
use crate::utils::*;

//////////////
// PointSet //
//////////////

/// Row-major point set with an attached metric
///
/// Owns its copy of the coordinates; immutable after construction and safe to
/// share between any number of concurrent readers.
///
/// ### Fields
///
/// * `vectors_flat` - Coordinates, point `i` at `[i * dim, (i + 1) * dim)`
/// * `n` - Number of points
/// * `dim` - Dimensions per point
/// * `metric` - Distance function
#[derive(Clone, Debug)]
pub struct PointSet<T, M = Dist> {
    vectors_flat: Vec<T>,
    n: usize,
    dim: usize,
    metric: M,
}

impl<T, M> PointSet<T, M>
where
    T: AtriaFloat,
    M: Metric<T>,
{
    /// Copy a data matrix into a new point set
    ///
    /// ### Params
    ///
    /// * `data` - Data matrix (rows = points, columns = dimensions)
    /// * `metric` - The distance metric
    ///
    /// ### Returns
    ///
    /// The point set, or an error if the matrix is empty, contains non-finite
    /// values or cannot be copied.
    pub fn new(data: MatRef<T>, metric: M) -> Result<Self> {
        let (vectors_flat, n, dim) = matrix_to_flat(data)?;
        Self::checked(vectors_flat, n, dim, metric)
    }

    /// Build a point set from already flattened, row-major coordinates
    ///
    /// ### Params
    ///
    /// * `vectors_flat` - Row-major coordinates
    /// * `dim` - Dimensions per point
    /// * `metric` - The distance metric
    ///
    /// ### Returns
    ///
    /// The point set, or an error if the shape is inconsistent
    pub fn from_flat(vectors_flat: Vec<T>, dim: usize, metric: M) -> Result<Self> {
        if dim == 0 {
            return Err(AtriaError::invalid_argument(
                "Point set needs at least one dimension",
            ));
        }
        if vectors_flat.len() % dim != 0 {
            return Err(AtriaError::invalid_argument(format!(
                "Flat data of length {} is not a multiple of dimension {}",
                vectors_flat.len(),
                dim
            )));
        }
        let n = vectors_flat.len() / dim;
        Self::checked(vectors_flat, n, dim, metric)
    }

    fn checked(vectors_flat: Vec<T>, n: usize, dim: usize, metric: M) -> Result<Self> {
        if n == 0 || dim == 0 {
            return Err(AtriaError::invalid_argument(format!(
                "Point set must not be empty, got {} points with {} dimensions",
                n, dim
            )));
        }
        if let Some(pos) = vectors_flat.iter().position(|v| !v.is_finite()) {
            return Err(AtriaError::invalid_argument(format!(
                "Non-finite coordinate in point {}, dimension {}",
                pos / dim,
                pos % dim
            )));
        }

        Ok(Self {
            vectors_flat,
            n,
            dim,
            metric,
        })
    }

    /// Number of points
    #[inline]
    pub fn size(&self) -> usize {
        self.n
    }

    /// Dimensions per point
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// The attached metric
    #[inline]
    pub fn metric(&self) -> M {
        self.metric
    }

    /// Flat coordinate storage
    #[inline]
    pub fn vectors_flat(&self) -> &[T] {
        &self.vectors_flat
    }

    /// Coordinates of point `i`
    #[inline(always)]
    pub fn point(&self, i: usize) -> &[T] {
        let start = i * self.dim;
        &self.vectors_flat[start..start + self.dim]
    }

    /// Distance between two stored points
    #[inline(always)]
    pub fn distance(&self, i: usize, j: usize) -> T {
        self.metric.distance(self.point(i), self.point(j))
    }

    /// Distance between stored point `i` and an external query vector
    #[inline(always)]
    pub fn distance_to_query(&self, i: usize, query: &[T]) -> T {
        self.metric.distance(self.point(i), query)
    }

    /// Distance to a query that may stop early above `threshold`
    ///
    /// ### Params
    ///
    /// * `i` - Stored point index
    /// * `query` - Query vector
    /// * `threshold` - Distances above this value need not be exact
    ///
    /// ### Returns
    ///
    /// The exact distance if it is `<= threshold`, otherwise some value
    /// `> threshold`
    #[inline(always)]
    pub fn distance_to_query_bounded(&self, i: usize, query: &[T], threshold: T) -> T {
        if !self.metric.supports_early_exit() {
            return self.distance_to_query(i, query);
        }
        self.metric
            .distance_bounded(self.point(i), query, threshold)
    }

    /// Returns the size of the point set in bytes
    pub fn memory_usage_bytes(&self) -> usize {
        std::mem::size_of_val(self) + self.vectors_flat.capacity() * std::mem::size_of::<T>()
    }
}

///////////
// Tests //
///////////
