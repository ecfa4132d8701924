use crate::utils::simd::SimdDistance;
use crate::utils::traits::AtriaFloat;

////////////
// Helper //
////////////

/// Enum for the Distance metric to use
///
/// All variants are true metrics (the triangle inequality holds), which the
/// ball tree pruning relies on.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Default)]
pub enum Dist {
    /// Euclidean distance
    #[default]
    Euclidean,
    /// Maximum norm (Chebyshev, L-infinity) distance
    Maximum,
    /// Manhattan (L1, city block) distance
    Manhattan,
}

/// Parsing the distance metric
///
/// Accepts the historic `"euclidian"` spelling used by older host bindings.
///
/// ### Params
///
/// * `s` - The string that defines the metric
///
/// ### Results
///
/// The `Dist` defining the distance metric, or `None` if the string is not
/// recognised.
pub fn parse_dist(s: &str) -> Option<Dist> {
    match s.to_lowercase().as_str() {
        "euclidean" | "euclidian" => Some(Dist::Euclidean),
        "maximum" | "max" | "chebyshev" => Some(Dist::Maximum),
        "manhattan" | "cityblock" => Some(Dist::Manhattan),
        _ => None,
    }
}

////////////
// Metric //
////////////

/// A stateless distance function between two equal-length slices
///
/// `distance_bounded` is the partial-search hook used by the query engine: an
/// implementation may stop accumulating once the partial result proves that
/// the distance exceeds `threshold`, and then return any value larger than
/// `threshold`. If the true distance is at most `threshold`, the exact value
/// must be returned. The default implementation never exits early.
pub trait Metric<T>: Copy + Send + Sync
where
    T: AtriaFloat,
{
    /// Distance between `a` and `b`
    fn distance(&self, a: &[T], b: &[T]) -> T;

    /// Distance between `a` and `b` with an optional early exit
    ///
    /// ### Params
    ///
    /// * `a` - Slice of vector one
    /// * `b` - Slice of vector two
    /// * `threshold` - Distances above this value need not be exact
    ///
    /// ### Returns
    ///
    /// The exact distance if it is `<= threshold`; otherwise some value
    /// `> threshold` (possibly infinity).
    #[inline]
    fn distance_bounded(&self, a: &[T], b: &[T], threshold: T) -> T {
        let _ = threshold;
        self.distance(a, b)
    }

    /// Whether `distance_bounded` can exit early
    ///
    /// When `false`, callers use `distance` directly and skip the threshold.
    fn supports_early_exit(&self) -> bool {
        false
    }
}

/// Euclidean metric backed by the vectorised kernel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Euclidean;

/// Maximum norm metric
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Maximum;

/// Manhattan metric
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Manhattan;

impl<T: AtriaFloat> Metric<T> for Euclidean {
    #[inline(always)]
    fn distance(&self, a: &[T], b: &[T]) -> T {
        T::euclidean_simd(a, b).sqrt()
    }

    #[inline(always)]
    fn distance_bounded(&self, a: &[T], b: &[T], threshold: T) -> T {
        if !threshold.is_finite() {
            return self.distance(a, b);
        }
        match T::euclidean_simd_bounded(a, b, threshold) {
            Some(sq) => sq.sqrt(),
            None => T::infinity(),
        }
    }

    fn supports_early_exit(&self) -> bool {
        true
    }
}

impl<T: AtriaFloat> Metric<T> for Maximum {
    #[inline(always)]
    fn distance(&self, a: &[T], b: &[T]) -> T {
        a.iter()
            .zip(b.iter())
            .fold(T::zero(), |acc, (&x, &y)| acc.max((x - y).abs()))
    }

    #[inline(always)]
    fn distance_bounded(&self, a: &[T], b: &[T], threshold: T) -> T {
        let mut max = T::zero();
        for (&x, &y) in a.iter().zip(b.iter()) {
            max = max.max((x - y).abs());
            if max > threshold {
                return T::infinity();
            }
        }
        max
    }

    fn supports_early_exit(&self) -> bool {
        true
    }
}

impl<T: AtriaFloat> Metric<T> for Manhattan {
    #[inline(always)]
    fn distance(&self, a: &[T], b: &[T]) -> T {
        a.iter()
            .zip(b.iter())
            .fold(T::zero(), |acc, (&x, &y)| acc + (x - y).abs())
    }

    #[inline(always)]
    fn distance_bounded(&self, a: &[T], b: &[T], threshold: T) -> T {
        let mut sum = T::zero();
        for (chunk_a, chunk_b) in a.chunks(8).zip(b.chunks(8)) {
            for (&x, &y) in chunk_a.iter().zip(chunk_b.iter()) {
                sum = sum + (x - y).abs();
            }
            if sum > threshold {
                return T::infinity();
            }
        }
        sum
    }

    fn supports_early_exit(&self) -> bool {
        true
    }
}

impl<T: AtriaFloat> Metric<T> for Dist {
    #[inline(always)]
    fn distance(&self, a: &[T], b: &[T]) -> T {
        match self {
            Dist::Euclidean => Euclidean.distance(a, b),
            Dist::Maximum => Maximum.distance(a, b),
            Dist::Manhattan => Manhattan.distance(a, b),
        }
    }

    #[inline(always)]
    fn distance_bounded(&self, a: &[T], b: &[T], threshold: T) -> T {
        match self {
            Dist::Euclidean => Euclidean.distance_bounded(a, b, threshold),
            Dist::Maximum => Maximum.distance_bounded(a, b, threshold),
            Dist::Manhattan => Manhattan.distance_bounded(a, b, threshold),
        }
    }

    fn supports_early_exit(&self) -> bool {
        match self {
            Dist::Euclidean => <Euclidean as Metric<T>>::supports_early_exit(&Euclidean),
            Dist::Maximum => <Maximum as Metric<T>>::supports_early_exit(&Maximum),
            Dist::Manhattan => <Manhattan as Metric<T>>::supports_early_exit(&Manhattan),
        }
    }
}

///////////
// Tests //
///////////
