use wide::{f32x8, f64x4};

/////////////
// Helpers //
/////////////

/// Load exactly eight f32 lanes from a chunk
#[inline(always)]
fn load_f32x8(chunk: &[f32]) -> f32x8 {
    let mut lanes = [0.0_f32; 8];
    lanes.copy_from_slice(chunk);
    f32x8::from(lanes)
}

/// Load exactly four f64 lanes from a chunk
#[inline(always)]
fn load_f64x4(chunk: &[f64]) -> f64x4 {
    let mut lanes = [0.0_f64; 4];
    lanes.copy_from_slice(chunk);
    f64x4::from(lanes)
}

///////////////////
// SimdDistance  //
///////////////////

/// Vectorised squared Euclidean kernels
///
/// The lane width is chosen at build time by `wide` from the enabled target
/// features (AVX/SSE on x86_64, NEON on aarch64, scalar emulation elsewhere).
/// Both kernels accumulate in the same order, so a bounded call that does not
/// exit early returns bit-identical results to the unbounded one.
pub trait SimdDistance: Sized + Copy {
    /// Squared Euclidean distance between two slices
    ///
    /// ### Params
    ///
    /// * `a` - Slice of vector one
    /// * `b` - Slice of vector two
    ///
    /// ### Returns
    ///
    /// The squared Euclidean distance
    fn euclidean_simd(a: &[Self], b: &[Self]) -> Self;

    /// Squared Euclidean distance with early exit
    ///
    /// Checks the partial sum after every full lane block and returns `None`
    /// once `sqrt(partial) > threshold`. The cheap `partial > threshold^2` test
    /// only gates the root: `threshold^2` may round below the square of a
    /// distance equal to `threshold`. Partial sums never decrease, so an exit
    /// implies the full distance exceeds `threshold`. The scalar tail is not
    /// checked.
    ///
    /// ### Params
    ///
    /// * `a` - Slice of vector one
    /// * `b` - Slice of vector two
    /// * `threshold` - Rooted distance threshold
    ///
    /// ### Returns
    ///
    /// `Some(squared distance)` or `None` if the distance exceeds `threshold`
    fn euclidean_simd_bounded(a: &[Self], b: &[Self], threshold: Self) -> Option<Self>;
}

impl SimdDistance for f32 {
    #[inline]
    fn euclidean_simd(a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());

        let a_chunks = a.chunks_exact(8);
        let b_chunks = b.chunks_exact(8);
        let a_rem = a_chunks.remainder();
        let b_rem = b_chunks.remainder();

        let mut acc = f32x8::ZERO;
        for (ca, cb) in a_chunks.zip(b_chunks) {
            let diff = load_f32x8(ca) - load_f32x8(cb);
            acc = acc + diff * diff;
        }

        let mut sum = acc.reduce_add();
        for (&x, &y) in a_rem.iter().zip(b_rem.iter()) {
            let diff = x - y;
            sum += diff * diff;
        }
        sum
    }

    #[inline]
    fn euclidean_simd_bounded(a: &[f32], b: &[f32], threshold: f32) -> Option<f32> {
        debug_assert_eq!(a.len(), b.len());
        let limit_sq = threshold * threshold;

        let a_chunks = a.chunks_exact(8);
        let b_chunks = b.chunks_exact(8);
        let a_rem = a_chunks.remainder();
        let b_rem = b_chunks.remainder();

        let mut acc = f32x8::ZERO;
        for (ca, cb) in a_chunks.zip(b_chunks) {
            let diff = load_f32x8(ca) - load_f32x8(cb);
            acc = acc + diff * diff;
            let partial = acc.reduce_add();
            if partial > limit_sq && partial.sqrt() > threshold {
                return None;
            }
        }

        let mut sum = acc.reduce_add();
        for (&x, &y) in a_rem.iter().zip(b_rem.iter()) {
            let diff = x - y;
            sum += diff * diff;
        }
        Some(sum)
    }
}

impl SimdDistance for f64 {
    #[inline]
    fn euclidean_simd(a: &[f64], b: &[f64]) -> f64 {
        debug_assert_eq!(a.len(), b.len());

        let a_chunks = a.chunks_exact(4);
        let b_chunks = b.chunks_exact(4);
        let a_rem = a_chunks.remainder();
        let b_rem = b_chunks.remainder();

        let mut acc = f64x4::ZERO;
        for (ca, cb) in a_chunks.zip(b_chunks) {
            let diff = load_f64x4(ca) - load_f64x4(cb);
            acc = acc + diff * diff;
        }

        let mut sum = acc.reduce_add();
        for (&x, &y) in a_rem.iter().zip(b_rem.iter()) {
            let diff = x - y;
            sum += diff * diff;
        }
        sum
    }

    #[inline]
    fn euclidean_simd_bounded(a: &[f64], b: &[f64], threshold: f64) -> Option<f64> {
        debug_assert_eq!(a.len(), b.len());
        let limit_sq = threshold * threshold;

        let a_chunks = a.chunks_exact(4);
        let b_chunks = b.chunks_exact(4);
        let a_rem = a_chunks.remainder();
        let b_rem = b_chunks.remainder();

        let mut acc = f64x4::ZERO;
        for (ca, cb) in a_chunks.zip(b_chunks) {
            let diff = load_f64x4(ca) - load_f64x4(cb);
            acc = acc + diff * diff;
            let partial = acc.reduce_add();
            if partial > limit_sq && partial.sqrt() > threshold {
                return None;
            }
        }

        let mut sum = acc.reduce_add();
        for (&x, &y) in a_rem.iter().zip(b_rem.iter()) {
            let diff = x - y;
            sum += diff * diff;
        }
        Some(sum)
    }
}

///////////
// Tests //
///////////
