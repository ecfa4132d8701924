use num_traits::{Float, FromPrimitive, ToPrimitive};
use std::fmt::Debug;
use std::iter::Sum;

use crate::utils::simd::SimdDistance;

/// Trait for floating-point types the index can store. Has all of the common
/// floating-point operations and traits plus the vectorised distance kernel.
pub trait AtriaFloat:
    Float + FromPrimitive + ToPrimitive + Send + Sync + Sum + Debug + SimdDistance + 'static
{
}

impl<T> AtriaFloat for T where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync + Sum + Debug + SimdDistance + 'static
{
}
