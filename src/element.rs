//! Compile-time element specializations.
//!
//! Every supported dtype gets its own instantiation of the kernel; the hot
//! loops never branch on the element type at runtime.

use num_traits::{ToPrimitive, Zero};
use wide::f64x2;

use crate::reduce::accumulate::KahanSum;

pub trait MeanElement: Copy + Send + Sync + 'static {
    /// Element type of the result. Floats keep their precision, integers
    /// are promoted to `f64`.
    type Output: Copy + Send + Sync + Zero + 'static;

    const DTYPE_NAME: &'static str;

    fn to_f64(self) -> f64;

    fn from_mean(mean: f64) -> Self::Output;

    /// Compensated scalar sum of a contiguous lane.
    fn scalar_sum(lane: &[Self]) -> f64 {
        let mut acc = KahanSum::default();
        for &value in lane {
            acc.add(value.to_f64());
        }
        acc.total()
    }

    /// Sum of a contiguous lane, vectorised where the type allows it.
    fn simd_sum(lane: &[Self]) -> f64 {
        Self::scalar_sum(lane)
    }
}

impl MeanElement for f64 {
    type Output = f64;
    const DTYPE_NAME: &'static str = "float64";

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_mean(mean: f64) -> f64 {
        mean
    }

    fn simd_sum(lane: &[Self]) -> f64 {
        let mut acc0 = f64x2::splat(0.0);
        let mut acc1 = f64x2::splat(0.0);

        let mut chunks = lane.chunks_exact(4);
        for chunk in chunks.by_ref() {
            acc0 = acc0 + f64x2::new([chunk[0], chunk[1]]);
            acc1 = acc1 + f64x2::new([chunk[2], chunk[3]]);
        }

        let lanes = (acc0 + acc1).to_array();
        let mut acc = KahanSum::default();
        for value in lanes.into_iter().chain(chunks.remainder().iter().copied()) {
            acc.add(value);
        }
        acc.total()
    }
}

impl MeanElement for f32 {
    type Output = f32;
    const DTYPE_NAME: &'static str = "float32";

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_mean(mean: f64) -> f32 {
        mean as f32
    }

    fn simd_sum(lane: &[Self]) -> f64 {
        let mut acc0 = f64x2::splat(0.0);
        let mut acc1 = f64x2::splat(0.0);

        let mut chunks = lane.chunks_exact(4);
        for chunk in chunks.by_ref() {
            acc0 = acc0 + f64x2::new([chunk[0] as f64, chunk[1] as f64]);
            acc1 = acc1 + f64x2::new([chunk[2] as f64, chunk[3] as f64]);
        }

        let lanes = (acc0 + acc1).to_array();
        let mut acc = KahanSum::default();
        for value in lanes
            .into_iter()
            .chain(chunks.remainder().iter().map(|&v| v as f64))
        {
            acc.add(value);
        }
        acc.total()
    }
}

macro_rules! impl_integer_element {
    ($t:ty, $name:literal) => {
        impl MeanElement for $t {
            type Output = f64;
            const DTYPE_NAME: &'static str = $name;

            #[inline]
            fn to_f64(self) -> f64 {
                // Every supported integer width has a (possibly rounded) f64 value.
                ToPrimitive::to_f64(&self).unwrap_or(f64::NAN)
            }

            #[inline]
            fn from_mean(mean: f64) -> f64 {
                mean
            }
        }
    };
}

impl_integer_element!(i64, "int64");
impl_integer_element!(i32, "int32");
impl_integer_element!(u32, "uint32");
impl_integer_element!(u8, "uint8");
