use ndarray::{LinalgScalar, ScalarOperand};
use num_traits::{Float, NumCast};
use std::fmt::Debug;

/// Supertrait combining all bounds needed by the generic concentration pipeline.
///
/// Implemented for `f32` and `f64` only. Concentration tensors for whole-slide
/// images are large, so `f32` halves memory at the cost of round-trip precision.
pub trait StainFloat:
    Float + LinalgScalar + ScalarOperand + Debug + Send + Sync + 'static
{
    /// Tolerance used when snapping reconstructed intensities onto integers.
    ///
    /// `255 * exp(ln(v / 255))` lands at most `64 * epsilon` away from `v`;
    /// anything within `255 * epsilon` of an integer is treated as that integer
    /// before truncation. Everything else truncates.
    fn intensity_tolerance() -> Self {
        Self::epsilon() * <Self as NumCast>::from(255.0).unwrap()
    }
}

impl StainFloat for f32 {}
impl StainFloat for f64 {}
