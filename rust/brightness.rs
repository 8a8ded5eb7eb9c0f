use crate::float_trait::StainFloat;
use crate::optical_density::cast_intensity;
use ndarray::{Array, ArrayView, Dimension, Zip};
use num_traits::Float;

/// Linear-interpolated percentile (`p` in `[0, 100]`) of a set of values.
///
/// Returns `None` for an empty input. NaNs sort last.
pub fn percentile<F: StainFloat>(values: impl IntoIterator<Item = F>, p: F) -> Option<F> {
    let mut sorted: Vec<F> = values.into_iter().collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan())));

    let hundred = F::from(100.0).unwrap();
    let p = Float::min(Float::max(p, F::zero()), hundred);
    let max_idx = sorted.len() - 1;
    let pos = p / hundred * F::from(max_idx).unwrap();
    let lo = Float::floor(pos).to_usize().unwrap_or(0).min(max_idx);
    let hi = (lo + 1).min(max_idx);
    let frac = pos - F::from(lo).unwrap();
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Global `p`-th percentile of a concentration matrix or tensor.
///
/// Typical use is `p = 99` to derive the max-concentration scales passed to
/// [`reconstruct_rgb`](crate::reconstruct::reconstruct_rgb).
pub fn concentration_percentile<F, D>(concentrations: ArrayView<F, D>, p: F) -> Option<F>
where
    F: StainFloat,
    D: Dimension,
{
    percentile(concentrations.iter().copied(), p)
}

/// Stretch intensities so the 90th percentile maps to 255, clipping at [0, 255].
pub fn standardize_brightness<D: Dimension>(image: ArrayView<u8, D>) -> Array<u8, D> {
    let p90 = percentile(image.iter().map(|&v| v as f64), 90.0).unwrap_or(255.0);
    if p90 <= 0.0 {
        return image.to_owned();
    }
    Zip::from(&image).par_map_collect(|&v| cast_intensity((v as f64 * 255.0 / p90).clamp(0.0, 255.0)))
}
