use crate::float_trait::StainFloat;
use ndarray::{Array, Array2, ArrayView, ArrayView3, Dimension, ShapeError, Zip};
use num_traits::{Float, ToPrimitive};

/// Convert 8-bit RGB intensities to optical density, `OD = -ln(I / 255)`.
///
/// Zero intensities are read as 1 so the logarithm stays finite; the result is
/// therefore always `>= 0`. Works on any shape (`H×W×3` images or `N×3` matrices).
pub fn rgb_to_od<F, D>(im_rgb: ArrayView<u8, D>) -> Array<F, D>
where
    F: StainFloat,
    D: Dimension,
{
    let max_int = F::from(255.0).unwrap();
    let lut: Vec<F> = (0u16..=255)
        .map(|v| {
            let v = F::from(v.max(1)).unwrap();
            -Float::ln(v / max_int)
        })
        .collect();

    Zip::from(&im_rgb).par_map_collect(|&v| lut[v as usize])
}

/// Convert an `H×W×C` image into the `(H·W)×C` optical-density matrix fed to the solver.
pub fn rgb_pixels_to_od<F: StainFloat>(im_rgb: ArrayView3<u8>) -> Result<Array2<F>, ShapeError> {
    let (h, w, c) = im_rgb.dim();
    let flat = im_rgb.to_shape((h * w, c))?;
    Ok(rgb_to_od(flat.view()))
}

/// Convert optical density back to 8-bit intensities, `I = 255 * exp(-OD)`.
///
/// The float result is cast, not clipped: the fractional part is truncated and
/// out-of-range integers wrap modulo 256. Non-finite values become 0.
pub fn od_to_rgb<F, D>(od: ArrayView<F, D>) -> Array<u8, D>
where
    F: StainFloat,
    D: Dimension,
{
    let max_int = F::from(255.0).unwrap();
    Zip::from(&od).par_map_collect(|&x| cast_intensity(max_int * Float::exp(-x)))
}

/// Float → u8 cast with wrap-around, snapping values within float noise of an integer.
#[inline]
pub(crate) fn cast_intensity<F: StainFloat>(v: F) -> u8 {
    if !v.is_finite() {
        return 0;
    }
    let nearest = Float::round(v);
    let whole = if Float::abs(v - nearest) <= F::intensity_tolerance() {
        nearest
    } else {
        Float::trunc(v)
    };
    whole.to_i64().map_or(0, |i| i.rem_euclid(256) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1, Array3};

    #[test]
    fn round_trip_is_exact_above_zero() {
        let values: Array1<u8> = (0u8..=255).collect();
        let od = rgb_to_od::<f64, _>(values.view());
        let back = od_to_rgb(od.view());
        for v in 1..=255usize {
            assert_eq!(back[v] as usize, v, "f64 round trip of {v}");
        }
        assert_eq!(back[0], 1);

        let od32 = rgb_to_od::<f32, _>(values.view());
        let back32 = od_to_rgb(od32.view());
        for v in 1..=255usize {
            assert_eq!(back32[v] as usize, v, "f32 round trip of {v}");
        }
    }

    #[test]
    fn od_is_nonnegative_and_zero_is_remapped() {
        let img = Array3::from_shape_fn((3, 4, 3), |(i, j, k)| ((i * 37 + j * 11 + k * 5) % 256) as u8);
        let mut with_zero = img.clone();
        with_zero[[0, 0, 0]] = 0;
        let od = rgb_to_od::<f64, _>(with_zero.view());
        assert_eq!(od.shape(), img.shape());
        assert!(od.iter().all(|&v| v >= 0.0));
        assert_eq!(od[[0, 0, 0]], -(1.0f64 / 255.0).ln());
        assert_eq!(od[[0, 0, 0]], rgb_to_od::<f64, _>(array![1u8].view())[0]);
    }

    #[test]
    fn pixel_matrix_is_row_major() {
        let img = Array3::from_shape_fn((2, 3, 3), |(i, j, k)| (1 + i * 9 + j * 3 + k) as u8);
        // non-contiguous view: every other column
        let view = img.slice(ndarray::s![.., ..;2, ..]);
        let od = rgb_pixels_to_od::<f64>(view).unwrap();
        assert_eq!(od.dim(), (4, 3));
        let back = od_to_rgb(od.view());
        assert_eq!(back.row(0).to_vec(), vec![1, 2, 3]);
        assert_eq!(back.row(1).to_vec(), vec![7, 8, 9]);
        assert_eq!(back.row(2).to_vec(), vec![10, 11, 12]);
    }

    #[test]
    fn white_is_zero_density() {
        let od = rgb_to_od::<f64, _>(array![[255u8, 255, 255]].view());
        assert!(od.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn cast_wraps_instead_of_clipping() {
        // 255 * e^0.01 = 257.56 -> 257 -> 1
        let od = array![[-0.01f64, 0.0, 50.0]];
        let rgb = od_to_rgb(od.view());
        assert_eq!(rgb, array![[1u8, 255, 0]]);
        assert_eq!(cast_intensity(f64::NAN), 0);
        assert_eq!(cast_intensity(12.7f64), 12);
    }

    #[test]
    fn f32_just_below_an_integer_truncates() {
        let od = array![-(100.999f32 / 255.0).ln()];
        assert_eq!(od_to_rgb(od.view())[0], 100);
        assert_eq!(cast_intensity(254.998f32), 254);
        assert_eq!(cast_intensity(100.999f64), 100);

        let values: Array1<u8> = (1u8..=255).collect();
        let back = od_to_rgb(rgb_to_od::<f32, _>(values.view()).view());
        assert_eq!(back, values);
    }
}
