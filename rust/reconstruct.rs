use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use crate::optical_density::od_to_rgb;
use crate::scheduler::TiledConcentrations;
use crate::stain_matrix::{StainMatrix, CHANNELS};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayViewMut, Dimension};

/// Ratio `max_c_target / max_c_source` used to equalise stain intensity ranges.
pub fn rescale_ratio<F: StainFloat>(max_c_target: F, max_c_source: F) -> Result<F> {
    let valid = |v: F| v.is_finite() && v > F::zero();
    if !valid(max_c_target) || !valid(max_c_source) {
        return Err(StainError::InvalidScale {
            target_max: max_c_target.to_f64().unwrap_or(f64::NAN),
            source_max: max_c_source.to_f64().unwrap_or(f64::NAN),
        });
    }
    Ok(max_c_target / max_c_source)
}

/// Multiply every concentration by `ratio`, in place.
pub fn rescale_concentrations<F, D>(mut concentrations: ArrayViewMut<F, D>, ratio: F)
where
    F: StainFloat,
    D: Dimension,
{
    concentrations.par_mapv_inplace(|c| c * ratio);
}

/// Reconstruct RGB pixels from stain concentrations under a target stain basis.
///
/// ```text
/// OD  = (C · max_c_target / max_c_source) · S_target
/// RGB = 255 × exp(−OD)
/// ```
///
/// # Arguments
///
/// * `concentrations` – `Npix×K` concentrations (left untouched).
/// * `target`         – `K×3` stain matrix of the reference image.
/// * `max_c_target`   – concentration scale of the reference image.
/// * `max_c_source`   – concentration scale of the image being normalised.
///
/// # Returns
///
/// `Npix×3` intensities, cast to `u8` the same way as [`od_to_rgb`].
pub fn reconstruct_rgb<F: StainFloat>(
    concentrations: ArrayView2<F>,
    target: &StainMatrix<F>,
    max_c_target: F,
    max_c_source: F,
) -> Result<Array2<u8>> {
    if concentrations.ncols() != target.n_stains() {
        return Err(StainError::InvalidImage(format!(
            "concentrations have {} stains, target stain matrix has {}",
            concentrations.ncols(),
            target.n_stains()
        )));
    }
    let ratio = rescale_ratio(max_c_target, max_c_source)?;

    let mut scaled = concentrations.to_owned();
    rescale_concentrations(scaled.view_mut(), ratio);

    let od = scaled.dot(&target.view());
    Ok(od_to_rgb(od.view()))
}

/// [`reconstruct_rgb`] reshaped to an `H×W×3` image.
pub fn reconstruct_image<F: StainFloat>(
    concentrations: ArrayView2<F>,
    target: &StainMatrix<F>,
    max_c_target: F,
    max_c_source: F,
    (height, width): (usize, usize),
) -> Result<Array3<u8>> {
    let rgb = reconstruct_rgb(concentrations, target, max_c_target, max_c_source)?;
    Ok(rgb.into_shape_with_order((height, width, CHANNELS))?)
}

/// Reconstruct every tile and stitch them back at their grid positions.
///
/// The output covers `factor·tile_height × factor·tile_width` pixels; boundary
/// rows/columns that were never tiled are not part of it. Failed tiles come
/// out white (zero stain).
pub fn reconstruct_tiled<F: StainFloat>(
    tiled: &TiledConcentrations<F>,
    target: &StainMatrix<F>,
    max_c_target: F,
    max_c_source: F,
) -> Result<Array3<u8>> {
    let grid = &tiled.grid;
    let mut out = Array3::<u8>::zeros((
        grid.factor * grid.tile_height,
        grid.factor * grid.tile_width,
        CHANNELS,
    ));

    for (spec, shape) in grid.tiles().zip(&tiled.tile_shapes) {
        let tile = reconstruct_image(
            tiled.tile(spec.index),
            target,
            max_c_target,
            max_c_source,
            (shape.height, shape.width),
        )?;
        out.slice_mut(s![
            spec.top..spec.top + shape.height,
            spec.left..spec.left + shape.width,
            ..
        ])
        .assign(&tile);
    }
    Ok(out)
}

/// Naive per-pixel reconstruction kept as a reference for the vectorised path.
#[cfg(test)]
pub(crate) fn reconstruct_rgb_naive<F: StainFloat>(
    concentrations: ArrayView2<F>,
    target: ArrayView2<F>,
    ratio: F,
) -> Array2<u8> {
    let mut out = Array2::<u8>::zeros((concentrations.nrows(), CHANNELS));
    for (i, row) in concentrations.outer_iter().enumerate() {
        for ch in 0..CHANNELS {
            let mut od = F::zero();
            for k in 0..row.len() {
                od = od + row[k] * ratio * target[[k, ch]];
            }
            let v = F::from(255.0).unwrap() * num_traits::Float::exp(-od);
            out[[i, ch]] = crate::optical_density::cast_intensity(v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::TileGrid;
    use ndarray::array;

    fn target() -> StainMatrix<f64> {
        StainMatrix::normalized(array![[0.65, 0.70, 0.29], [0.07, 0.99, 0.11]]).unwrap()
    }

    fn concentrations() -> Array2<f64> {
        Array2::from_shape_fn((64, 2), |(i, k)| ((i * 7 + k * 13) % 17) as f64 * 0.05)
    }

    #[test]
    fn equal_scales_reduce_to_plain_projection() {
        let c = concentrations();
        let m = target();
        let got = reconstruct_rgb(c.view(), &m, 1.7, 1.7).unwrap();
        let expected = od_to_rgb(c.dot(&m.view()).view());
        assert_eq!(got, expected);
    }

    #[test]
    fn matches_naive_reconstruction() {
        let c = concentrations();
        let m = target();
        let got = reconstruct_rgb(c.view(), &m, 2.0, 1.0).unwrap();
        let naive = reconstruct_rgb_naive(c.view(), m.view(), 2.0);
        let max_diff = got
            .iter()
            .zip(naive.iter())
            .map(|(&a, &b)| (a as i16 - b as i16).abs())
            .max()
            .unwrap();
        // Only summation order differs, which can move a value across an integer boundary.
        assert!(max_diff <= 1, "max diff {max_diff}");
    }

    #[test]
    fn zero_concentration_is_white() {
        let c = Array2::<f64>::zeros((3, 2));
        let got = reconstruct_rgb(c.view(), &target(), 1.0, 2.0).unwrap();
        assert!(got.iter().all(|&v| v == 255));
    }

    #[test]
    fn input_is_not_mutated() {
        let c = concentrations();
        let before = c.clone();
        reconstruct_rgb(c.view(), &target(), 3.0, 1.0).unwrap();
        assert_eq!(c, before);
    }

    #[test]
    fn rescale_scales_in_place() {
        let mut c = array![[1.0f64, 2.0], [0.5, 0.0]];
        rescale_concentrations(c.view_mut(), 2.0);
        assert_eq!(c, array![[2.0, 4.0], [1.0, 0.0]]);
    }

    #[test]
    fn rejects_bad_scales_and_stain_counts() {
        let c = concentrations();
        assert!(matches!(
            reconstruct_rgb(c.view(), &target(), 1.0, 0.0).unwrap_err(),
            StainError::InvalidScale { .. }
        ));
        assert!(matches!(
            reconstruct_rgb(c.view(), &target(), f64::NAN, 1.0).unwrap_err(),
            StainError::InvalidScale { .. }
        ));
        let three = Array2::<f64>::zeros((4, 3));
        assert!(matches!(
            reconstruct_rgb(three.view(), &target(), 1.0, 1.0).unwrap_err(),
            StainError::InvalidImage(_)
        ));
    }

    #[test]
    fn image_shape_must_match_pixel_count() {
        let c = concentrations();
        let img = reconstruct_image(c.view(), &target(), 1.0, 1.0, (8, 8)).unwrap();
        assert_eq!(img.shape(), &[8, 8, 3]);
        assert!(matches!(
            reconstruct_image(c.view(), &target(), 1.0, 1.0, (8, 9)).unwrap_err(),
            StainError::Shape(_)
        ));
    }

    #[test]
    fn tiles_are_stitched_at_grid_positions() {
        let grid = TileGrid::new(4, 6, 3, 2).unwrap();
        let mut tensor = ndarray::Array3::<f64>::zeros((4, 6, 2));
        // Slot 1 (top-right) carries stain; the rest stays white.
        tensor.index_axis_mut(ndarray::Axis(0), 1).fill(1.0);
        let tiled = TiledConcentrations {
            tensor,
            tile_shapes: grid.tiles().map(|t| t.shape).collect(),
            failed_tiles: vec![],
            grid,
            pool_size: 1,
        };
        let img = reconstruct_tiled(&tiled, &target(), 1.0, 1.0).unwrap();
        assert_eq!(img.shape(), &[4, 6, 3]);
        assert!(img.slice(s![0..2, 0..3, ..]).iter().all(|&v| v == 255));
        assert!(img.slice(s![0..2, 3..6, ..]).iter().all(|&v| v < 255));
        assert!(img.slice(s![2..4, .., ..]).iter().all(|&v| v == 255));
    }
}
