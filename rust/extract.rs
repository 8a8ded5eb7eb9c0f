//! Public entry points: concentration extraction for reference and source images.

use crate::config::ExtractionConfig;
use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use crate::optical_density::rgb_pixels_to_od;
use crate::scheduler::{extract_tiled, TiledConcentrations};
use crate::solver::{solve_or_none, ConcentrationSolver};
use crate::stain_matrix::{StainMatrix, CHANNELS};
use crate::tiling::{decide, Decision, TileShape};
use ndarray::{Array2, ArrayView3};
use std::time::Instant;
use tracing::info;

/// Concentrations of a source image, whole or split into tiles.
#[derive(Debug, Clone)]
pub enum SourceConcentrations<F> {
    /// `Npix×K` concentrations, or `None` if the solver failed.
    Whole(Option<Array2<F>>),
    Tiled(TiledConcentrations<F>),
}

impl<F: StainFloat> SourceConcentrations<F> {
    pub fn is_split(&self) -> bool {
        matches!(self, Self::Tiled(_))
    }

    /// Tile shapes in submission order; `None` for whole-image results.
    pub fn tile_shapes(&self) -> Option<&[TileShape]> {
        match self {
            Self::Whole(_) => None,
            Self::Tiled(t) => Some(&t.tile_shapes),
        }
    }

    pub fn tile_count(&self) -> Option<usize> {
        match self {
            Self::Whole(_) => None,
            Self::Tiled(t) => Some(t.tile_count()),
        }
    }

    pub fn as_whole(&self) -> Option<&Array2<F>> {
        match self {
            Self::Whole(c) => c.as_ref(),
            Self::Tiled(_) => None,
        }
    }

    pub fn as_tiled(&self) -> Option<&TiledConcentrations<F>> {
        match self {
            Self::Whole(_) => None,
            Self::Tiled(t) => Some(t),
        }
    }
}

fn check_channels<F: StainFloat>(image: &ArrayView3<u8>, stains: &StainMatrix<F>) -> Result<()> {
    let channels = image.shape()[2];
    if channels != CHANNELS {
        return Err(StainError::ShapeMismatch {
            expected: channels,
            rows: stains.n_stains(),
            cols: CHANNELS,
        });
    }
    Ok(())
}

/// Concentrations of a whole `H×W×3` image as an `(H·W)×K` matrix.
///
/// A solver failure is logged and yields `Ok(None)`; only configuration errors
/// are returned as `Err`.
pub fn extract_concentrations_target<F, S>(
    image: ArrayView3<u8>,
    stains: &StainMatrix<F>,
    solver: &S,
    lambda: F,
) -> Result<Option<Array2<F>>>
where
    F: StainFloat,
    S: ConcentrationSolver<F> + ?Sized,
{
    check_channels(&image, stains)?;
    let od = rgb_pixels_to_od::<F>(image)?;
    Ok(solve_or_none(solver, od.view(), stains.view(), lambda))
}

/// Concentrations of a source image, split into a 2×2 grid when it is large.
///
/// Images with `H + W` above [`ExtractionConfig::split_threshold`] are tiled and
/// solved on a bounded worker pool; see [`extract_tiled`].
pub fn extract_concentrations_source<F, S>(
    image: ArrayView3<u8>,
    stains: &StainMatrix<F>,
    solver: &S,
    config: &ExtractionConfig,
) -> Result<SourceConcentrations<F>>
where
    F: StainFloat,
    S: ConcentrationSolver<F> + ?Sized,
{
    check_channels(&image, stains)?;
    let (h, w, c) = image.dim();
    let lambda = F::from(config.lambda).ok_or_else(|| {
        StainError::InvalidImage(format!("lambda {} is not representable", config.lambda))
    })?;

    match decide(h, w, c, config)? {
        Decision::WholeImage => {
            let begin = Instant::now();
            let concentrations = extract_concentrations_target(image, stains, solver, lambda)?;
            info!(
                elapsed_ms = begin.elapsed().as_millis() as u64,
                solved = concentrations.is_some(),
                "finished whole-image concentration extraction"
            );
            Ok(SourceConcentrations::Whole(concentrations))
        }
        Decision::Tiled(grid) => {
            let tiled = extract_tiled(image, grid, stains, solver, lambda, config.pool_size())?;
            Ok(SourceConcentrations::Tiled(tiled))
        }
    }
}
