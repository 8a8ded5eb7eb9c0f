//! Tile grid planning: decides whether an image is split and where each tile sits.

use crate::config::{BoundaryPolicy, ExtractionConfig, SPLIT_FACTOR};
use crate::error::{Result, StainError};
use ndarray::{s, ArrayView3};
use serde::Serialize;
use tracing::{info, warn};

/// Pixel shape of one tile, `(height, width, channels)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl TileShape {
    pub fn pixels(&self) -> usize {
        self.height * self.width
    }
}

/// One cell of the grid. `index` is the row-major slot the tile's result is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSpec {
    pub index: usize,
    pub row: usize,
    pub col: usize,
    pub top: usize,
    pub left: usize,
    pub shape: TileShape,
}

/// A `factor × factor` grid of equally sized tiles anchored at the top-left corner.
///
/// When the image is not divisible by `factor` the remainder rows/columns along
/// the bottom and right edges belong to no tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub factor: usize,
    pub image_height: usize,
    pub image_width: usize,
    pub channels: usize,
    pub tile_height: usize,
    pub tile_width: usize,
}

impl TileGrid {
    pub fn new(height: usize, width: usize, channels: usize, factor: usize) -> Result<Self> {
        if factor == 0 || height < factor || width < factor {
            return Err(StainError::InvalidImage(format!(
                "{height}×{width} image cannot be split into a {factor}×{factor} grid"
            )));
        }
        Ok(Self {
            factor,
            image_height: height,
            image_width: width,
            channels,
            tile_height: height / factor,
            tile_width: width / factor,
        })
    }

    pub fn num_tiles(&self) -> usize {
        self.factor * self.factor
    }

    pub fn tile_shape(&self) -> TileShape {
        TileShape {
            height: self.tile_height,
            width: self.tile_width,
            channels: self.channels,
        }
    }

    pub fn pixels_per_tile(&self) -> usize {
        self.tile_height * self.tile_width
    }

    /// Bottom rows not covered by any tile.
    pub fn dropped_rows(&self) -> usize {
        self.image_height - self.tile_height * self.factor
    }

    /// Right-hand columns not covered by any tile.
    pub fn dropped_cols(&self) -> usize {
        self.image_width - self.tile_width * self.factor
    }

    pub fn is_exact(&self) -> bool {
        self.dropped_rows() == 0 && self.dropped_cols() == 0
    }

    /// Tiles in submission order (row-major), `index = row * factor + col`.
    pub fn tiles(&self) -> impl Iterator<Item = TileSpec> + '_ {
        (0..self.factor).flat_map(move |row| {
            (0..self.factor).map(move |col| TileSpec {
                index: row * self.factor + col,
                row,
                col,
                top: row * self.tile_height,
                left: col * self.tile_width,
                shape: self.tile_shape(),
            })
        })
    }

    /// Borrow the pixels of one tile.
    pub fn view<'a>(&self, image: &ArrayView3<'a, u8>, tile: &TileSpec) -> ArrayView3<'a, u8> {
        image.clone().slice_move(s![
            tile.top..tile.top + tile.shape.height,
            tile.left..tile.left + tile.shape.width,
            ..
        ])
    }
}

/// Outcome of the split decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    WholeImage,
    Tiled(TileGrid),
}

/// Decide how an `H×W×C` image is processed, applying the boundary policy.
pub fn decide(
    height: usize,
    width: usize,
    channels: usize,
    config: &ExtractionConfig,
) -> Result<Decision> {
    info!(height, width, channels, "size of WSI");

    if !config.requires_split(height, width) {
        info!("normalising WSI as a whole");
        return Ok(Decision::WholeImage);
    }

    let grid = TileGrid::new(height, width, channels, SPLIT_FACTOR)?;
    if !grid.is_exact() {
        match config.boundary {
            BoundaryPolicy::Truncate => warn!(
                dropped_rows = grid.dropped_rows(),
                dropped_cols = grid.dropped_cols(),
                factor = grid.factor,
                "image not divisible by split factor; boundary pixels are excluded"
            ),
            BoundaryPolicy::Reject => {
                return Err(StainError::BoundaryTruncation {
                    height,
                    width,
                    factor: grid.factor,
                    dropped_rows: grid.dropped_rows(),
                    dropped_cols: grid.dropped_cols(),
                })
            }
        }
    }
    info!(tiles = grid.num_tiles(), "splitting WSI for normalisation");
    Ok(Decision::Tiled(grid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn small_images_are_processed_whole() {
        let cfg = ExtractionConfig::default();
        assert_eq!(decide(4, 4, 3, &cfg).unwrap(), Decision::WholeImage);
        assert_eq!(decide(15_000, 15_000, 3, &cfg).unwrap(), Decision::WholeImage);
    }

    #[test]
    fn large_images_use_a_two_by_two_grid() {
        let cfg = ExtractionConfig::default();
        let Decision::Tiled(grid) = decide(20_000, 20_000, 3, &cfg).unwrap() else {
            panic!("expected a tiled decision");
        };
        assert_eq!(grid.num_tiles(), 4);
        assert_eq!(grid.tile_shape(), TileShape { height: 10_000, width: 10_000, channels: 3 });
        assert!(grid.is_exact());
    }

    #[test]
    fn indices_are_row_major() {
        let grid = TileGrid::new(10, 6, 3, 2).unwrap();
        let got: Vec<_> = grid.tiles().map(|t| (t.row, t.col, t.index, t.top, t.left)).collect();
        assert_eq!(
            got,
            vec![(0, 0, 0, 0, 0), (0, 1, 1, 0, 3), (1, 0, 2, 5, 0), (1, 1, 3, 5, 3)]
        );
    }

    #[test]
    fn remainder_is_reported() {
        let grid = TileGrid::new(11, 7, 3, 2).unwrap();
        assert_eq!((grid.tile_height, grid.tile_width), (5, 3));
        assert_eq!((grid.dropped_rows(), grid.dropped_cols()), (1, 1));
        assert!(!grid.is_exact());
    }

    #[test]
    fn reject_policy_fails_on_remainder() {
        let cfg = ExtractionConfig {
            split_threshold: 10,
            boundary: BoundaryPolicy::Reject,
            ..Default::default()
        };
        let err = decide(11, 7, 3, &cfg).unwrap_err();
        assert!(matches!(
            err,
            StainError::BoundaryTruncation { dropped_rows: 1, dropped_cols: 1, .. }
        ));
        assert!(matches!(decide(12, 8, 3, &cfg).unwrap(), Decision::Tiled(_)));
    }

    #[test]
    fn degenerate_split_is_an_error() {
        let cfg = ExtractionConfig {
            split_threshold: 10,
            ..Default::default()
        };
        assert!(matches!(
            decide(40, 1, 3, &cfg).unwrap_err(),
            StainError::InvalidImage(_)
        ));
    }

    #[test]
    fn views_cover_their_tile() {
        let img = Array3::from_shape_fn((4, 6, 3), |(i, j, _)| (i * 10 + j) as u8);
        let grid = TileGrid::new(4, 6, 3, 2).unwrap();
        let tiles: Vec<_> = grid.tiles().collect();
        let v = grid.view(&img.view(), &tiles[3]);
        assert_eq!(v.shape(), &[2, 3, 3]);
        assert_eq!(v[[0, 0, 0]], 23);
    }
}
