//! Tiled stain-concentration extraction and reconstruction for histology
//! whole-slide images.
//!
//! An RGB image is converted to optical density, each pixel is decomposed
//! against a reference stain basis by an injected [`ConcentrationSolver`], and
//! the concentrations can then be rescaled and re-projected through a target
//! basis to produce a stain-normalised image. Large images are split into a
//! 2×2 grid and solved on a bounded worker pool.

pub mod brightness;
pub mod config;
pub mod error;
pub mod extract;
pub mod float_trait;
pub mod optical_density;
pub mod reconstruct;
pub mod scheduler;
pub mod solver;
pub mod stain_matrix;
pub mod tiling;

#[cfg(feature = "python")]
mod python;

pub use brightness::{concentration_percentile, standardize_brightness};
pub use config::{BoundaryPolicy, ExtractionConfig, SPLIT_FACTOR};
pub use error::{SolverError, StainError};
pub use extract::{extract_concentrations_source, extract_concentrations_target, SourceConcentrations};
pub use float_trait::StainFloat;
pub use optical_density::{od_to_rgb, rgb_to_od};
pub use reconstruct::{reconstruct_image, reconstruct_rgb, reconstruct_tiled};
pub use scheduler::TiledConcentrations;
pub use solver::{ConcentrationSolver, FnSolver};
pub use stain_matrix::{normalize_rows, StainMatrix};
pub use tiling::{TileGrid, TileShape};
