//! Extraction settings.

use serde::{Deserialize, Serialize};

/// Combined height + width above which an image is split into tiles.
pub const DEFAULT_SPLIT_THRESHOLD: usize = 30_000;
/// Tiles per axis when splitting. Fixed; the grid is always `SPLIT_FACTOR²` tiles.
pub const SPLIT_FACTOR: usize = 2;
/// Upper bound on tile worker threads.
pub const DEFAULT_MAX_WORKERS: usize = 32;
/// L1 sparsity weight passed to the solver.
pub const DEFAULT_LAMBDA: f64 = 0.01;

/// What to do when image dimensions are not multiples of [`SPLIT_FACTOR`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Drop the remainder rows/columns and log a warning.
    #[default]
    Truncate,
    /// Refuse to process the image.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub lambda: f64,
    pub split_threshold: usize,
    pub max_workers: usize,
    pub boundary: BoundaryPolicy,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            lambda: DEFAULT_LAMBDA,
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
            max_workers: DEFAULT_MAX_WORKERS,
            boundary: BoundaryPolicy::default(),
        }
    }
}

impl ExtractionConfig {
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    /// Whether an image of this size must be split. Strictly greater than the threshold.
    pub fn requires_split(&self, height: usize, width: usize) -> bool {
        height + width > self.split_threshold
    }

    /// Worker count: `min(max_workers, available_parallelism)`, at least one.
    pub fn pool_size(&self) -> usize {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.max_workers.min(available).max(1)
    }
}
