use ndarray::ShapeError;
use thiserror::Error;

/// Errors that abort a pipeline invocation before or instead of producing output.
///
/// Solver failures are deliberately absent: they degrade a single unit of work
/// and are reported through the result types instead.
#[derive(Debug, Error)]
pub enum StainError {
    /// The stain matrix does not have one column per image channel.
    #[error("stain matrix must be K×{expected}, got {rows}×{cols}")]
    ShapeMismatch {
        expected: usize,
        rows: usize,
        cols: usize,
    },
    /// The stain matrix has no rows.
    #[error("stain matrix must contain at least one stain vector")]
    EmptyStainMatrix,
    /// The image or concentration array has an unusable layout.
    #[error("invalid input: {0}")]
    InvalidImage(String),
    /// A maximum concentration was zero, negative or not finite.
    #[error("max concentrations must be positive and finite (target {target_max}, source {source_max})")]
    InvalidScale { target_max: f64, source_max: f64 },
    /// Tile grid would drop boundary pixels and the policy forbids it.
    #[error(
        "image {height}×{width} is not divisible by split factor {factor}: \
         {dropped_rows} rows and {dropped_cols} columns would be dropped"
    )]
    BoundaryTruncation {
        height: usize,
        width: usize,
        factor: usize,
        dropped_rows: usize,
        dropped_cols: usize,
    },
    /// The worker pool could not be created.
    #[error("failed to build tile worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// Failure reported by a [`ConcentrationSolver`](crate::solver::ConcentrationSolver).
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    /// The solver itself signalled an error.
    #[error("solver failed: {0}")]
    Failed(String),
    /// The solver panicked.
    #[error("solver panicked: {0}")]
    Panicked(String),
    /// The solver returned a matrix of the wrong shape.
    #[error("solver returned {found:?}, expected {expected:?}")]
    BadShape {
        expected: (usize, usize),
        found: (usize, usize),
    },
    /// The solver returned NaN or infinite coefficients.
    #[error("solver returned non-finite coefficients")]
    NonFinite,
}

pub type Result<T> = std::result::Result<T, StainError>;
