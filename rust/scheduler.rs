//! Bounded-parallel dispatch and gather of per-tile concentration jobs.
//!
//! Every tile is submitted to a dedicated worker pool together with the slot
//! index it was assigned at submission. Results come back over a channel in
//! completion order and are written to that recorded slot, so the spatial
//! layout of the tensor never depends on which worker finished first.

use crate::error::{Result, SolverError};
use crate::float_trait::StainFloat;
use crate::optical_density::rgb_pixels_to_od;
use crate::solver::{solve_checked, ConcentrationSolver};
use crate::stain_matrix::StainMatrix;
use crate::tiling::{TileGrid, TileShape, TileSpec};
use crossbeam::channel;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use std::time::Instant;
use tracing::{debug, error, info};

/// Concentrations of a split image.
#[derive(Debug, Clone)]
pub struct TiledConcentrations<F> {
    /// `(num_tiles, pixels_per_tile, K)`; slot `i` belongs to grid cell `i` in row-major order.
    pub tensor: Array3<F>,
    /// Tile shapes in submission order.
    pub tile_shapes: Vec<TileShape>,
    /// Slots whose solver call failed and were left zero-filled, ascending.
    pub failed_tiles: Vec<usize>,
    pub grid: TileGrid,
    /// Worker threads used for this invocation.
    pub pool_size: usize,
}

impl<F: StainFloat> TiledConcentrations<F> {
    pub fn tile_count(&self) -> usize {
        self.tile_shapes.len()
    }

    /// `pixels_per_tile × K` concentrations of one slot.
    pub fn tile(&self, index: usize) -> ArrayView2<'_, F> {
        self.tensor.index_axis(Axis(0), index)
    }

    pub fn is_complete(&self) -> bool {
        self.failed_tiles.is_empty()
    }
}

/// A tile in flight: its pixels plus the slot it must land in.
struct TileJob<'a> {
    spec: TileSpec,
    pixels: ArrayView3<'a, u8>,
    submitted: Instant,
}

struct TileOutcome<F> {
    index: usize,
    submitted: Instant,
    result: std::result::Result<Array2<F>, SolverError>,
}

impl TileJob<'_> {
    fn run<F, S>(self, stains: &StainMatrix<F>, solver: &S, lambda: F) -> TileOutcome<F>
    where
        F: StainFloat,
        S: ConcentrationSolver<F> + ?Sized,
    {
        let result = rgb_pixels_to_od::<F>(self.pixels)
            .map_err(|e| SolverError::Failed(format!("tile reshape failed: {e}")))
            .and_then(|od| solve_checked(solver, od.view(), stains.view(), lambda));
        TileOutcome {
            index: self.spec.index,
            submitted: self.submitted,
            result,
        }
    }
}

/// Solve every tile of `grid` on a pool of `pool_size` workers and reassemble the tensor.
///
/// A failed tile keeps its zero fill and is listed in
/// [`TiledConcentrations::failed_tiles`]; the remaining tiles are unaffected.
pub fn extract_tiled<F, S>(
    image: ArrayView3<'_, u8>,
    grid: TileGrid,
    stains: &StainMatrix<F>,
    solver: &S,
    lambda: F,
    pool_size: usize,
) -> Result<TiledConcentrations<F>>
where
    F: StainFloat,
    S: ConcentrationSolver<F> + ?Sized,
{
    let begin = Instant::now();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(pool_size)
        .thread_name(|i| format!("stain-tile-{i}"))
        .build()?;

    let mut tensor = Array3::<F>::zeros((grid.num_tiles(), grid.pixels_per_tile(), stains.n_stains()));
    let mut tile_shapes = Vec::with_capacity(grid.num_tiles());
    let mut failed_tiles = Vec::new();

    let (tx, rx) = channel::unbounded::<TileOutcome<F>>();

    // The body runs on the calling thread, so blocking on `rx` never starves the pool.
    pool.in_place_scope(|scope| {
        for spec in grid.tiles() {
            let job = TileJob {
                spec,
                pixels: grid.view(&image, &spec),
                submitted: Instant::now(),
            };
            tile_shapes.push(spec.shape);
            let tx = tx.clone();
            scope.spawn(move |_| {
                let outcome = job.run(stains, solver, lambda);
                // The receiver outlives the scope; a send can only fail if the gather loop panicked.
                let _ = tx.send(outcome);
            });
            debug!(tile = spec.index, row = spec.row, col = spec.col, "submitted tile");
        }
        drop(tx);

        for outcome in rx.iter() {
            let elapsed_ms = outcome.submitted.elapsed().as_millis() as u64;
            match outcome.result {
                Ok(c) => {
                    tensor.index_axis_mut(Axis(0), outcome.index).assign(&c);
                    info!(tile = outcome.index, elapsed_ms, "received tile concentrations");
                }
                Err(e) => {
                    error!(tile = outcome.index, error = %e, "tile solver failed; slot left zero-filled");
                    failed_tiles.push(outcome.index);
                }
            }
        }
    });

    failed_tiles.sort_unstable();
    info!(
        tiles = grid.num_tiles(),
        failed = failed_tiles.len(),
        elapsed_ms = begin.elapsed().as_millis() as u64,
        "finished tiled concentration extraction"
    );

    Ok(TiledConcentrations {
        tensor,
        tile_shapes,
        failed_tiles,
        grid,
        pool_size,
    })
}
