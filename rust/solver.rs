//! Boundary to the external non-negative sparse regression.
//!
//! The pipeline never solves the regression itself. A [`ConcentrationSolver`]
//! is injected by the caller; for every row `od_i` of the optical-density
//! matrix it must return the coefficients `c_i >= 0` minimising
//!
//! ```text
//! ½‖od_i − c_i · S‖² + λ‖c_i‖₁
//! ```
//!
//! where `S` is the `K×3` stain matrix.

use crate::error::SolverError;
use crate::float_trait::StainFloat;
use ndarray::{Array2, ArrayView2};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

pub trait ConcentrationSolver<F: StainFloat>: Sync {
    /// `od` is `Npix×3`, `stains` is `K×3`; returns `Npix×K`.
    fn solve(
        &self,
        od: ArrayView2<'_, F>,
        stains: ArrayView2<'_, F>,
        lambda: F,
    ) -> Result<Array2<F>, SolverError>;
}

impl<F: StainFloat, S: ConcentrationSolver<F> + ?Sized> ConcentrationSolver<F> for &S {
    fn solve(
        &self,
        od: ArrayView2<'_, F>,
        stains: ArrayView2<'_, F>,
        lambda: F,
    ) -> Result<Array2<F>, SolverError> {
        (**self).solve(od, stains, lambda)
    }
}

impl<F: StainFloat, S: ConcentrationSolver<F> + ?Sized> ConcentrationSolver<F> for Box<S> {
    fn solve(
        &self,
        od: ArrayView2<'_, F>,
        stains: ArrayView2<'_, F>,
        lambda: F,
    ) -> Result<Array2<F>, SolverError> {
        (**self).solve(od, stains, lambda)
    }
}

/// Adapts a closure into a [`ConcentrationSolver`].
pub struct FnSolver<C>(pub C);

impl<C> FnSolver<C> {
    pub fn new<F>(f: C) -> Self
    where
        F: StainFloat,
        C: Fn(ArrayView2<'_, F>, ArrayView2<'_, F>, F) -> Result<Array2<F>, SolverError> + Sync,
    {
        Self(f)
    }
}

impl<F, C> ConcentrationSolver<F> for FnSolver<C>
where
    F: StainFloat,
    C: Fn(ArrayView2<'_, F>, ArrayView2<'_, F>, F) -> Result<Array2<F>, SolverError> + Sync,
{
    fn solve(
        &self,
        od: ArrayView2<'_, F>,
        stains: ArrayView2<'_, F>,
        lambda: F,
    ) -> Result<Array2<F>, SolverError> {
        (self.0)(od, stains, lambda)
    }
}

/// Run the solver, turning panics and malformed output into [`SolverError`]s.
pub fn solve_checked<F, S>(
    solver: &S,
    od: ArrayView2<'_, F>,
    stains: ArrayView2<'_, F>,
    lambda: F,
) -> Result<Array2<F>, SolverError>
where
    F: StainFloat,
    S: ConcentrationSolver<F> + ?Sized,
{
    let expected = (od.nrows(), stains.nrows());
    let out = catch_unwind(AssertUnwindSafe(|| solver.solve(od, stains, lambda)))
        .map_err(|payload| SolverError::Panicked(panic_message(payload.as_ref())))??;

    if out.dim() != expected {
        return Err(SolverError::BadShape {
            expected,
            found: out.dim(),
        });
    }
    if out.iter().any(|v| !v.is_finite()) {
        return Err(SolverError::NonFinite);
    }
    Ok(out)
}

/// Like [`solve_checked`], but logs the failure and yields `None`.
pub fn solve_or_none<F, S>(
    solver: &S,
    od: ArrayView2<'_, F>,
    stains: ArrayView2<'_, F>,
    lambda: F,
) -> Option<Array2<F>>
where
    F: StainFloat,
    S: ConcentrationSolver<F> + ?Sized,
{
    match solve_checked(solver, od, stains, lambda) {
        Ok(c) => Some(c),
        Err(e) => {
            error!(error = %e, pixels = od.nrows(), "concentration solver failed");
            None
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
