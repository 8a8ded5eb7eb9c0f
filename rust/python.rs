use crate::config::{BoundaryPolicy, ExtractionConfig};
use crate::error::SolverError;
use crate::extract::{self, SourceConcentrations};
use crate::optical_density;
use crate::reconstruct;
use crate::solver::ConcentrationSolver;
use crate::stain_matrix::StainMatrix;
use ndarray::{Array2, ArrayView2};
use numpy::{
    IntoPyArray, PyArray2, PyArrayDyn, PyReadonlyArray2, PyReadonlyArray3, PyReadonlyArrayDyn,
};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::pyfunction;

fn value_error(e: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// A Python callable `solver(od, stain_matrix, lambda) -> ndarray` used as the
/// concentration solver, e.g. a wrapper around `spams.lasso`.
struct PyCallableSolver {
    callable: Py<PyAny>,
}

impl ConcentrationSolver<f64> for PyCallableSolver {
    fn solve(
        &self,
        od: ArrayView2<'_, f64>,
        stains: ArrayView2<'_, f64>,
        lambda: f64,
    ) -> Result<Array2<f64>, SolverError> {
        Python::with_gil(|py| {
            let od = od.to_owned().into_pyarray(py);
            let stains = stains.to_owned().into_pyarray(py);
            let out = self
                .callable
                .call1(py, (od, stains, lambda))
                .map_err(|e| SolverError::Failed(e.to_string()))?;
            let arr: PyReadonlyArray2<'_, f64> = out
                .extract(py)
                .map_err(|e| SolverError::Failed(format!("solver returned a non-matrix: {e}")))?;
            Ok(arr.as_array().to_owned())
        })
    }
}

fn parse_boundary(boundary: Option<&str>) -> PyResult<BoundaryPolicy> {
    match boundary.unwrap_or("truncate") {
        "truncate" => Ok(BoundaryPolicy::Truncate),
        "reject" => Ok(BoundaryPolicy::Reject),
        other => Err(PyValueError::new_err(format!(
            "boundary must be 'truncate' or 'reject', got {other:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Macro to stamp out typed PyO3 function variants for each float precision.
//
// Each invocation generates:
//   - py_rgb_to_od_{suffix}
//   - py_od_to_rgb_{suffix}
//   - py_reconstruct_rgb_{suffix}
// ---------------------------------------------------------------------------
macro_rules! define_typed_pyfunctions {
    ($suffix:ident, $f:ty) => {
        ::paste::paste! {

        #[pyfunction]
        #[pyo3(signature = (im_rgb))]
        fn [<py_rgb_to_od_ $suffix>]<'py>(
            py: Python<'py>,
            im_rgb: PyReadonlyArrayDyn<'py, u8>,
        ) -> Bound<'py, PyArrayDyn<$f>> {
            optical_density::rgb_to_od::<$f, _>(im_rgb.as_array()).into_pyarray(py)
        }

        #[pyfunction]
        #[pyo3(signature = (od))]
        fn [<py_od_to_rgb_ $suffix>]<'py>(
            py: Python<'py>,
            od: PyReadonlyArrayDyn<'py, $f>,
        ) -> Bound<'py, PyArrayDyn<u8>> {
            optical_density::od_to_rgb(od.as_array()).into_pyarray(py)
        }

        #[pyfunction]
        #[pyo3(signature = (concentrations, stain_matrix_target, max_c_target, max_c_source))]
        fn [<py_reconstruct_rgb_ $suffix>]<'py>(
            py: Python<'py>,
            concentrations: PyReadonlyArray2<'py, $f>,
            stain_matrix_target: PyReadonlyArray2<'py, $f>,
            max_c_target: f64,
            max_c_source: f64,
        ) -> PyResult<Bound<'py, PyArray2<u8>>> {
            let target = StainMatrix::from_view(stain_matrix_target.as_array()).map_err(value_error)?;
            let result = reconstruct::reconstruct_rgb(
                concentrations.as_array(),
                &target,
                max_c_target as $f,
                max_c_source as $f,
            )
            .map_err(value_error)?;
            Ok(result.into_pyarray(py))
        }

        } // paste!
    };
}

define_typed_pyfunctions!(f32, f32);
define_typed_pyfunctions!(f64, f64);

#[pyfunction]
#[pyo3(signature = (im_rgb, stain_matrix, solver, lamda=0.01))]
fn py_extract_concentrations_target<'py>(
    py: Python<'py>,
    im_rgb: PyReadonlyArray3<'py, u8>,
    stain_matrix: PyReadonlyArray2<'py, f64>,
    solver: Py<PyAny>,
    lamda: f64,
) -> PyResult<Option<Bound<'py, PyArray2<f64>>>> {
    let stains = StainMatrix::from_view(stain_matrix.as_array()).map_err(value_error)?;
    let solver = PyCallableSolver { callable: solver };
    let image = im_rgb.as_array();
    let result = py
        .allow_threads(|| extract::extract_concentrations_target(image, &stains, &solver, lamda))
        .map_err(value_error)?;
    Ok(result.map(|c| c.into_pyarray(py)))
}

type SourceTuple = (
    Option<PyObject>,
    Option<Vec<(usize, usize, usize)>>,
    Option<usize>,
    bool,
    Vec<usize>,
);

/// Returns `(concentrations, tile_shapes, tile_count, split, failed_tiles)`.
#[pyfunction]
#[pyo3(signature = (im_rgb, stain_matrix, solver, lamda=0.01, split_threshold=None, max_workers=None, boundary=None))]
#[allow(clippy::too_many_arguments)]
fn py_extract_concentrations_source<'py>(
    py: Python<'py>,
    im_rgb: PyReadonlyArray3<'py, u8>,
    stain_matrix: PyReadonlyArray2<'py, f64>,
    solver: Py<PyAny>,
    lamda: f64,
    split_threshold: Option<usize>,
    max_workers: Option<usize>,
    boundary: Option<String>,
) -> PyResult<SourceTuple> {
    let defaults = ExtractionConfig::default();
    let config = ExtractionConfig {
        lambda: lamda,
        split_threshold: split_threshold.unwrap_or(defaults.split_threshold),
        max_workers: max_workers.unwrap_or(defaults.max_workers),
        boundary: parse_boundary(boundary.as_deref())?,
    };
    let stains = StainMatrix::from_view(stain_matrix.as_array()).map_err(value_error)?;
    let solver = PyCallableSolver { callable: solver };
    let image = im_rgb.as_array();
    let result = py
        .allow_threads(|| extract::extract_concentrations_source(image, &stains, &solver, &config))
        .map_err(value_error)?;

    Ok(match result {
        SourceConcentrations::Whole(c) => (
            c.map(|c| c.into_pyarray(py).into_any().unbind()),
            None,
            None,
            false,
            Vec::new(),
        ),
        SourceConcentrations::Tiled(t) => {
            let shapes = t
                .tile_shapes
                .iter()
                .map(|s| (s.height, s.width, s.channels))
                .collect::<Vec<_>>();
            let count = shapes.len();
            (
                Some(t.tensor.into_pyarray(py).into_any().unbind()),
                Some(shapes),
                Some(count),
                true,
                t.failed_tiles,
            )
        }
    })
}

/// Install a `tracing` subscriber printing to stderr. Returns `False` if one was already set.
#[pyfunction]
#[pyo3(signature = (level=None))]
fn init_logging(level: Option<String>) -> PyResult<bool> {
    let filter = match level.as_deref() {
        Some(l) => tracing_subscriber::EnvFilter::try_new(l)
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))?,
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
    };
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok())
}

// ---------------------------------------------------------------------------
// PyO3 module: register every typed variant.
// ---------------------------------------------------------------------------
#[pymodule]
fn _rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // f64
    m.add_function(wrap_pyfunction!(py_rgb_to_od_f64, m)?)?;
    m.add_function(wrap_pyfunction!(py_od_to_rgb_f64, m)?)?;
    m.add_function(wrap_pyfunction!(py_reconstruct_rgb_f64, m)?)?;
    // f32
    m.add_function(wrap_pyfunction!(py_rgb_to_od_f32, m)?)?;
    m.add_function(wrap_pyfunction!(py_od_to_rgb_f32, m)?)?;
    m.add_function(wrap_pyfunction!(py_reconstruct_rgb_f32, m)?)?;
    // solver-driven extraction
    m.add_function(wrap_pyfunction!(py_extract_concentrations_target, m)?)?;
    m.add_function(wrap_pyfunction!(py_extract_concentrations_source, m)?)?;
    m.add_function(wrap_pyfunction!(init_logging, m)?)?;
    Ok(())
}
