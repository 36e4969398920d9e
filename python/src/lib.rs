//! Python bindings for fastfit via PyO3.
//!
//! Exposes the vertex fit to Python as the `pyfastfit` module.

use numpy::{PyArray2, PyReadonlyArray2};
use pyo3::prelude::*;

mod helix;
mod helpers;
mod vertex_fit;

use helix::PyHelix;
use helpers::{matrix_from_py, matrix_to_py};
use vertex_fit::PyVertexFit;

fn invert_checked<'py, const N: usize>(
    py: Python<'py>,
    matrix: PyReadonlyArray2<f64>,
) -> PyResult<(Bound<'py, PyArray2<f64>>, bool)>
where
    nalgebra::Const<N>: nalgebra::DimMin<nalgebra::Const<N>, Output = nalgebra::Const<N>>,
{
    let m = matrix_from_py::<N>(matrix, "matrix")?;
    let (inverse, ok) = fastfit::invert_and_check(&m);
    Ok((matrix_to_py(py, &inverse), ok))
}

/// Invert a 3×3, 5×5 or 6×6 matrix and check that the product with the input
/// is close to the identity.
///
/// Returns:
///     (inverse, ok). On failure the inverse is all zeros.
#[pyfunction]
fn invert_and_check<'py>(
    py: Python<'py>,
    matrix: PyReadonlyArray2<f64>,
) -> PyResult<(Bound<'py, PyArray2<f64>>, bool)> {
    let shape = matrix.as_array().shape().to_vec();
    match shape.as_slice() {
        [3, 3] => invert_checked::<3>(py, matrix),
        [5, 5] => invert_checked::<5>(py, matrix),
        [6, 6] => invert_checked::<6>(py, matrix),
        shape => Err(pyo3::exceptions::PyValueError::new_err(format!(
            "matrix must be 3x3, 5x5 or 6x6 (got {:?})",
            shape
        ))),
    }
}

/// pyfastfit: fast vertex fitting of charged tracks
///
/// Helix linearisation and an iterative progressive vertex fit, exposed to
/// Python via PyO3.
#[pymodule]
fn pyfastfit(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyVertexFit>()?;
    m.add_class::<PyHelix>()?;
    m.add_function(wrap_pyfunction!(invert_and_check, m)?)?;
    m.add("KAPPA", fastfit::KAPPA)?;
    m.add("__version__", fastfit::VERSION)?;
    Ok(())
}
