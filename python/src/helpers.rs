use numpy::ndarray;
use numpy::{PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::prelude::*;

use fastfit::linalg::matrix_from_row_slice;
use fastfit::{FitError, Vector3};
use nalgebra::{SMatrix, SVector};

/// Read a length-3 numpy vector.
pub(crate) fn vector3_from_py(array: PyReadonlyArray1<f64>, name: &str) -> PyResult<Vector3> {
    let a = array.as_array();
    if a.len() != 3 {
        return Err(pyo3::exceptions::PyValueError::new_err(format!(
            "{name} must have 3 elements (got {})",
            a.len()
        )));
    }
    Ok(Vector3::new(a[0], a[1], a[2]))
}

/// Read an N×N numpy matrix. Element `[i, j]` of the array is row `i`, column `j`.
pub(crate) fn matrix_from_py<const N: usize>(
    array: PyReadonlyArray2<f64>,
    name: &str,
) -> PyResult<SMatrix<f64, N, N>> {
    let a = array.as_array();
    if a.shape() != [N, N] {
        return Err(pyo3::exceptions::PyValueError::new_err(format!(
            "{name} must be a {N}x{N} array (got {}x{})",
            a.shape()[0],
            a.shape()[1]
        )));
    }
    // Logical iteration order of an ndarray is row-major whatever its memory layout.
    let values: Vec<f64> = a.iter().copied().collect();
    matrix_from_row_slice::<N>(&values).ok_or_else(|| {
        pyo3::exceptions::PyValueError::new_err(format!("{name} has the wrong number of elements"))
    })
}

pub(crate) fn vector_to_py<'py, const N: usize>(
    py: Python<'py>,
    v: &SVector<f64, N>,
) -> Bound<'py, PyArray1<f64>> {
    PyArray1::from_vec(py, v.iter().copied().collect())
}

pub(crate) fn matrix_to_py<'py, const R: usize, const C: usize>(
    py: Python<'py>,
    m: &SMatrix<f64, R, C>,
) -> Bound<'py, PyArray2<f64>> {
    PyArray2::from_owned_array(py, ndarray::Array2::from_shape_fn((R, C), |(i, j)| m[(i, j)]))
}

/// Bad daughter indices surface as `IndexError`.
pub(crate) fn fit_error_to_py(err: FitError) -> PyErr {
    match err {
        FitError::DaughterOutOfRange { .. } => {
            pyo3::exceptions::PyIndexError::new_err(err.to_string())
        }
    }
}
