use numpy::{PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::prelude::*;

use fastfit::vertex::{DEFAULT_MAGNETIC_FIELD, DEFAULT_MAX_ITERATIONS};
use fastfit::{ConstraintOutcome, VertexFit};

use crate::helix::PyHelix;
use crate::helpers::{fit_error_to_py, matrix_from_py, matrix_to_py, vector3_from_py, vector_to_py};

/// Progressive vertex fit of charged daughters in a solenoidal field.
///
/// Example:
///     fit = pyfastfit.VertexFit(2, magnetic_field=1.5)
///     fit.set_daughter(0, 1, p0, x0, cov0)
///     fit.set_daughter(1, -1, p1, x1, cov1)
///     if fit.fit(3):
///         print(fit.get_vertex(), fit.get_chi2(), fit.get_ndf())
#[pyclass(name = "VertexFit")]
pub(crate) struct PyVertexFit {
    inner: VertexFit,
    last_status: Option<String>,
}

#[pymethods]
impl PyVertexFit {
    /// Args:
    ///     number_of_daughters: Number of tracks to fit.
    ///     magnetic_field: Field along z in Tesla. Default 1.5.
    #[new]
    #[pyo3(signature = (number_of_daughters, magnetic_field = DEFAULT_MAGNETIC_FIELD))]
    fn new(number_of_daughters: usize, magnetic_field: f64) -> Self {
        Self {
            inner: VertexFit::with_magnetic_field(number_of_daughters, magnetic_field),
            last_status: None,
        }
    }

    #[getter]
    fn number_of_daughters(&self) -> usize {
        self.inner.n_daughters()
    }

    #[getter]
    fn magnetic_field(&self) -> f64 {
        self.inner.magnetic_field()
    }

    /// Set daughter `index`.
    ///
    /// Args:
    ///     index: Daughter slot.
    ///     charge: Charge in units of e (non-zero).
    ///     momentum: Length-3 momentum (GeV/c).
    ///     position: Length-3 point on the track (cm).
    ///     variance: 6×6 covariance over (x, y, z, px, py, pz), row-major.
    fn set_daughter(
        &mut self,
        index: usize,
        charge: i32,
        momentum: PyReadonlyArray1<f64>,
        position: PyReadonlyArray1<f64>,
        variance: PyReadonlyArray2<f64>,
    ) -> PyResult<()> {
        let momentum = vector3_from_py(momentum, "momentum")?;
        let position = vector3_from_py(position, "position")?;
        let variance = matrix_from_py::<6>(variance, "variance")?;
        self.inner
            .set_daughter(index, charge, momentum, position, variance)
            .map_err(fit_error_to_py)
    }

    /// Constrain the vertex to a measured point.
    ///
    /// Returns True if the covariance could be inverted. Otherwise the
    /// constraint is disabled and False is returned.
    fn set_ip_constraint(
        &mut self,
        vertex: PyReadonlyArray1<f64>,
        variance: PyReadonlyArray2<f64>,
    ) -> PyResult<bool> {
        let vertex = vector3_from_py(vertex, "vertex")?;
        let variance = matrix_from_py::<3>(variance, "variance")?;
        Ok(self.inner.set_ip_constraint(vertex, variance) == ConstraintOutcome::Applied)
    }

    fn disable_ip_constraint(&mut self) {
        self.inner.disable_ip_constraint();
    }

    #[getter]
    fn has_ip_constraint(&self) -> bool {
        self.inner.has_ip_constraint()
    }

    /// Run the fit. Returns True on success; on failure the previous result is
    /// kept and `status` says why.
    #[pyo3(signature = (number_of_iterations = DEFAULT_MAX_ITERATIONS))]
    fn fit(&mut self, number_of_iterations: u32) -> bool {
        let status = self.inner.fit(number_of_iterations);
        self.last_status = Some(format!("{status:?}"));
        status.is_success()
    }

    /// Status of the last call to `fit`, or None before the first one.
    #[getter]
    fn status(&self) -> Option<String> {
        self.last_status.clone()
    }

    fn get_vertex<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        vector_to_py(py, &self.inner.vertex())
    }

    fn get_vertex_variance<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        matrix_to_py(py, &self.inner.vertex_variance())
    }

    fn get_daughter_momentum<'py>(
        &self,
        py: Python<'py>,
        index: usize,
    ) -> PyResult<Bound<'py, PyArray1<f64>>> {
        let p = self.inner.daughter_momentum(index).map_err(fit_error_to_py)?;
        Ok(vector_to_py(py, &p))
    }

    /// 6×6 covariance of (vertex, momentum) for daughter `index`.
    fn get_daughter_variance<'py>(
        &self,
        py: Python<'py>,
        index: usize,
    ) -> PyResult<Bound<'py, PyArray2<f64>>> {
        let v = self.inner.daughter_variance(index).map_err(fit_error_to_py)?;
        Ok(matrix_to_py(py, &v))
    }

    fn get_mother_momentum<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        vector_to_py(py, &self.inner.mother_momentum())
    }

    /// 6×6 covariance of (vertex, summed momentum).
    fn get_mother_variance<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        matrix_to_py(py, &self.inner.mother_variance())
    }

    /// Helix of daughter `index` at its measured point, or None if unset.
    fn get_original_helix(&self, index: usize) -> PyResult<Option<PyHelix>> {
        let helix = self.inner.original_helix(index).map_err(fit_error_to_py)?;
        Ok(helix.map(|h| PyHelix { inner: *h }))
    }

    /// Helix of daughter `index` at the fitted vertex, or None if unset.
    fn get_current_helix(&self, index: usize) -> PyResult<Option<PyHelix>> {
        let helix = self.inner.current_helix(index).map_err(fit_error_to_py)?;
        Ok(helix.map(|h| PyHelix { inner: *h }))
    }

    fn get_chi2(&self) -> f64 {
        self.inner.chi2()
    }

    fn get_ndf(&self) -> i32 {
        self.inner.ndf()
    }

    fn __repr__(&self) -> String {
        let v = self.inner.vertex();
        format!(
            "VertexFit(daughters={}, vertex=({:.4}, {:.4}, {:.4}), chi2={:.3}, ndf={})",
            self.inner.n_daughters(),
            v.x,
            v.y,
            v.z,
            self.inner.chi2(),
            self.inner.ndf()
        )
    }
}
