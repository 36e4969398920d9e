use numpy::{PyArray1, PyArray2, PyReadonlyArray1};
use pyo3::prelude::*;

use fastfit::Helix;

use crate::helpers::{matrix_to_py, vector3_from_py, vector_to_py};

/// Perigee helix of a charged track, linearised at the point it was built from.
///
/// The parametrisation is (κ, tanλ, φ0, d0, z0) with κ = α / pT.
///
/// Example:
///     h = pyfastfit.Helix(alpha, np.array([0.1, 0.0, 0.0]), np.array([1.0, 0.2, 0.3]))
///     print(h.parametrisation, h.d0)
#[pyclass(name = "Helix", frozen)]
#[derive(Clone)]
pub(crate) struct PyHelix {
    pub(crate) inner: Helix,
}

#[pymethods]
impl PyHelix {
    /// Build a helix from a phase-space point.
    ///
    /// Args:
    ///     alpha: Field constant B · q · KAPPA.
    ///     position: Point on the track (cm), length-3 array.
    ///     momentum: Momentum at that point (GeV/c), length-3 array.
    #[new]
    fn new(
        alpha: f64,
        position: PyReadonlyArray1<f64>,
        momentum: PyReadonlyArray1<f64>,
    ) -> PyResult<Self> {
        let position = vector3_from_py(position, "position")?;
        let momentum = vector3_from_py(momentum, "momentum")?;
        Ok(Self {
            inner: Helix::new(alpha, &position, &momentum),
        })
    }

    #[getter]
    fn alpha(&self) -> f64 {
        self.inner.alpha()
    }

    /// (κ, tanλ, φ0, d0, z0) as a numpy array.
    #[getter]
    fn parametrisation<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        vector_to_py(py, self.inner.parametrisation())
    }

    /// 5×3 Jacobian with respect to the position.
    #[getter]
    fn a<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        matrix_to_py(py, self.inner.a())
    }

    /// 5×3 Jacobian with respect to the momentum.
    #[getter]
    fn b<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        matrix_to_py(py, self.inner.b())
    }

    /// Constant term of the linear expansion.
    #[getter]
    fn c0<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        vector_to_py(py, self.inner.c0())
    }

    #[getter]
    fn kappa(&self) -> f64 {
        self.inner.kappa()
    }

    #[getter]
    fn tan_lambda(&self) -> f64 {
        self.inner.tan_lambda()
    }

    #[getter]
    fn phi0(&self) -> f64 {
        self.inner.phi0()
    }

    #[getter]
    fn d0(&self) -> f64 {
        self.inner.d0()
    }

    #[getter]
    fn z0(&self) -> f64 {
        self.inner.z0()
    }

    /// Point of closest approach to the z axis.
    fn position_at_perigee<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        vector_to_py(py, &self.inner.position_at_perigee())
    }

    /// Momentum at the point of closest approach.
    fn momentum_at_perigee<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        vector_to_py(py, &self.inner.momentum_at_perigee())
    }

    fn __repr__(&self) -> String {
        let h = &self.inner;
        format!(
            "Helix(kappa={:.6e}, tan_lambda={:.6}, phi0={:.6}, d0={:.6e}, z0={:.6e})",
            h.kappa(),
            h.tan_lambda(),
            h.phi0(),
            h.d0(),
            h.z0()
        )
    }
}
