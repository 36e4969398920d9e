//! Adapter between the fit and the particle objects of a host reconstruction
//! framework.
//!
//! Host particles carry a 7×7 error matrix over `(p_x, p_y, p_z, E, x, y, z)`;
//! the fit works on 6×6 matrices over `(x, y, z, p_x, p_y, p_z)`. Engine index
//! `k` corresponds to host index [`ENGINE_TO_HOST`]`[k]`. Energy is not a fit
//! variable: it is dropped on the way in and propagated from the momentum on
//! the way out.
//!
//! Nothing in the fit depends on this module; it only uses the public
//! setters and accessors of [`VertexFit`].

use anyhow::Context;
use nalgebra::SMatrix;

use crate::{FitError, Matrix6, Matrix7, Vector3, VertexFit};

/// Host error-matrix index of each engine index.
pub const ENGINE_TO_HOST: [usize; 6] = [4, 5, 6, 0, 1, 2];

/// Host error-matrix index of the energy.
pub const HOST_ENERGY_INDEX: usize = 3;

/// What the fit needs from (and writes back to) a host particle.
pub trait HostParticle {
    fn charge(&self) -> i32;
    /// Mass hypothesis in GeV/c², used for the energy row of the error matrix.
    fn mass(&self) -> f64;
    fn momentum(&self) -> Vector3;
    /// Reference point of the particle (cm).
    fn vertex(&self) -> Vector3;
    /// 7×7 error matrix over `(p_x, p_y, p_z, E, x, y, z)`.
    fn error_matrix(&self) -> Matrix7;
    /// Replace the kinematics with fitted values.
    fn update(&mut self, momentum: Vector3, vertex: Vector3, error_matrix: Matrix7);
}

/// Plain particle record, for callers without a framework of their own.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleRecord {
    pub charge: i32,
    pub mass: f64,
    pub momentum: Vector3,
    pub vertex: Vector3,
    pub error_matrix: Matrix7,
}

impl HostParticle for ParticleRecord {
    fn charge(&self) -> i32 {
        self.charge
    }

    fn mass(&self) -> f64 {
        self.mass
    }

    fn momentum(&self) -> Vector3 {
        self.momentum
    }

    fn vertex(&self) -> Vector3 {
        self.vertex
    }

    fn error_matrix(&self) -> Matrix7 {
        self.error_matrix
    }

    fn update(&mut self, momentum: Vector3, vertex: Vector3, error_matrix: Matrix7) {
        self.momentum = momentum;
        self.vertex = vertex;
        self.error_matrix = error_matrix;
    }
}

// ── Error-matrix layout conversion ──────────────────────────────────────────

/// Extract the engine 6×6 covariance from a host 7×7 error matrix.
pub fn engine_from_host_error(host: &Matrix7) -> Matrix6 {
    Matrix6::from_fn(|i, j| host[(ENGINE_TO_HOST[i], ENGINE_TO_HOST[j])])
}

/// Expand an engine 6×6 covariance into a host 7×7 error matrix.
///
/// The energy row and column follow from `E = √(p² + m²)`, i.e.
/// `∂E/∂p = p / E`.
pub fn host_from_engine_error(engine: &Matrix6, momentum: &Vector3, mass: f64) -> Matrix7 {
    let mut jac = SMatrix::<f64, 7, 6>::zeros();
    for (engine_index, &host_index) in ENGINE_TO_HOST.iter().enumerate() {
        jac[(host_index, engine_index)] = 1.0;
    }
    let energy = (momentum.norm_squared() + mass * mass).sqrt();
    if energy > 0.0 {
        for k in 0..3 {
            jac[(HOST_ENERGY_INDEX, 3 + k)] = momentum[k] / energy;
        }
    }
    jac * engine * jac.transpose()
}

// ── Fit <-> particle ────────────────────────────────────────────────────────

/// Set daughter `index` of `fit` from a host particle.
pub fn set_daughter_from_particle<P: HostParticle + ?Sized>(
    fit: &mut VertexFit,
    index: usize,
    particle: &P,
) -> Result<(), FitError> {
    fit.set_daughter(
        index,
        particle.charge(),
        particle.momentum(),
        particle.vertex(),
        engine_from_host_error(&particle.error_matrix()),
    )
}

/// Write the fitted vertex, summed momentum and their covariance to `mother`.
pub fn update_mother<P: HostParticle + ?Sized>(fit: &VertexFit, mother: &mut P) {
    let momentum = fit.mother_momentum();
    let error = host_from_engine_error(&fit.mother_variance(), &momentum, mother.mass());
    mother.update(momentum, fit.vertex(), error);
}

/// Write the fitted vertex, momentum and covariance of daughter `index` to `particle`.
pub fn update_daughter<P: HostParticle + ?Sized>(
    fit: &VertexFit,
    index: usize,
    particle: &mut P,
) -> Result<(), FitError> {
    let momentum = fit.daughter_momentum(index)?;
    let variance = fit.daughter_variance(index)?;
    let error = host_from_engine_error(&variance, &momentum, particle.mass());
    particle.update(momentum, fit.vertex(), error);
    Ok(())
}

/// Fit the common vertex of `daughters` and store the result in `mother`
/// and in each daughter.
///
/// Returns the fit so callers can read χ² and the per-daughter results.
pub fn fit_particles<D: HostParticle, M: HostParticle + ?Sized>(
    daughters: &mut [D],
    mother: &mut M,
    magnetic_field: f64,
    iterations: u32,
) -> anyhow::Result<VertexFit> {
    let mut fit = VertexFit::with_magnetic_field(daughters.len(), magnetic_field);
    for (i, daughter) in daughters.iter().enumerate() {
        set_daughter_from_particle(&mut fit, i, daughter)
            .with_context(|| format!("setting daughter {i}"))?;
    }

    let status = fit.fit(iterations);
    anyhow::ensure!(status.is_success(), "vertex fit failed: {:?}", status);

    update_mother(&fit, mother);
    for (i, daughter) in daughters.iter_mut().enumerate() {
        update_daughter(&fit, i, daughter).with_context(|| format!("updating daughter {i}"))?;
    }
    Ok(fit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed_host_matrix() -> Matrix7 {
        Matrix7::from_fn(|i, j| (10 * i + j) as f64)
    }

    fn record(charge: i32, momentum: Vector3) -> ParticleRecord {
        let mut error_matrix = Matrix7::zeros();
        for k in 0..7 {
            error_matrix[(k, k)] = 1e-6;
        }
        ParticleRecord {
            charge,
            mass: 0.13957,
            momentum,
            vertex: Vector3::zeros(),
            error_matrix,
        }
    }

    #[test]
    fn test_engine_from_host_permutation() {
        let engine = engine_from_host_error(&indexed_host_matrix());
        // engine x ↔ host 4, engine px ↔ host 0
        assert_eq!(engine[(0, 0)], 44.0);
        assert_eq!(engine[(3, 3)], 0.0);
        assert_eq!(engine[(0, 3)], 40.0);
        assert_eq!(engine[(5, 2)], 26.0);
        assert_eq!(engine[(2, 1)], 65.0);
    }

    #[test]
    fn test_round_trip_preserves_non_energy_entries() {
        let host = indexed_host_matrix();
        let back = host_from_engine_error(&engine_from_host_error(&host), &Vector3::zeros(), 0.0);
        for i in 0..7 {
            for j in 0..7 {
                if i == HOST_ENERGY_INDEX || j == HOST_ENERGY_INDEX {
                    assert_eq!(back[(i, j)], 0.0);
                } else {
                    assert_eq!(back[(i, j)], host[(i, j)]);
                }
            }
        }
    }

    #[test]
    fn test_energy_variance_propagation() {
        let mut engine = Matrix6::zeros();
        engine[(3, 3)] = 4e-4;
        engine[(4, 4)] = 1e-4;
        let p = Vector3::new(3.0, 4.0, 0.0);
        let host = host_from_engine_error(&engine, &p, 0.0);
        // Massless: E = |p|, var(E) = (px/E)² σ²px + (py/E)² σ²py.
        let expected = 0.36 * 4e-4 + 0.64 * 1e-4;
        assert!((host[(3, 3)] - expected).abs() < 1e-18);
        assert!((host[(0, 3)] - 0.6 * 4e-4).abs() < 1e-18);
        assert_eq!(host[(0, 0)], 4e-4);
    }

    #[test]
    fn test_fit_particles() {
        let mut daughters = vec![
            record(1, Vector3::new(1.0, 0.2, 0.3)),
            record(-1, Vector3::new(-1.0, -0.2, 0.4)),
        ];
        let mut mother = record(0, Vector3::zeros());
        mother.mass = 0.497611;

        let fit = fit_particles(&mut daughters, &mut mother, 1.5, 3).unwrap();
        assert!(fit.vertex().norm() < 1e-6);
        assert!((mother.momentum - Vector3::new(0.0, 0.0, 0.7)).amax() < 1e-6);
        assert_eq!(mother.vertex, fit.vertex());

        let m = mother.error_matrix;
        assert!((m - m.transpose()).amax() < 1e-15);
        assert!(m[(HOST_ENERGY_INDEX, HOST_ENERGY_INDEX)] > 0.0);
        // Vertex block of the host matrix is the fitted vertex covariance.
        assert_eq!(
            m.fixed_view::<3, 3>(4, 4).into_owned(),
            fit.vertex_variance()
        );

        assert_eq!(daughters[0].momentum, fit.daughter_momentum(0).unwrap());
        assert_eq!(daughters[1].vertex, fit.vertex());
    }

    #[test]
    fn test_fit_particles_reports_failure() {
        let mut daughters = vec![record(1, Vector3::new(1.0, 0.2, 0.3))];
        daughters[0].error_matrix = Matrix7::zeros();
        let mut mother = record(0, Vector3::zeros());
        let err = fit_particles(&mut daughters, &mut mother, 1.5, 3).unwrap_err();
        assert!(err.to_string().contains("vertex fit failed"));
        assert_eq!(mother.momentum, Vector3::zeros());
    }
}
