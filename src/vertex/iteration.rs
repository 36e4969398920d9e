//! The iterative vertex fit.
//!
//! Each daughter contributes its measured perigee parameters `q` (from the
//! helix at the measured point) with weight `G = (J Σ Jᵀ)⁻¹`, where `J = [A|B]`
//! is the measured helix Jacobian and `Σ` the 6×6 input covariance. The model
//! is the helix linearised at the current estimate:
//!
//! ```text
//! q ≈ c0 + A·x + B·p
//! ```
//!
//! With `y = q − c0` and, per daughter,
//!
//! ```text
//! W  = (Bᵀ G B)⁻¹
//! E  = Aᵀ G B
//! GB = G − G B W Bᵀ G
//! ```
//!
//! the momentum is profiled out and the vertex solves the 3×3 system
//!
//! ```text
//! C⁻¹ = Σ Aᵀ GB A  (+ V_ip⁻¹)
//! x   = C · (Σ Aᵀ GB y  (+ V_ip⁻¹ x_ip))
//! ```
//!
//! after which every momentum is back-substituted,
//!
//! ```text
//! p          = W (Bᵀ G y − Eᵀ x)
//! cov(p, x)  = −W Eᵀ C
//! cov(p, p)  = W + W Eᵀ C E W
//! ```
//!
//! The next iteration re-linearises every helix at `(x, p)`.
//!
//! Reference: Billoir & Qian, NIM A311 (1992) 139; Frühwirth, NIM A262 (1987) 444.

use tracing::{debug, warn};

use super::{FitState, FitStatus, VertexFit};
use crate::helix::PHI0_INDEX;
use crate::linalg::{invert_and_check, symmetrize, wrap_angle};
use crate::{Helix, Matrix3, Matrix5, Matrix5x3, Matrix6, Vector3, Vector5};

/// One daughter linearised around the current estimate.
struct Linearised {
    helix: Helix,
    a: Matrix5x3,
    b: Matrix5x3,
    /// Weight of the measured helix parameters.
    g: Matrix5,
    /// `(BᵀGB)⁻¹`
    w: Matrix3,
    /// `AᵀGB`
    e: Matrix3,
    /// Measurement relative to the linear model offset, `q − c0`.
    y: Vector5,
}

/// Everything one iteration produces.
struct IterationResult {
    helices: Vec<Helix>,
    state: FitState,
}

impl VertexFit {
    /// Fit [`DEFAULT_MAX_ITERATIONS`](super::DEFAULT_MAX_ITERATIONS) iterations.
    pub fn fit_default(&mut self) -> FitStatus {
        self.fit(super::DEFAULT_MAX_ITERATIONS)
    }

    /// Run the fit for exactly `max_iterations` iterations.
    ///
    /// Every iteration linearises each daughter at the current vertex and
    /// smoothed momentum. After a successful fit the next call continues from
    /// the stored result, so a further `fit(1)` on a converged state leaves it
    /// in place. Changing a daughter or the IP constraint discards that seed
    /// and the first iteration goes back to the measured points. On any
    /// status other than [`FitStatus::Success`] the stored result of the
    /// previous fit is left untouched.
    pub fn fit(&mut self, max_iterations: u32) -> FitStatus {
        if self.daughters.is_empty() && !self.ip_enabled {
            return FitStatus::NoDaughters;
        }
        if let Some(daughter) = self.daughters.iter().position(|d| d.is_none()) {
            return FitStatus::MissingDaughter { daughter };
        }
        if max_iterations == 0 {
            return FitStatus::Success;
        }

        let seed = self.seeded.then_some(&self.state);
        let mut result: Option<IterationResult> = None;
        for iteration in 0..max_iterations {
            let previous = result.as_ref().map(|r| &r.state).or(seed);
            match self.iterate(previous) {
                Ok(r) => {
                    debug!(
                        "Vertex fit iteration {}: chi2={:.4}, vertex=({:.5}, {:.5}, {:.5})",
                        iteration + 1,
                        r.state.chi2,
                        r.state.vertex.x,
                        r.state.vertex.y,
                        r.state.vertex.z
                    );
                    result = Some(r);
                }
                Err(status) => {
                    warn!("Vertex fit aborted in iteration {}: {:?}", iteration + 1, status);
                    return status;
                }
            }
        }

        // max_iterations > 0, so at least one iteration succeeded.
        if let Some(r) = result {
            for (slot, helix) in self.daughters.iter_mut().zip(r.helices) {
                if let Some(slot) = slot {
                    slot.current_helix = helix;
                }
            }
            debug!(
                "Vertex fit done: chi2/ndf = {:.4}/{}",
                r.state.chi2, r.state.ndf
            );
            self.state = r.state;
            self.seeded = true;
        }
        FitStatus::Success
    }

    /// Degrees of freedom: three per daughter minus the three vertex
    /// coordinates, plus three for a directly measured vertex.
    fn degrees_of_freedom(&self) -> i32 {
        let n = self.daughters.len() as i32;
        let ip = if self.ip_enabled { 3 } else { 0 };
        3 * n - 3 + ip
    }

    /// Linearise every daughter around `previous` (or its measured point if
    /// `None`), solve for the vertex and back-substitute the momenta.
    fn iterate(&self, previous: Option<&FitState>) -> Result<IterationResult, FitStatus> {
        let mut linearised = Vec::with_capacity(self.daughters.len());
        let mut normal = Matrix3::zeros();
        let mut rhs = Vector3::zeros();

        for (i, slot) in self.daughters.iter().enumerate() {
            let slot = slot
                .as_ref()
                .ok_or(FitStatus::MissingDaughter { daughter: i })?;

            let (x0, p0) = match previous {
                Some(state) => (state.vertex, state.smoothed_momenta[i]),
                None => (slot.input.position, slot.input.momentum),
            };
            let helix = if previous.is_some() {
                Helix::new(slot.alpha, &x0, &p0)
            } else {
                slot.original_helix
            };

            let measured = &slot.original_helix;
            let j = measured.jacobian();
            let v = j * slot.input.variance * j.transpose();
            let (g, ok) = invert_and_check(&symmetrize(&v));
            if !ok {
                return Err(FitStatus::SingularDaughterWeight { daughter: i });
            }

            let a = *helix.a();
            let b = *helix.b();
            let (w, ok) = invert_and_check(&symmetrize(&(b.transpose() * g * b)));
            if !ok {
                return Err(FitStatus::SingularMomentumWeight { daughter: i });
            }

            let gb = g - g * b * w * b.transpose() * g;

            // y = q − c0, with the azimuth difference taken on the short way round.
            let mut delta = measured.parametrisation() - helix.parametrisation();
            delta[PHI0_INDEX] = wrap_angle(delta[PHI0_INDEX]);
            let y = delta + a * x0 + b * p0;

            normal += a.transpose() * gb * a;
            rhs += a.transpose() * gb * y;

            linearised.push(Linearised {
                helix,
                a,
                b,
                g,
                w,
                e: a.transpose() * g * b,
                y,
            });
        }

        if self.ip_enabled {
            let ip = &self.ip_constraint;
            normal += ip.variance_inverse;
            rhs += ip.variance_inverse * ip.vertex;
        }

        let normal = symmetrize(&normal);
        let (c, ok) = invert_and_check(&normal);
        if !ok {
            return Err(FitStatus::SingularVertexNormal);
        }
        let c = symmetrize(&c);
        let vertex = c * rhs;

        let n = linearised.len();
        let mut smoothed_momenta = Vec::with_capacity(n);
        let mut smoothed_variances = Vec::with_capacity(n);
        let mut helices = Vec::with_capacity(n);
        let mut chi2 = 0.0;
        let mut sum_w = Matrix3::zeros();
        // Σ cov(p_i, x)
        let mut sum_cross = Matrix3::zeros();

        for lin in linearised {
            let Linearised {
                helix,
                a,
                b,
                g,
                w,
                e,
                y,
            } = lin;

            let momentum = w * (b.transpose() * g * y - e.transpose() * vertex);
            let residual = y - a * vertex - b * momentum;
            chi2 += (residual.transpose() * g * residual)[(0, 0)];

            let cross = -w * e.transpose() * c;
            let momentum_variance = w + cross * normal * cross.transpose();

            let mut variance = Matrix6::zeros();
            variance.fixed_view_mut::<3, 3>(0, 0).copy_from(&c);
            variance
                .fixed_view_mut::<3, 3>(0, 3)
                .copy_from(&cross.transpose());
            variance.fixed_view_mut::<3, 3>(3, 0).copy_from(&cross);
            variance
                .fixed_view_mut::<3, 3>(3, 3)
                .copy_from(&momentum_variance);

            sum_w += w;
            sum_cross += cross;
            smoothed_momenta.push(momentum);
            smoothed_variances.push(symmetrize(&variance));
            helices.push(helix);
        }

        if self.ip_enabled {
            let ip = &self.ip_constraint;
            let d = vertex - ip.vertex;
            chi2 += (d.transpose() * ip.variance_inverse * d)[(0, 0)];
        }

        let momentum_variance = symmetrize(&(sum_w + sum_cross * normal * sum_cross.transpose()));

        Ok(IterationResult {
            helices,
            state: FitState {
                vertex,
                vertex_variance: c,
                vertex_variance_inverse: normal,
                momentum_variance,
                vertex_momentum_covariance: sum_cross,
                chi2,
                ndf: self.degrees_of_freedom(),
                smoothed_momenta,
                smoothed_variances,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::{ConstraintOutcome, FitStatus, VertexFit};
    use crate::{Matrix3, Matrix6, Vector3};

    fn two_track_fit() -> VertexFit {
        let mut fit = VertexFit::new(2);
        let cov = Matrix6::identity() * 1e-6;
        fit.set_daughter(0, 1, Vector3::new(1.0, 0.2, 0.3), Vector3::zeros(), cov)
            .unwrap();
        fit.set_daughter(1, -1, Vector3::new(-1.0, -0.2, 0.4), Vector3::zeros(), cov)
            .unwrap();
        fit
    }

    #[test]
    fn test_missing_daughter() {
        let mut fit = VertexFit::new(2);
        fit.set_daughter(
            0,
            1,
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::zeros(),
            Matrix6::identity(),
        )
        .unwrap();
        assert_eq!(fit.fit(3), FitStatus::MissingDaughter { daughter: 1 });
    }

    #[test]
    fn test_no_daughters() {
        let mut fit = VertexFit::new(0);
        assert_eq!(fit.fit(3), FitStatus::NoDaughters);
    }

    #[test]
    fn test_only_ip_constraint() {
        let mut fit = VertexFit::new(0);
        let ip = Vector3::new(0.01, -0.02, 0.5);
        let variance = Matrix3::identity() * 1e-4;
        assert_eq!(fit.set_ip_constraint(ip, variance), ConstraintOutcome::Applied);
        assert!(fit.fit(1).is_success());
        assert!((fit.vertex() - ip).amax() < 1e-12);
        assert!((fit.vertex_variance() - variance).amax() < 1e-15);
        assert!(fit.chi2().abs() < 1e-12);
        assert_eq!(fit.ndf(), 0);
    }

    #[test]
    fn test_singular_daughter_covariance() {
        let mut fit = two_track_fit();
        assert!(fit.fit(3).is_success());
        let (vertex, chi2, ndf) = (fit.vertex(), fit.chi2(), fit.ndf());
        let variance = fit.vertex_variance();

        fit.set_daughter(
            1,
            -1,
            Vector3::new(-1.0, -0.2, 0.4),
            Vector3::zeros(),
            Matrix6::zeros(),
        )
        .unwrap();
        assert_eq!(fit.fit(3), FitStatus::SingularDaughterWeight { daughter: 1 });

        // The previous result survives the failed fit.
        assert_eq!(fit.vertex(), vertex);
        assert_eq!(fit.vertex_variance(), variance);
        assert_eq!(fit.chi2(), chi2);
        assert_eq!(fit.ndf(), ndf);
    }

    #[test]
    fn test_zero_iterations() {
        let mut fit = two_track_fit();
        assert!(fit.fit(0).is_success());
        assert_eq!(fit.vertex(), Vector3::zeros());
        assert_eq!(fit.ndf(), 0);
    }

    #[test]
    fn test_two_tracks_from_origin() {
        let mut fit = two_track_fit();
        assert!(fit.fit_default().is_success());
        assert!(fit.vertex().norm() < 1e-6, "vertex {}", fit.vertex());
        assert!(fit.chi2() < 1e-6, "chi2 {}", fit.chi2());
        assert_eq!(fit.ndf(), 3);

        let p0 = fit.daughter_momentum(0).unwrap();
        let p1 = fit.daughter_momentum(1).unwrap();
        assert!((p0 - Vector3::new(1.0, 0.2, 0.3)).amax() < 1e-6);
        assert!((p1 - Vector3::new(-1.0, -0.2, 0.4)).amax() < 1e-6);
        assert!((fit.mother_momentum() - (p0 + p1)).amax() < 1e-15);
    }

    #[test]
    fn test_fit_continues_from_stored_state() {
        let mut fit = two_track_fit();
        assert!(fit.fit(3).is_success());
        let (vertex, chi2) = (fit.vertex(), fit.chi2());
        assert!(fit.fit(1).is_success());
        assert!((fit.vertex() - vertex).amax() < 1e-9);
        assert!((fit.chi2() - chi2).abs() < 1e-9);
    }

    #[test]
    fn test_new_input_restarts_from_measured_points() {
        let mut fresh = two_track_fit();
        assert!(fresh.fit(1).is_success());

        let mut fit = two_track_fit();
        assert!(fit.fit(3).is_success());
        fit.set_daughter(
            1,
            -1,
            Vector3::new(-1.0, -0.2, 0.4),
            Vector3::zeros(),
            Matrix6::identity() * 1e-6,
        )
        .unwrap();
        assert!(fit.fit(1).is_success());
        assert_eq!(fit.vertex(), fresh.vertex());
        assert_eq!(fit.chi2(), fresh.chi2());
    }

    #[test]
    fn test_ip_constraint_changes_ndf() {
        let mut fit = two_track_fit();
        fit.set_ip_constraint(Vector3::zeros(), Matrix3::identity() * 1e-2);
        assert!(fit.fit(3).is_success());
        assert_eq!(fit.ndf(), 6);
        assert!(fit.vertex().norm() < 1e-6);
    }

    #[test]
    fn test_covariances_symmetric() {
        let mut fit = two_track_fit();
        assert!(fit.fit(3).is_success());
        let c = fit.vertex_variance();
        assert!((c - c.transpose()).amax() <= 1e-12 * c.amax());
        for k in 0..3 {
            assert!(c[(k, k)] > 0.0);
        }
        for i in 0..2 {
            let v = fit.daughter_variance(i).unwrap();
            assert!((v - v.transpose()).amax() <= 1e-12 * v.amax());
            for k in 0..6 {
                assert!(v[(k, k)] >= 0.0);
            }
        }
        let mv = fit.mother_variance();
        assert!((mv - mv.transpose()).amax() <= 1e-12 * mv.amax());
        // Vertex block of the mother equals the fitted vertex covariance.
        assert_eq!(mv.fixed_view::<3, 3>(0, 0).into_owned(), c);
    }
}
