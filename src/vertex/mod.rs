//! Progressive least-squares vertex fit.
//!
//! [`VertexFit`] owns a fixed number of daughter tracks, an optional beam-spot
//! (IP) constraint and the result of the last fit. Typical use:
//!
//! 1. construct with the number of daughters (and optionally the field),
//! 2. [`VertexFit::set_daughter`] for every daughter,
//! 3. optionally [`VertexFit::set_ip_constraint`],
//! 4. [`VertexFit::fit`], then read the vertex, momenta and covariances.
//!
//! The fit itself lives in [`iteration`](self::iteration); this module holds
//! the state and its accessors.

mod iteration;

use tracing::warn;

use crate::error::FitError;
use crate::linalg::invert_and_check;
use crate::{Helix, Matrix3, Matrix6, Vector3, KAPPA};

/// Magnetic field used by [`VertexFit::new`], in tesla.
pub const DEFAULT_MAGNETIC_FIELD: f64 = 1.5;

/// Number of iterations used by [`VertexFit::fit_default`].
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Diagonal variance (cm²) of the uninformative prior that replaces an IP
/// constraint whose covariance cannot be inverted.
pub const WEAK_PRIOR_VARIANCE: f64 = 1000.0;

// ── Status codes ────────────────────────────────────────────────────────────

/// Outcome of [`VertexFit::fit`].
///
/// Anything but [`FitStatus::Success`] leaves the previous fit result untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    /// All iterations completed and the result was stored.
    Success,
    /// Neither daughters nor an IP constraint: nothing to fit.
    NoDaughters,
    /// The daughter at this index was never set.
    MissingDaughter { daughter: usize },
    /// The helix-parameter covariance of this daughter could not be inverted.
    SingularDaughterWeight { daughter: usize },
    /// `BᵀGB` of this daughter could not be inverted (momentum unconstrained).
    SingularMomentumWeight { daughter: usize },
    /// The summed 3×3 vertex normal matrix could not be inverted.
    SingularVertexNormal,
}

impl FitStatus {
    /// `true` for [`FitStatus::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, FitStatus::Success)
    }
}

/// What [`VertexFit::set_ip_constraint`] did with the supplied covariance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOutcome {
    /// The covariance was inverted and the constraint is active.
    Applied,
    /// The covariance failed the inversion check. The constraint is disabled
    /// and its matrices hold the weak prior (variance [`WEAK_PRIOR_VARIANCE`]).
    DegradedToPrior,
}

// ── Inputs ──────────────────────────────────────────────────────────────────

/// Beam-spot pseudo-measurement of the vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct IpConstraint {
    /// Measured vertex position (cm).
    pub vertex: Vector3,
    /// Covariance of `vertex` (cm²).
    pub variance: Matrix3,
    /// Inverse of `variance`.
    pub variance_inverse: Matrix3,
}

impl IpConstraint {
    /// The uninformative prior: variance [`WEAK_PRIOR_VARIANCE`] on each axis.
    pub fn weak_prior(vertex: Vector3) -> Self {
        Self {
            vertex,
            variance: Matrix3::identity() * WEAK_PRIOR_VARIANCE,
            variance_inverse: Matrix3::identity() / WEAK_PRIOR_VARIANCE,
        }
    }
}

/// Measured kinematics of one daughter track.
#[derive(Debug, Clone, PartialEq)]
pub struct Daughter {
    /// Charge in units of e. Must be non-zero.
    pub charge: i32,
    /// Momentum (GeV/c) at `position`.
    pub momentum: Vector3,
    /// A point on the trajectory (cm).
    pub position: Vector3,
    /// Covariance over `(x, y, z, p_x, p_y, p_z)`.
    pub variance: Matrix6,
}

#[derive(Debug, Clone)]
struct DaughterSlot {
    input: Daughter,
    alpha: f64,
    /// Linearised at the measured point; never changes once set.
    original_helix: Helix,
    /// Linearised at the last fitted vertex and momentum.
    current_helix: Helix,
}

// ── Fit result ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct FitState {
    vertex: Vector3,
    vertex_variance: Matrix3,
    vertex_variance_inverse: Matrix3,
    momentum_variance: Matrix3,
    vertex_momentum_covariance: Matrix3,
    chi2: f64,
    ndf: i32,
    smoothed_momenta: Vec<Vector3>,
    smoothed_variances: Vec<Matrix6>,
}

impl FitState {
    fn empty(n_daughters: usize) -> Self {
        Self {
            vertex: Vector3::zeros(),
            vertex_variance: Matrix3::zeros(),
            vertex_variance_inverse: Matrix3::zeros(),
            momentum_variance: Matrix3::zeros(),
            vertex_momentum_covariance: Matrix3::zeros(),
            chi2: 0.0,
            ndf: 0,
            smoothed_momenta: vec![Vector3::zeros(); n_daughters],
            smoothed_variances: vec![Matrix6::zeros(); n_daughters],
        }
    }
}

// ── The fitter ──────────────────────────────────────────────────────────────

/// Vertex fit of a fixed number of charged daughters.
///
/// A single instance is meant for one vertex at a time; instances share
/// nothing, so independent vertices can be fitted in parallel with one
/// instance each.
#[derive(Debug, Clone)]
pub struct VertexFit {
    magnetic_field: f64,
    daughters: Vec<Option<DaughterSlot>>,
    ip_constraint: IpConstraint,
    ip_enabled: bool,
    state: FitState,
    /// `state` holds a committed fit of the current inputs, so the next
    /// `fit` continues from it instead of the measured points.
    seeded: bool,
}

impl VertexFit {
    /// Create a fit for `n_daughters` tracks in the default 1.5 T field.
    pub fn new(n_daughters: usize) -> Self {
        Self::with_magnetic_field(n_daughters, DEFAULT_MAGNETIC_FIELD)
    }

    /// Create a fit for `n_daughters` tracks in a field of `magnetic_field` tesla along +z.
    pub fn with_magnetic_field(n_daughters: usize, magnetic_field: f64) -> Self {
        Self {
            magnetic_field,
            daughters: vec![None; n_daughters],
            ip_constraint: IpConstraint::weak_prior(Vector3::zeros()),
            ip_enabled: false,
            state: FitState::empty(n_daughters),
            seeded: false,
        }
    }

    pub fn n_daughters(&self) -> usize {
        self.daughters.len()
    }

    /// Magnetic field in tesla.
    pub fn magnetic_field(&self) -> f64 {
        self.magnetic_field
    }

    fn check_index(&self, index: usize) -> Result<(), FitError> {
        if index < self.daughters.len() {
            Ok(())
        } else {
            Err(FitError::DaughterOutOfRange {
                index,
                count: self.daughters.len(),
            })
        }
    }

    // =====================================================================
    // INPUTS
    // =====================================================================

    /// Set (or replace) the daughter at `index`.
    ///
    /// `variance` is the covariance over `(x, y, z, p_x, p_y, p_z)`. The
    /// smoothed momentum of this daughter is reset to `momentum` and its
    /// smoothed covariance to `variance` until the next fit.
    ///
    /// `charge` must be non-zero: a neutral track has no helix and its
    /// Jacobians divide by zero. This is not checked.
    pub fn set_daughter(
        &mut self,
        index: usize,
        charge: i32,
        momentum: Vector3,
        position: Vector3,
        variance: Matrix6,
    ) -> Result<(), FitError> {
        self.check_index(index)?;

        let alpha = self.magnetic_field * charge as f64 * KAPPA;
        let helix = Helix::new(alpha, &position, &momentum);

        self.seeded = false;
        self.state.smoothed_momenta[index] = momentum;
        self.state.smoothed_variances[index] = variance;
        self.daughters[index] = Some(DaughterSlot {
            input: Daughter {
                charge,
                momentum,
                position,
                variance,
            },
            alpha,
            original_helix: helix,
            current_helix: helix,
        });
        Ok(())
    }

    /// Constrain the vertex to a beam-spot measurement.
    ///
    /// If `variance` fails the inversion check the constraint is switched off
    /// and replaced by the weak prior; the call itself never fails.
    pub fn set_ip_constraint(&mut self, vertex: Vector3, variance: Matrix3) -> ConstraintOutcome {
        let (variance_inverse, ok) = invert_and_check(&variance);
        self.seeded = false;
        if ok {
            self.ip_constraint = IpConstraint {
                vertex,
                variance,
                variance_inverse,
            };
            self.ip_enabled = true;
            ConstraintOutcome::Applied
        } else {
            warn!("IP constraint covariance is not invertible, falling back to a weak prior");
            self.ip_constraint = IpConstraint::weak_prior(vertex);
            self.ip_enabled = false;
            ConstraintOutcome::DegradedToPrior
        }
    }

    /// Remove the IP constraint.
    pub fn disable_ip_constraint(&mut self) {
        self.seeded = false;
        self.ip_enabled = false;
    }

    /// `true` if the IP constraint takes part in the fit.
    pub fn has_ip_constraint(&self) -> bool {
        self.ip_enabled
    }

    /// Stored IP constraint; the weak prior when none was applied.
    pub fn ip_constraint(&self) -> &IpConstraint {
        &self.ip_constraint
    }

    /// Input kinematics of a daughter, `None` if not set yet.
    pub fn daughter(&self, index: usize) -> Result<Option<&Daughter>, FitError> {
        self.check_index(index)?;
        Ok(self.daughters[index].as_ref().map(|d| &d.input))
    }

    /// Helix linearised at the measured point of a daughter.
    pub fn original_helix(&self, index: usize) -> Result<Option<&Helix>, FitError> {
        self.check_index(index)?;
        Ok(self.daughters[index].as_ref().map(|d| &d.original_helix))
    }

    /// Helix linearised at the last fitted vertex and momentum of a daughter.
    pub fn current_helix(&self, index: usize) -> Result<Option<&Helix>, FitError> {
        self.check_index(index)?;
        Ok(self.daughters[index].as_ref().map(|d| &d.current_helix))
    }

    // =====================================================================
    // RESULTS
    // =====================================================================

    /// Fitted vertex (cm).
    pub fn vertex(&self) -> Vector3 {
        self.state.vertex
    }

    /// Covariance of the fitted vertex.
    pub fn vertex_variance(&self) -> Matrix3 {
        self.state.vertex_variance
    }

    /// Inverse covariance (weight) of the fitted vertex.
    pub fn vertex_variance_inverse(&self) -> Matrix3 {
        self.state.vertex_variance_inverse
    }

    /// Fitted momentum of a daughter at the vertex.
    pub fn daughter_momentum(&self, index: usize) -> Result<Vector3, FitError> {
        self.check_index(index)?;
        Ok(self.state.smoothed_momenta[index])
    }

    /// Covariance of a daughter over `(vertex, momentum)` after the fit.
    pub fn daughter_variance(&self, index: usize) -> Result<Matrix6, FitError> {
        self.check_index(index)?;
        Ok(self.state.smoothed_variances[index])
    }

    /// Sum of the fitted daughter momenta.
    pub fn mother_momentum(&self) -> Vector3 {
        self.state.smoothed_momenta.iter().sum()
    }

    /// Covariance of [`mother_momentum`](Self::mother_momentum), including
    /// the correlations the common vertex induces between daughters.
    pub fn momentum_variance(&self) -> Matrix3 {
        self.state.momentum_variance
    }

    /// Covariance between the mother momentum (rows) and the vertex (columns).
    pub fn vertex_momentum_covariance(&self) -> Matrix3 {
        self.state.vertex_momentum_covariance
    }

    /// Covariance of the mother over `(vertex, momentum)`.
    pub fn mother_variance(&self) -> Matrix6 {
        let mut v = Matrix6::zeros();
        let cross = self.state.vertex_momentum_covariance;
        v.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.state.vertex_variance);
        v.fixed_view_mut::<3, 3>(0, 3).copy_from(&cross.transpose());
        v.fixed_view_mut::<3, 3>(3, 0).copy_from(&cross);
        v.fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&self.state.momentum_variance);
        v
    }

    /// χ² of the last successful fit.
    pub fn chi2(&self) -> f64 {
        self.state.chi2
    }

    /// Degrees of freedom of the last successful fit.
    pub fn ndf(&self) -> i32 {
        self.state.ndf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_daughter(fit: &mut VertexFit, index: usize) -> Result<(), FitError> {
        fit.set_daughter(
            index,
            1,
            Vector3::new(0.5, 0.5, 0.1),
            Vector3::zeros(),
            Matrix6::identity() * 1e-4,
        )
    }

    #[test]
    fn test_defaults() {
        let fit = VertexFit::new(3);
        assert_eq!(fit.n_daughters(), 3);
        assert_eq!(fit.magnetic_field(), DEFAULT_MAGNETIC_FIELD);
        assert!(!fit.has_ip_constraint());
        assert_eq!(fit.chi2(), 0.0);
        assert_eq!(fit.vertex(), Vector3::zeros());
        assert!(fit.daughter(0).unwrap().is_none());
    }

    #[test]
    fn test_out_of_range_index() {
        for n in 0..5 {
            let mut fit = VertexFit::new(n);
            let err = simple_daughter(&mut fit, n).unwrap_err();
            assert_eq!(err, FitError::DaughterOutOfRange { index: n, count: n });
            assert!(fit.daughter_momentum(n).is_err());
            assert!(fit.daughter_variance(n).is_err());
            assert!(fit.daughter(n).is_err());
            assert!(fit.current_helix(n).is_err());
        }
    }

    #[test]
    fn test_out_of_range_does_not_touch_state() {
        let mut fit = VertexFit::new(2);
        simple_daughter(&mut fit, 0).unwrap();
        let before = fit.daughter_momentum(0).unwrap();
        assert!(fit
            .set_daughter(2, -1, Vector3::x(), Vector3::zeros(), Matrix6::identity())
            .is_err());
        assert_eq!(fit.daughter_momentum(0).unwrap(), before);
        assert!(fit.daughter(1).unwrap().is_none());
    }

    #[test]
    fn test_set_daughter_initialises_smoothed_momentum() {
        let mut fit = VertexFit::new(1);
        let p = Vector3::new(0.3, -0.4, 1.0);
        let cov = Matrix6::identity() * 2e-3;
        fit.set_daughter(0, -1, p, Vector3::new(0.1, 0.0, 0.0), cov)
            .unwrap();
        assert_eq!(fit.daughter_momentum(0).unwrap(), p);
        assert_eq!(fit.daughter_variance(0).unwrap(), cov);

        let helix = fit.original_helix(0).unwrap().unwrap();
        let expected_alpha = DEFAULT_MAGNETIC_FIELD * -1.0 * KAPPA;
        assert!((helix.alpha() - expected_alpha).abs() < 1e-15);
        assert_eq!(Some(helix), fit.current_helix(0).unwrap());
    }

    #[test]
    fn test_ip_constraint_applied() {
        let mut fit = VertexFit::new(2);
        let variance = Matrix3::from_diagonal(&Vector3::new(1e-4, 1e-4, 4e-2));
        let outcome = fit.set_ip_constraint(Vector3::new(0.01, 0.02, 0.0), variance);
        assert_eq!(outcome, ConstraintOutcome::Applied);
        assert!(fit.has_ip_constraint());
        let ip = fit.ip_constraint();
        assert!((ip.variance * ip.variance_inverse - Matrix3::identity()).amax() < 1e-9);

        fit.disable_ip_constraint();
        assert!(!fit.has_ip_constraint());
    }

    #[test]
    fn test_ip_constraint_singular_falls_back_to_prior() {
        let mut fit = VertexFit::new(2);
        let singular = Matrix3::new(1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let outcome = fit.set_ip_constraint(Vector3::new(0.1, 0.2, 0.3), singular);
        assert_eq!(outcome, ConstraintOutcome::DegradedToPrior);
        assert!(!fit.has_ip_constraint());

        let ip = fit.ip_constraint();
        assert_eq!(ip.variance, Matrix3::identity() * 1000.0);
        assert_eq!(ip.variance_inverse, Matrix3::identity() * 0.001);
    }

    #[test]
    fn test_fit_status_flag() {
        assert!(FitStatus::Success.is_success());
        assert!(!FitStatus::SingularVertexNormal.is_success());
        assert!(!FitStatus::MissingDaughter { daughter: 0 }.is_success());
    }
}
