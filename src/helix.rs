//! Perigee helix parametrisation of a charged track and its linearisation.
//!
//! A particle of charge `q` in a uniform field `B ẑ` moves on a helix. In the
//! transverse plane its direction turns at a constant rate per unit of
//! transverse path length `s`:
//!
//! ```text
//! dφ/ds = α / p_T,   α = KAPPA · B · q
//! ```
//!
//! The helix is described by five numbers evaluated at the **perigee**, the
//! point of closest approach to the z axis:
//!
//! | index | symbol | meaning |
//! |-------|--------|---------|
//! | 0 | κ     | signed curvature `α / p_T` (cm⁻¹), i.e. signed inverse p_T scaled by the bending strength |
//! | 1 | tanλ  | `p_z / p_T` |
//! | 2 | φ₀    | azimuth of the momentum at the perigee |
//! | 3 | d₀    | signed transverse impact parameter, perigee = `d₀ · (−sin φ₀, cos φ₀)` |
//! | 4 | z₀    | z coordinate of the perigee |
//!
//! The map `(x, p) → (κ, tanλ, φ₀, d₀, z₀)` is closed-form. Writing
//! `N = p_y − α x`, `M = p_x + α y`, `Q = N² + M²`, `L = p_x y − p_y x`,
//! `U = x p_x + y p_y` and `D = p_T² + α L`:
//!
//! ```text
//! φ₀ = atan2(N, M)
//! d₀ = (√Q − p_T) / α = (2L + α r²) / (√Q + p_T)
//! z₀ = z + (p_z / α) · atan2(−α U, D)
//! ```
//!
//! where `atan2(−αU, D)` is the turning angle from the reference point back to
//! the perigee. The reference point must lie within half a turn of the perigee.

use nalgebra::SMatrix;

use crate::{Matrix5x3, Vector3, Vector5};

/// Index of κ in the helix parameter vector.
pub const KAPPA_INDEX: usize = 0;
/// Index of tanλ in the helix parameter vector.
pub const TAN_LAMBDA_INDEX: usize = 1;
/// Index of φ₀ in the helix parameter vector.
pub const PHI0_INDEX: usize = 2;
/// Index of d₀ in the helix parameter vector.
pub const D0_INDEX: usize = 3;
/// Index of z₀ in the helix parameter vector.
pub const Z0_INDEX: usize = 4;

/// Linearised perigee parametrisation of one trajectory.
///
/// Built around a reference phase-space point `(x, p)`. Besides the
/// parametrisation `h(x, p)` it stores the Jacobians `A = ∂h/∂x`,
/// `B = ∂h/∂p` and the offset `c0` such that
///
/// ```text
/// h(x', p') ≈ c0 + A·x' + B·p'
/// ```
///
/// holds exactly at the reference point.
///
/// # Preconditions
///
/// The transverse momentum and `alpha` must both be non-zero (charged track in
/// a non-zero field). This is not checked; degenerate input yields
/// non-finite values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Helix {
    alpha: f64,
    parametrisation: Vector5,
    a: Matrix5x3,
    b: Matrix5x3,
    c0: Vector5,
}

impl Helix {
    /// Linearise the helix of bending strength `alpha` passing through
    /// `position` with `momentum`.
    pub fn new(alpha: f64, position: &Vector3, momentum: &Vector3) -> Self {
        let a = alpha;
        let (x, y, z) = (position.x, position.y, position.z);
        let (px, py, pz) = (momentum.x, momentum.y, momentum.z);

        let pt2 = px * px + py * py;
        let pt = pt2.sqrt();
        let pt3 = pt2 * pt;

        let l = px * y - py * x;
        let u = x * px + y * py;
        let n = py - a * x;
        let m = px + a * y;
        let q = n * n + m * m;
        let sq = q.sqrt();
        let d = pt2 + a * l;
        // Turning angle from the reference point back to the perigee.
        let turn = (-a * u).atan2(d);

        let parametrisation = Vector5::new(
            a / pt,
            pz / pt,
            n.atan2(m),
            (2.0 * l + a * (x * x + y * y)) / (sq + pt),
            z + pz / a * turn,
        );

        let pt2q = pt2 * q;

        // Rows: κ, tanλ, φ0, d0, z0; columns: x, y, z.
        let jac_x = Matrix5x3::new(
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            -a * m / q,
            -a * n / q,
            0.0,
            -n / sq,
            m / sq,
            0.0,
            pz * (-a * u * py - d * px) / pt2q,
            pz * (a * u * px - d * py) / pt2q,
            1.0,
        );

        // Rows: κ, tanλ, φ0, d0, z0; columns: p_x, p_y, p_z.
        let jac_p = Matrix5x3::new(
            -a * px / pt3,
            -a * py / pt3,
            0.0,
            -pz * px / pt3,
            -pz * py / pt3,
            1.0 / pt,
            -n / q,
            m / q,
            0.0,
            (m / sq - px / pt) / a,
            (n / sq - py / pt) / a,
            0.0,
            pz * (u * (2.0 * px + a * y) - d * x) / pt2q,
            pz * (u * (2.0 * py - a * x) - d * y) / pt2q,
            turn / a,
        );

        let c0 = parametrisation - jac_x * position - jac_p * momentum;

        Self {
            alpha,
            parametrisation,
            a: jac_x,
            b: jac_p,
            c0,
        }
    }

    /// Bending strength `KAPPA · B · q` the helix was built with.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Perigee parameters `(κ, tanλ, φ₀, d₀, z₀)`.
    pub fn parametrisation(&self) -> &Vector5 {
        &self.parametrisation
    }

    /// Jacobian of the parametrisation with respect to the reference position.
    pub fn a(&self) -> &Matrix5x3 {
        &self.a
    }

    /// Jacobian of the parametrisation with respect to the reference momentum.
    pub fn b(&self) -> &Matrix5x3 {
        &self.b
    }

    /// Constant term of the linear expansion.
    pub fn c0(&self) -> &Vector5 {
        &self.c0
    }

    /// Full 5×6 Jacobian `[A | B]` over `(x, y, z, p_x, p_y, p_z)`.
    pub fn jacobian(&self) -> SMatrix<f64, 5, 6> {
        let mut j = SMatrix::<f64, 5, 6>::zeros();
        j.fixed_view_mut::<5, 3>(0, 0).copy_from(&self.a);
        j.fixed_view_mut::<5, 3>(0, 3).copy_from(&self.b);
        j
    }

    /// First-order prediction `c0 + A·x + B·p` of the parametrisation.
    pub fn linear_prediction(&self, position: &Vector3, momentum: &Vector3) -> Vector5 {
        self.c0 + self.a * position + self.b * momentum
    }

    pub fn kappa(&self) -> f64 {
        self.parametrisation[KAPPA_INDEX]
    }

    pub fn tan_lambda(&self) -> f64 {
        self.parametrisation[TAN_LAMBDA_INDEX]
    }

    pub fn phi0(&self) -> f64 {
        self.parametrisation[PHI0_INDEX]
    }

    pub fn d0(&self) -> f64 {
        self.parametrisation[D0_INDEX]
    }

    pub fn z0(&self) -> f64 {
        self.parametrisation[Z0_INDEX]
    }

    /// Momentum at the perigee, reconstructed from the parametrisation.
    pub fn momentum_at_perigee(&self) -> Vector3 {
        let pt = self.alpha / self.kappa();
        let (sin_phi, cos_phi) = self.phi0().sin_cos();
        Vector3::new(pt * cos_phi, pt * sin_phi, pt * self.tan_lambda())
    }

    /// Position of the perigee, reconstructed from the parametrisation.
    pub fn position_at_perigee(&self) -> Vector3 {
        let (sin_phi, cos_phi) = self.phi0().sin_cos();
        Vector3::new(-self.d0() * sin_phi, self.d0() * cos_phi, self.z0())
    }
}
