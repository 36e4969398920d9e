//! # fastfit
//!
//! Fast **progressive vertex fit** for charged particle tracks in a uniform
//! magnetic field, written in Rust.
//!
//! Given a set of reconstructed tracks ("daughters"), each described by its
//! charge, a momentum, a point on the trajectory and a 6×6 position–momentum
//! covariance, `fastfit` estimates the common decay vertex, its covariance,
//! the daughter momenta at that vertex and a χ² goodness-of-fit.
//!
//! ## Example
//!
//! ```
//! use fastfit::{Matrix6, Vector3, VertexFit};
//!
//! let mut fit = VertexFit::new(2);
//! let cov = Matrix6::identity() * 1e-4;
//! fit.set_daughter(0, 1, Vector3::new(1.0, 0.2, 0.3), Vector3::zeros(), cov).unwrap();
//! fit.set_daughter(1, -1, Vector3::new(-1.0, -0.2, 0.4), Vector3::zeros(), cov).unwrap();
//!
//! let status = fit.fit(3);
//! assert!(status.is_success());
//! println!("vertex = {}, chi2 = {:.3} / {}", fit.vertex(), fit.chi2(), fit.ndf());
//! ```
//!
//! ## Algorithm overview
//!
//! 1. **Linearisation**: every track is mapped onto its perigee helix
//!    parameters `(κ, tanλ, φ₀, d₀, z₀)`; the map is linearised around a
//!    phase-space point, giving Jacobians `A` (position) and `B` (momentum)
//!    ([`Helix`]).
//! 2. **Normal equations**: per track the momentum is profiled out of the
//!    5×5 helix weight, and the remaining position weight is summed into a 3×3
//!    normal system (optionally with a beam-spot pseudo-measurement).
//! 3. **Back-substitution**: after solving for the vertex, each daughter's
//!    momentum and its covariance with the vertex are recovered.
//! 4. **Re-linearisation**: steps 1–3 are repeated around the updated
//!    vertex and momenta for a fixed number of iterations.
//!
//! Reference: P. Billoir, S. Qian, "Fast vertex fitting with a local
//! parametrization of tracks", NIM A311 (1992); R. Frühwirth, "Application of
//! Kalman filtering to track and vertex fitting", NIM A262 (1987).
//!
//! ## Units
//!
//! Positions in cm, momenta in GeV/c, magnetic field in tesla, charge in units
//! of the elementary charge.

pub mod adapter;
mod error;
pub mod helix;
pub mod linalg;
pub mod vertex;

pub use error::FitError;
pub use helix::Helix;
pub use linalg::invert_and_check;
pub use vertex::{ConstraintOutcome, FitStatus, IpConstraint, VertexFit};

// Commonly used types
// All of the fit runs in 64-bit; the helix Jacobians lose too much precision
// in 32-bit for sub-micron vertex resolution.
pub type Vector3 = nalgebra::Vector3<f64>;
pub type Vector5 = nalgebra::SVector<f64, 5>;
pub type Matrix3 = nalgebra::Matrix3<f64>;
pub type Matrix5 = nalgebra::SMatrix<f64, 5, 5>;
pub type Matrix6 = nalgebra::Matrix6<f64>;
pub type Matrix7 = nalgebra::SMatrix<f64, 7, 7>;
/// 5×3 Jacobian of the helix parameters with respect to position or momentum.
pub type Matrix5x3 = nalgebra::SMatrix<f64, 5, 3>;

/// Conversion constant between magnetic field (T), charge (e) and the
/// curvature of a track in cm⁻¹ per GeV/c. The sign makes a positive track
/// in a field along +z bend clockwise when seen from +z.
pub const KAPPA: f64 = -0.00299792458;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
