//! Small fixed-size linear-algebra helpers used by the fit.
//!
//! The fit only ever inverts 3×3 and 5×5 symmetric matrices. Inverses are
//! validated by multiplying back against the input, which catches singular
//! and badly conditioned covariances without failing hard.

use nalgebra::{Const, DimMin, SMatrix};

/// Absolute per-element tolerance on `input × output − 1` accepted by
/// [`invert_and_check`].
///
/// This is a sanity guard against singular input, not a precision bound.
pub const INVERSION_TOLERANCE: f64 = 1e-2;

// ── Checked inversion ──────────────────────────────────────────────────────

/// Invert a square matrix and verify the result.
///
/// Returns the inverse together with a validity flag. The flag is `true` when
/// every element of `input × output` lies within [`INVERSION_TOLERANCE`] of
/// the identity. When no direct inverse exists, the zero matrix is returned
/// with `false`. Never panics; what to do with an invalid inverse is the
/// caller's decision.
pub fn invert_and_check<const N: usize>(
    input: &SMatrix<f64, N, N>,
) -> (SMatrix<f64, N, N>, bool)
where
    Const<N>: DimMin<Const<N>, Output = Const<N>>,
{
    let output = match input.try_inverse() {
        Some(inv) => inv,
        None => return (SMatrix::zeros(), false),
    };

    let product = input * output;
    let identity = SMatrix::<f64, N, N>::identity();
    let ok = product
        .iter()
        .zip(identity.iter())
        .all(|(p, i)| (p - i).abs() <= INVERSION_TOLERANCE);

    (output, ok)
}

/// Force a covariance matrix to be exactly symmetric.
pub(crate) fn symmetrize<const N: usize>(m: &SMatrix<f64, N, N>) -> SMatrix<f64, N, N> {
    (m + m.transpose()) * 0.5
}

// ── Angles ─────────────────────────────────────────────────────────────────

/// Wrap an angle difference into (−π, π].
#[inline]
pub fn wrap_angle(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let wrapped = angle - TAU * (angle / TAU).round();
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

// ── Container adapters ─────────────────────────────────────────────────────

/// Build a matrix from a flat row-major slice of length `N * N`.
///
/// nalgebra's own `from_slice` is column-major, which silently transposes
/// non-symmetric input; use this at API boundaries instead. Returns `None`
/// if the slice has the wrong length.
pub fn matrix_from_row_slice<const N: usize>(values: &[f64]) -> Option<SMatrix<f64, N, N>> {
    if values.len() != N * N {
        return None;
    }
    Some(SMatrix::from_fn(|i, j| values[i * N + j]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Matrix3, Matrix5};

    #[test]
    fn test_invert_well_conditioned() {
        let m = Matrix3::new(4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0);
        let (inv, ok) = invert_and_check(&m);
        assert!(ok);
        let product = m * inv;
        assert!((product - Matrix3::identity()).amax() < 1e-12);
    }

    #[test]
    fn test_invert_singular() {
        let m = Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 1.0, 1.0);
        let (_, ok) = invert_and_check(&m);
        assert!(!ok, "rank-2 matrix must fail the check");

        let (inv, ok) = invert_and_check(&Matrix5::zeros());
        assert!(!ok);
        assert_eq!(inv, Matrix5::zeros());
    }

    #[test]
    fn test_invert_tiny_but_regular() {
        // Small-but-regular covariances (e.g. 1e-12 cm²) are legitimate input.
        let m = Matrix3::identity() * 1e-12;
        let (inv, ok) = invert_and_check(&m);
        assert!(ok);
        assert!((inv[(0, 0)] - 1e12).abs() < 1.0);
    }

    #[test]
    fn test_wrap_angle() {
        use std::f64::consts::PI;
        assert!((wrap_angle(0.3) - 0.3).abs() < 1e-15);
        assert!((wrap_angle(2.0 * PI - 0.1) + 0.1).abs() < 1e-12);
        assert!((wrap_angle(-2.0 * PI + 0.1) - 0.1).abs() < 1e-12);
        assert!((wrap_angle(PI) - PI).abs() < 1e-12);
        assert!((wrap_angle(-PI) - PI).abs() < 1e-12);
    }

    #[test]
    fn test_matrix_from_row_slice_is_row_major() {
        let m: SMatrix<f64, 2, 2> = matrix_from_row_slice(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(m[(0, 1)], 2.0);
        assert_eq!(m[(1, 0)], 3.0);
        assert!(matrix_from_row_slice::<2>(&[1.0, 2.0, 3.0]).is_none());
    }
}
