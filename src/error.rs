//! Errors returned by the vertex fit.
//!
//! Only caller mistakes are errors. Numerical trouble inside a fit is reported
//! through [`FitStatus`](crate::FitStatus) instead.

/// Error raised by setters and accessors of [`VertexFit`](crate::VertexFit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FitError {
    /// A daughter index was not below the number of daughters of the fit.
    #[error("daughter index {index} out of range for a fit with {count} daughters")]
    DaughterOutOfRange { index: usize, count: usize },
}
