//! Error types for inductance calculations.
use thiserror::Error;

use crate::quadrature::QuadratureError;

/// Caller-supplied geometry or parameter violates a precondition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("{name} must be finite and positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("outer radius {outer} m is smaller than inner radius {inner} m")]
    RadiusOrder { inner: f64, outer: f64 },

    #[error("disk coil has zero radial width (inner = outer = {radius} m)")]
    DegenerateDisk { radius: f64 },

    #[error("{name} = {value} is outside the supported range [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{name} = {value} is outside the supported range ({min}, {max}]")]
    OutOfHalfOpenRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("elliptic integral parameter m = {m} is outside [0, 1)")]
    EllipticParameter { m: f64 },

    #[error("{name} evaluated to a non-finite value")]
    NonFinite { name: &'static str },
}

/// Failure of a self-inductance calculation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InductanceError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("convergence error: {0}")]
    Convergence(#[from] QuadratureError),

    #[error("Length mismatch")]
    LengthMismatch,
}

impl InductanceError {
    pub fn is_domain(&self) -> bool {
        matches!(self, InductanceError::Domain(_))
    }

    pub fn is_convergence(&self) -> bool {
        matches!(self, InductanceError::Convergence(_))
    }
}

pub type InductanceResult<T> = Result<T, InductanceError>;
