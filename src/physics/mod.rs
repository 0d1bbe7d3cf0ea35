//! Electromagnetics calculations.
pub mod disk_coil;
pub mod solenoid;

pub use disk_coil::{self_inductance_disk_coil, self_inductance_disk_coil_par, shape_factor_disk_coil};
pub use solenoid::{self_inductance_solenoid, self_inductance_solenoid_par, shape_factor_solenoid};

use crate::error::DomainError;

/// Reject anything that is not a finite, strictly positive number.
#[inline]
pub(crate) fn check_positive(name: &'static str, value: f64) -> Result<f64, DomainError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(DomainError::NonPositive { name, value })
    }
}

/// Reject values outside the interval over which a formula holds its accuracy.
#[inline]
pub(crate) fn check_range(
    name: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<f64, DomainError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(DomainError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

/// Reject values outside `(min, max]`, for formulas that degenerate at the lower bound.
#[inline]
pub(crate) fn check_range_above(
    name: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<f64, DomainError> {
    if value > min && value <= max {
        Ok(value)
    } else {
        Err(DomainError::OutOfHalfOpenRange {
            name,
            value,
            min,
            max,
        })
    }
}

/// Reject overflowed or otherwise non-finite results.
#[inline]
pub(crate) fn check_finite(name: &'static str, value: f64) -> Result<f64, DomainError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DomainError::NonFinite { name })
    }
}
