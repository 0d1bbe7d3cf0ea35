//! Self-inductance of thin-wall solenoids (single-layer cylindrical windings).
use core::f64::consts::PI;

use log::debug;
use rayon::iter::{
    IndexedParallelIterator, IntoParallelRefIterator, IntoParallelRefMutIterator, ParallelIterator,
};

use super::{check_finite, check_positive, check_range};
use crate::error::InductanceError;
use crate::math::{ellipe_minus_one, ellipkde};
use crate::MU_0;

/// (nondim) smallest aspect ratio $\beta$ accepted by [`shape_factor_solenoid`].
pub const BETA_MIN: f64 = 1e-4;

/// (nondim) largest aspect ratio $\beta$ accepted by [`shape_factor_solenoid`].
pub const BETA_MAX: f64 = 1e4;

/// (nondim) complementary parameter below which $E - k$ comes from the near-unit series
const NEAR_UNIT_M1: f64 = 1e-2;

/// Shape factor $T(\beta)$ of a thin-wall solenoid.
///
/// # Arguments
///
/// * `beta`: (nondim) half the winding height over the mean radius, in [`BETA_MIN`, `BETA_MAX`]
///
/// # Commentary
///
/// With $k^2 = 1 / (1 + \beta^2)$,
///
/// $T = \frac{4}{3 \pi \beta k^3}\left[(2k^2 - 1) E(k) + (1 - k^2) K(k) - k^3\right]$
///
/// so that $L = \mu_0 \pi N^2 R^2 T / h$. $T \to 1$ for a long coil ($\beta \to \infty$),
/// recovering the infinite-solenoid inductance, and $T \to 0$ as the winding height vanishes.
///
/// Both limits cancel in the bracket as written. It is evaluated as
/// $k'^2 (K - E) + k^2 (E - k)$, with $K - E$ taken from the AGM sum for long coils
/// and $E - k = (E - 1) + k'^2 / (1 + k)$ from the near-unit series for short ones.
/// The complement $k'^2 = \beta^2 / (1 + \beta^2)$ is formed directly.
///
/// # References
///
///   \[1\] S. Babic and C. Akyel, “Improvement in calculation of the self- and mutual inductance
///         of thin-wall solenoids and disk coils,” IEEE Transactions on Magnetics, vol. 36, no. 4,
///         pp. 1970–1975, Jul. 2000, doi: [10.1109/TMAG.2000.875240](https://doi.org/10.1109/TMAG.2000.875240).
pub fn shape_factor_solenoid(beta: f64) -> Result<f64, InductanceError> {
    check_positive("beta", beta)?;
    check_range("beta", beta, BETA_MIN, BETA_MAX)?;

    let beta2 = beta * beta; // [nondim]
    let k2 = 1.0 / (1.0 + beta2); // [nondim]
    let k2c = beta2 / (1.0 + beta2); // [nondim] 1 - k^2
    let k = k2.sqrt(); // [nondim]
    let k3 = k2 * k; // [nondim]

    let (_, E, K_minus_E) = ellipkde(k2, k2c)?;
    let E_minus_k = if k2c < NEAR_UNIT_M1 {
        ellipe_minus_one(k2c)? + k2c / (1.0 + k)
    } else {
        E - k
    };

    let bracket = k2c.mul_add(K_minus_E, k2 * E_minus_k);
    let T = 4.0 / (3.0 * PI * beta * k3) * bracket;

    Ok(T)
}

/// Self-inductance of a thin-wall solenoid.
///
/// # Arguments
///
/// * `turns`:       (nondim) number of turns, need not be an integer
/// * `mean_radius`: (m) mean radius of the winding
/// * `height`:      (m) axial winding height
///
/// Returns (H) $\mu_0 \pi N^2 R^2 T(\beta) / h$ with $\beta = (h / 2) / R$.
///
/// # Assumptions
///
/// * Uniform current sheet; wire diameter and pitch do not enter
/// * Vacuum permeability everywhere (air core)
/// * Low frequency operation; no skin or proximity effect
pub fn self_inductance_solenoid(
    turns: f64,
    mean_radius: f64,
    height: f64,
) -> Result<f64, InductanceError> {
    check_positive("turns", turns)?;
    check_positive("mean radius", mean_radius)?;
    check_positive("height", height)?;

    let beta = (height / 2.0) / mean_radius; // [nondim]
    let T = shape_factor_solenoid(beta)?;
    debug!("solenoid: beta = {beta}, T = {T}");

    let L = MU_0 * PI * turns * turns * mean_radius * mean_radius * T / height; // [H]

    check_finite("solenoid inductance", L).map_err(InductanceError::from)
}

/// Self-inductance of many thin-wall solenoids.
/// This variant of the function is parallelized over coils.
///
/// # Arguments
///
/// * `turns`:       (nondim) number of turns of each coil, length `n`
/// * `mean_radius`: (m) mean radius of each coil, length `n`
/// * `height`:      (m) winding height of each coil, length `n`
/// * `out`:         (H) self-inductance of each coil, length `n`
///
/// If any coil fails, one of the failures is returned and `out` is partially written.
pub fn self_inductance_solenoid_par(
    turns: &[f64],
    mean_radius: &[f64],
    height: &[f64],
    out: &mut [f64],
) -> Result<(), InductanceError> {
    let n = out.len();
    if turns.len() != n || mean_radius.len() != n || height.len() != n {
        return Err(InductanceError::LengthMismatch);
    }

    out.par_iter_mut()
        .zip(turns.par_iter())
        .zip(mean_radius.par_iter().zip(height.par_iter()))
        .try_for_each(|((L, &N), (&R, &h))| -> Result<(), InductanceError> {
            *L = self_inductance_solenoid(N, R, h)?;
            Ok(())
        })
}
