//! Self-inductance of disk coils (flat spiral windings).
use core::f64::consts::{FRAC_PI_2, LN_2};

use log::debug;
use rayon::iter::{
    IndexedParallelIterator, IntoParallelRefIterator, IntoParallelRefMutIterator, ParallelIterator,
};

use super::{check_finite, check_positive, check_range_above};
use crate::error::{DomainError, InductanceError};
use crate::math::ellipke;
use crate::quadrature::{quad_extrapolated, QuadOptions, QuadResult, QuadratureError};
use crate::{CATALAN, MU_0};

/// (nondim) largest radius ratio $\alpha$ accepted by [`shape_factor_disk_coil`].
pub const ALPHA_MAX: f64 = 1e4;

/// Auxiliary integral $J_1(\alpha)$ of the disk-coil shape factor,
///
/// $J_1 = \int_0^{\pi/2} \ln \frac{\sqrt{1 + \alpha^2 + 2\alpha\cos x} + 1 + \alpha\cos x}
/// {\sqrt{1 + \alpha^2 - 2\alpha\sin x} + \alpha\sin x - 1} dx$
///
/// The denominator vanishes at $x = \pi/2$ as $\alpha \to 1$, leaving a logarithmic peak of
/// width $\sim(\alpha - 1)$ at the endpoint. Extrapolated bisection resolves it within the
/// default budget down to $\alpha \approx 1.0005$; the budget in `opts` bounds how much closer
/// to 1 the ratio can get.
pub fn aux_integral_j1(alpha: f64, opts: &QuadOptions) -> Result<QuadResult, QuadratureError> {
    let alpha2 = alpha * alpha;
    let integrand = |x: f64| {
        let (sin, cos) = x.sin_cos();
        let num = (1.0 + alpha2 + 2.0 * alpha * cos).sqrt() + 1.0 + alpha * cos;
        let den = (1.0 + alpha2 - 2.0 * alpha * sin).sqrt() + alpha * sin - 1.0;
        (num / den).ln()
    };

    quad_extrapolated(integrand, 0.0, FRAC_PI_2, opts)
}

/// Auxiliary integral $J_2(\alpha)$ of the disk-coil shape factor,
///
/// $J_2 = \int_0^{\pi/2} \ln\left(\sqrt{1 + \alpha^2 + 2\alpha\cos 2x} + \alpha + \cos 2x\right) dx$
pub fn aux_integral_j2(alpha: f64, opts: &QuadOptions) -> Result<QuadResult, QuadratureError> {
    let alpha2 = alpha * alpha;
    let integrand = |x: f64| {
        let cos2x = (2.0 * x).cos();
        ((1.0 + alpha2 + 2.0 * alpha * cos2x).sqrt() + alpha + cos2x).ln()
    };

    quad_extrapolated(integrand, 0.0, FRAC_PI_2, opts)
}

/// Shape factor $S(\alpha)$ of a disk coil with default quadrature settings.
///
/// See [`shape_factor_disk_coil_with`].
#[inline]
pub fn shape_factor_disk_coil(alpha: f64) -> Result<f64, InductanceError> {
    shape_factor_disk_coil_with(alpha, &QuadOptions::default())
}

/// Shape factor $S(\alpha)$ of a disk coil.
///
/// # Arguments
///
/// * `alpha`: (nondim) outer radius over inner radius, in (1, [`ALPHA_MAX`]]
/// * `opts`:  error targets and subinterval budget for $J_1$ and $J_2$
///
/// # Commentary
///
/// With $k^2 = 4\alpha / (1 + \alpha)^2$,
///
/// $S = (\alpha^3 + 1)(2G - 1) - \frac{\pi}{2}\ln 2 - (\alpha^3 + 1) K
///   + \frac{\alpha + 1}{2 \alpha k^2}\left[\left((\alpha^4 + 4\alpha^3 + 4\alpha + 1) k^2 - 4\alpha(\alpha^2 + 1)\right) K
///   + \left(-(\alpha^4 + 2\alpha^3 + 2\alpha + 1) k^2 + 4\alpha(\alpha^2 + 1)\right) E\right]
///   - \frac{\alpha^3}{2} J_1 - J_2$
///
/// where $G$ is Catalan's constant. The terms cancel heavily as $\alpha \to 1$, where $S$ vanishes
/// like $(\alpha - 1)^2$ up to a logarithm; an unconverged $J_1$ or $J_2$ is an error, never a zero.
///
/// # References
///
///   \[1\] S. Babic and C. Akyel, “Improvement in calculation of the self- and mutual inductance
///         of thin-wall solenoids and disk coils,” IEEE Transactions on Magnetics, vol. 36, no. 4,
///         pp. 1970–1975, Jul. 2000, doi: [10.1109/TMAG.2000.875240](https://doi.org/10.1109/TMAG.2000.875240).
pub fn shape_factor_disk_coil_with(alpha: f64, opts: &QuadOptions) -> Result<f64, InductanceError> {
    check_range_above("alpha", alpha, 1.0, ALPHA_MAX)?;

    let alpha2 = alpha * alpha;
    let alpha3 = alpha * alpha2;
    let alpha4 = alpha2 * alpha2;

    let k2 = 4.0 * alpha / ((1.0 + alpha) * (1.0 + alpha)); // [nondim]
    let k2c = ((alpha - 1.0) / (alpha + 1.0)).powi(2); // [nondim] 1 - k^2
    let (K, E) = ellipke(k2, k2c)?;

    let J1 = aux_integral_j1(alpha, opts)?;
    let J2 = aux_integral_j2(alpha, opts)?;

    let four_alpha_sq1 = 4.0 * alpha * (alpha2 + 1.0);
    let coef_k = (alpha4 + 4.0 * alpha3 + 4.0 * alpha + 1.0) * k2 - four_alpha_sq1;
    let coef_e = -(alpha4 + 2.0 * alpha3 + 2.0 * alpha + 1.0) * k2 + four_alpha_sq1;

    let S = (alpha3 + 1.0) * (2.0 * CATALAN - 1.0) - FRAC_PI_2 * LN_2 - (alpha3 + 1.0) * K
        + (alpha + 1.0) / (2.0 * alpha * k2) * (coef_k * K + coef_e * E)
        - alpha3 / 2.0 * J1.value
        - J2.value;

    debug!(
        "disk coil: alpha = {alpha}, S = {S} (J1 = {} ± {:e}, J2 = {} ± {:e})",
        J1.value, J1.abs_error, J2.value, J2.abs_error
    );

    Ok(S)
}

/// Self-inductance of a disk coil with default quadrature settings.
///
/// See [`self_inductance_disk_coil_with`].
#[inline]
pub fn self_inductance_disk_coil(
    turns: f64,
    inner_radius: f64,
    outer_radius: f64,
) -> Result<f64, InductanceError> {
    self_inductance_disk_coil_with(turns, inner_radius, outer_radius, &QuadOptions::default())
}

/// Self-inductance of a disk coil.
///
/// # Arguments
///
/// * `turns`:        (nondim) number of turns, need not be an integer
/// * `inner_radius`: (m) inner radius of the winding
/// * `outer_radius`: (m) outer radius of the winding, strictly greater than `inner_radius`
/// * `opts`:         error targets and subinterval budget for the auxiliary integrals
///
/// Returns (H) $\mu_0 N^2 R_1 S(\alpha) / (3 (\alpha - 1)^2)$ with $\alpha = R_2 / R_1$.
///
/// # Commentary
///
/// The normalization is the published one. A direct Neumann double integral of the
/// filament mutual inductance over a uniform radial current sheet comes out at twice
/// this value for the same geometry, which callers comparing against filament
/// discretizations should account for.
///
/// # Assumptions
///
/// * Uniform current sheet; turns are spread evenly in radius
/// * Vacuum permeability everywhere (air core)
/// * Low frequency operation; no skin or proximity effect
pub fn self_inductance_disk_coil_with(
    turns: f64,
    inner_radius: f64,
    outer_radius: f64,
    opts: &QuadOptions,
) -> Result<f64, InductanceError> {
    check_positive("turns", turns)?;
    check_positive("inner radius", inner_radius)?;
    check_positive("outer radius", outer_radius)?;
    if outer_radius < inner_radius {
        return Err(DomainError::RadiusOrder {
            inner: inner_radius,
            outer: outer_radius,
        }
        .into());
    }
    if outer_radius == inner_radius {
        return Err(DomainError::DegenerateDisk {
            radius: inner_radius,
        }
        .into());
    }

    let alpha = outer_radius / inner_radius; // [nondim]
    let S = shape_factor_disk_coil_with(alpha, opts)?;

    let alpha_m1 = alpha - 1.0;
    let L = MU_0 * turns * turns * inner_radius * S / (3.0 * alpha_m1 * alpha_m1); // [H]

    check_finite("disk coil inductance", L).map_err(InductanceError::from)
}

/// Self-inductance of many disk coils.
/// This variant of the function is parallelized over coils.
///
/// # Arguments
///
/// * `turns`:        (nondim) number of turns of each coil, length `n`
/// * `inner_radius`: (m) inner radius of each coil, length `n`
/// * `outer_radius`: (m) outer radius of each coil, length `n`
/// * `out`:          (H) self-inductance of each coil, length `n`
///
/// If any coil fails, one of the failures is returned and `out` is partially written.
pub fn self_inductance_disk_coil_par(
    turns: &[f64],
    inner_radius: &[f64],
    outer_radius: &[f64],
    out: &mut [f64],
) -> Result<(), InductanceError> {
    let n = out.len();
    if turns.len() != n || inner_radius.len() != n || outer_radius.len() != n {
        return Err(InductanceError::LengthMismatch);
    }

    out.par_iter_mut()
        .zip(turns.par_iter())
        .zip(inner_radius.par_iter().zip(outer_radius.par_iter()))
        .try_for_each(|((L, &N), (&r1, &r2))| -> Result<(), InductanceError> {
            *L = self_inductance_disk_coil(N, r1, r2)?;
            Ok(())
        })
}
