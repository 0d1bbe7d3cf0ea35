//! Pure-math functions supporting physics calculations.
use core::f64::consts::{FRAC_PI_2, LN_2};

use crate::error::DomainError;

/// AGM iteration cap. Convergence is quadratic, so double precision is reached
/// in well under ten steps for any complementary parameter above the subnormal range.
const AGM_MAX_ITER: usize = 64;

/// Largest tolerated deviation of `m + m1` from unity.
const COMPLEMENT_TOL: f64 = 1e-12;

/// Largest complementary parameter accepted by [`ellipe_minus_one`].
pub const NEAR_UNIT_MAX: f64 = 0.1;

/// Term cap for the near-unit series; at `NEAR_UNIT_MAX` each term shrinks tenfold.
const SERIES_MAX_TERMS: usize = 64;

/// Arithmetic-geometric mean shared by the complete integrals.
/// Returns $K$ and $\sum_{n=0}^{N} 2^{n-1} c_n^2$, so that $E = K (1 - \Sigma)$ and $K - E = K \Sigma$.
fn agm(m: f64, m1: f64) -> Result<(f64, f64), DomainError> {
    if !m.is_finite() || !m1.is_finite() || !(0.0..=1.0).contains(&m) || !(m1 > 0.0 && m1 <= 1.0) {
        return Err(DomainError::EllipticParameter { m });
    }
    if (m + m1 - 1.0).abs() > COMPLEMENT_TOL {
        return Err(DomainError::EllipticParameter { m });
    }

    let mut a: f64 = 1.0;
    let mut b: f64 = m1.sqrt();
    let mut c: f64 = m.sqrt();
    let mut weight: f64 = 0.5; // 2^(n-1)
    let mut sum: f64 = weight * m; // [nondim] running sum of 2^(n-1) c_n^2

    for _ in 0..AGM_MAX_ITER {
        if c.abs() <= f64::EPSILON * a {
            break;
        }
        let a_next = 0.5 * (a + b);
        let b_next = (a * b).sqrt();
        c = 0.5 * (a - b);
        a = a_next;
        b = b_next;

        weight *= 2.0;
        sum = (weight * c).mul_add(c, sum);
    }

    Ok((FRAC_PI_2 / a, sum))
}

/// Complete elliptic integrals of the first and second kind, evaluated together.
///
/// Takes the parameter $m = k^2$ and its complement $m_1 = 1 - m$ as separate arguments so that callers
/// who can form $m_1$ analytically (e.g. $\beta^2 / (1 + \beta^2)$) keep full precision near $m \to 1$,
/// where forming `1.0 - m` would cancel.
///
/// # Arguments
///
/// * `m`:  (nondim) elliptic parameter, $0 \le m \le 1$
/// * `m1`: (nondim) complementary parameter, $1 - m$, strictly positive
///
/// `m` may round to exactly 1.0 as long as `m1` is positive; the complement carries the information.
///
/// # Commentary
///
/// Arithmetic-geometric mean with $a_0 = 1$, $b_0 = \sqrt{m_1}$, $c_0 = \sqrt{m}$:
///
/// $K = \pi / (2 a_N)$ and $E = K \left(1 - \sum_{n=0}^{N} 2^{n-1} c_n^2\right)$.
///
/// Relative error is a few ulp across the domain; the AGM has no curve-fit error term.
///
/// # References
///
///   \[1\] NIST Digital Library of Mathematical Functions, §19.8(i). <https://dlmf.nist.gov/19.8>
///
///   \[2\] M. Abramowitz and I. A. Stegun, *Handbook of mathematical functions: with formulas, graphs, and mathematical tables*. 1970. §17.6.
pub fn ellipke(m: f64, m1: f64) -> Result<(f64, f64), DomainError> {
    let (k, sum) = agm(m, m1)?;
    Ok((k, k * (1.0 - sum)))
}

/// $K(m)$, $E(m)$ and the difference $K(m) - E(m)$.
///
/// The difference is formed directly from the AGM sum rather than by subtraction,
/// so it keeps full relative precision as $m \to 0$, where $K - E \approx \pi m / 4$.
/// Arguments as for [`ellipke`].
pub fn ellipkde(m: f64, m1: f64) -> Result<(f64, f64, f64), DomainError> {
    let (k, sum) = agm(m, m1)?;
    Ok((k, k * (1.0 - sum), k * sum))
}

/// $E(1 - m_1) - 1$ for a small complementary parameter $m_1$.
///
/// # Arguments
///
/// * `m1`: (nondim) complementary parameter, $0 < m_1 \le$ [`NEAR_UNIT_MAX`]
///
/// # Commentary
///
/// Both $E$ and the quantities it is compared against approach 1 as $m_1 \to 0$.
/// Summing the logarithmic series directly,
///
/// $E - 1 = \frac{1}{2} \sum_{j=0}^{\infty} \frac{(1/2)_j (3/2)_j}{(2)_j\, j!} m_1^{j+1}
///   \left(\ln\frac{1}{k'} + d(j) - \frac{1}{(2j+1)(2j+2)}\right)$
///
/// with $k' = \sqrt{m_1}$, $d(0) = \ln 4$ and $d(j+1) = d(j) - 2 / ((2j+1)(2j+2))$,
/// avoids forming $E$ first and subtracting.
///
/// # References
///
///   \[1\] NIST Digital Library of Mathematical Functions, §19.12, eq. 19.12.2. <https://dlmf.nist.gov/19.12>
pub fn ellipe_minus_one(m1: f64) -> Result<f64, DomainError> {
    if !(m1 > 0.0 && m1 <= NEAR_UNIT_MAX) {
        return Err(DomainError::EllipticParameter { m: 1.0 - m1 });
    }

    let log_term = -0.5 * m1.ln(); // [nondim] ln(1/k')
    let mut coef: f64 = 1.0; // (1/2)_j (3/2)_j / ((2)_j j!)
    let mut digamma: f64 = 2.0 * LN_2; // d(j)
    let mut power: f64 = m1; // m1^(j+1)
    let mut sum: f64 = 0.0;

    for j in 0..SERIES_MAX_TERMS {
        let jf = j as f64;
        let step = 1.0 / ((2.0 * jf + 1.0) * (2.0 * jf + 2.0));
        let term = coef * power * (log_term + digamma - step);
        sum += term;
        if term.abs() <= f64::EPSILON * sum.abs() {
            break;
        }
        coef *= (0.5 + jf) * (1.5 + jf) / ((2.0 + jf) * (jf + 1.0));
        digamma -= 2.0 * step;
        power *= m1;
    }

    Ok(0.5 * sum)
}

/// Complete elliptic integral of the first kind,
/// $K(m) = \int_0^{\pi/2} \left(1 - m \sin^2\theta\right)^{-1/2} d\theta$.
///
/// Uses the parameter convention $m = k^2$, as scipy does.
/// Returns an error for $m \notin [0, 1)$ rather than extrapolating.
#[inline]
pub fn ellipk(m: f64) -> Result<f64, DomainError> {
    Ok(ellipke(m, 1.0 - m)?.0)
}

/// Complete elliptic integral of the second kind,
/// $E(m) = \int_0^{\pi/2} \left(1 - m \sin^2\theta\right)^{1/2} d\theta$.
///
/// Uses the parameter convention $m = k^2$, as scipy does.
/// Returns an error for $m \notin [0, 1)$ rather than extrapolating.
#[inline]
pub fn ellipe(m: f64) -> Result<f64, DomainError> {
    Ok(ellipke(m, 1.0 - m)?.1)
}

#[cfg(test)]
mod test {
    use super::*;

    /// Div/0-resistant approximate comparison
    fn approx(truth: f64, val: f64, rtol: f64, atol: f64) -> bool {
        let abs_err = (val - truth).abs();
        let lim = rtol * truth.abs() + atol;
        abs_err < lim
    }

    #[test]
    fn test_ellipk_reference_values() {
        // scipy.special.ellipk
        let cases: &[(f64, f64)] = &[
            (0.0, FRAC_PI_2),
            (0.1, 1.6124413487202192),
            (0.2, 1.659623598610528),
            (0.3, 1.713889448178791),
            (0.4, 1.7775193714912534),
            (0.5, 1.8540746773013719),
            (0.6, 1.9495677498060258),
            (0.7, 2.075363135292469),
            (0.8, 2.257205326820854),
            (0.9, 2.5780921133481733),
            (0.95, 2.9083372484445515),
            (0.99, 3.6956373629898747),
            (0.999, 4.841132560550296),
        ];
        for &(m, truth) in cases {
            let k = ellipk(m).unwrap();
            assert!(approx(truth, k, 1e-14, 0.0), "K({m}) = {k}, expected {truth}");
        }
    }

    #[test]
    fn test_ellipe_reference_values() {
        // scipy.special.ellipe
        let cases: &[(f64, f64)] = &[
            (0.0, FRAC_PI_2),
            (0.1, 1.5307576368977633),
            (0.2, 1.489035058095853),
            (0.3, 1.4453630644126654),
            (0.4, 1.3993921388974322),
            (0.5, 1.3506438810476755),
            (0.6, 1.2984280350469133),
            (0.7, 1.2416705679458229),
            (0.8, 1.1784899243278386),
            (0.9, 1.1047747327040733),
            (0.95, 1.0604737277662784),
            (0.99, 1.015993545025224),
            (0.999, 1.0021707908344453),
        ];
        for &(m, truth) in cases {
            let e = ellipe(m).unwrap();
            assert!(approx(truth, e, 1e-14, 0.0), "E({m}) = {e}, expected {truth}");
        }
    }

    /// Legendre's relation, $E K' + E' K - K K' = \pi / 2$
    #[test]
    fn test_legendre_relation() {
        for &m in &[0.05, 0.1, 0.3, 0.5, 0.7, 0.9, 0.95] {
            let (k, e) = ellipke(m, 1.0 - m).unwrap();
            let (kp, ep) = ellipke(1.0 - m, m).unwrap();
            let lhs = e * kp + ep * k - k * kp;
            assert!(approx(FRAC_PI_2, lhs, 1e-13, 0.0), "m = {m}: {lhs}");
        }
    }

    /// Passing the complement directly keeps the logarithmic growth of K and
    /// the approach of E to 1 resolved where `1.0 - m` would round to zero.
    #[test]
    fn test_near_unit_parameter() {
        let m1 = 1e-20;
        let (k, e) = ellipke(1.0, m1).unwrap();
        // K ~ ln(4 / sqrt(m1)) for small m1
        let asymptote = (4.0 / m1.sqrt()).ln();
        assert!(approx(asymptote, k, 1e-12, 0.0), "{k} vs {asymptote}");
        assert!(approx(1.0, e, 1e-12, 0.0), "{e}");
    }

    /// K - E from the AGM sum against its small-parameter expansion (pi m / 4)(1 + 3m / 8)
    #[test]
    fn test_k_minus_e_small_parameter() {
        let m = 1e-10;
        let (_, _, d) = ellipkde(m, 1.0 - m).unwrap();
        let expansion = FRAC_PI_2 / 2.0 * m * (1.0 + 3.0 * m / 8.0);
        assert!(approx(expansion, d, 1e-14, 0.0), "{d} vs {expansion}");

        // Consistent with the separate integrals where subtraction is harmless
        for &m in &[0.1, 0.5, 0.9] {
            let (k, e, d) = ellipkde(m, 1.0 - m).unwrap();
            assert_eq!((k, e), ellipke(m, 1.0 - m).unwrap());
            assert!(approx(k - e, d, 1e-14, 0.0));
        }
    }

    #[test]
    fn test_ellipe_minus_one() {
        // (m1, E(1 - m1) - 1), 50-digit evaluation
        let cases: &[(f64, f64)] = &[
            (1e-8, 5.0483173843854769e-8),
            (1e-3, 2.1707908344451659e-3),
            (0.05, 6.0473727766278243e-2),
        ];
        for &(m1, truth) in cases {
            let v = ellipe_minus_one(m1).unwrap();
            assert!(approx(truth, v, 1e-14, 0.0), "{m1}: {v} vs {truth}");
        }

        // Agrees with the AGM where the subtraction still keeps most digits
        let m1 = 0.05;
        let (_, e) = ellipke(1.0 - m1, m1).unwrap();
        assert!(approx(e - 1.0, ellipe_minus_one(m1).unwrap(), 1e-13, 0.0));

        for m1 in [0.0, -1e-3, 0.2, f64::NAN] {
            assert!(ellipe_minus_one(m1).is_err(), "{m1}");
        }
    }

    #[test]
    fn test_domain_errors() {
        for m in [-0.1, 1.0, 1.5] {
            assert_eq!(ellipk(m), Err(DomainError::EllipticParameter { m }));
            assert_eq!(ellipe(m), Err(DomainError::EllipticParameter { m }));
        }
        assert!(ellipk(f64::NAN).is_err());
        assert!(ellipe(f64::INFINITY).is_err());
        // Inconsistent complement
        assert!(ellipke(0.5, 0.25).is_err());
    }
}
