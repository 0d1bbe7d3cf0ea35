//! Self-inductance of air-core coils from the closed-form reductions of
//! Babic & Akyel, "Improvement in Calculation of the Self- and Mutual Inductance
//! of Thin-Wall Solenoids and Disk Coils", IEEE Trans. Magn. 36(4), 2000.
//!
//! All lengths are in meters and all inductances in henries.
#![allow(non_snake_case)]

pub mod error;
pub mod math;
pub mod physics;
pub mod quadrature;

pub use error::{DomainError, InductanceError};
pub use physics::{self_inductance_disk_coil, self_inductance_solenoid};
pub use quadrature::{QuadOptions, QuadResult, QuadratureError};

/// (H/m) vacuum magnetic permeability.
/// Value from 2022 CODATA recommended values, [NIST SPI 961](https://physics.nist.gov/cuu/pdf/wall_2022.pdf).
pub const MU_0: f64 = 0.999_999_999_87 * core::f64::consts::PI * 4e-7; // [H/m]

/// (dimensionless) Catalan's constant, G = 1 - 1/9 + 1/25 - 1/49 + ...
pub const CATALAN: f64 = 0.915_965_594_177_219_015_054_603_514_932_384_110_774;

/// (m/in) exact by definition of the international inch.
pub const METER_PER_INCH: f64 = 0.0254;
