//! Unit helpers for the imu-telemetry-ble crate.
//!
//! The device reports acceleration in multiples of standard gravity.

/// Standard gravity in m/s².
pub const STANDARD_GRAVITY: f64 = 9.806_65;

/// Convert an acceleration in g to m/s².
///
/// # Example
///
/// ```
/// use imu_telemetry_ble::g_to_mps2;
///
/// assert!((g_to_mps2(1.0) - 9.80665).abs() < 1e-9);
/// ```
#[inline]
pub fn g_to_mps2(g: f64) -> f64 {
    g * STANDARD_GRAVITY
}

/// Convert an acceleration in m/s² to g.
#[inline]
pub fn mps2_to_g(mps2: f64) -> f64 {
    mps2 / STANDARD_GRAVITY
}
