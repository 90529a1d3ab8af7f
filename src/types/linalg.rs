//! Linear algebra aliases for the tag tracker
//!
//! Everything in the filter works in a right-handed world frame with
//! double precision, so the aliases pin the scalar type once.

use nalgebra::{UnitQuaternion, Vector3};

// ===== Vector Types =====
pub type Vec3 = Vector3<f64>;
pub type Orientation = UnitQuaternion<f64>;

/// Clamp an interpolation ratio into `[0, 1]`.
///
/// NaN (e.g. `0 / 0` from a zero-length window) collapses to 1 so that a
/// degenerate window always decays fully instead of leaking NaN.
pub fn unit_ratio(numerator: f64, denominator: f64) -> f64 {
    let ratio = numerator / denominator;
    if ratio.is_nan() {
        1.0
    } else {
        ratio.clamp(0.0, 1.0)
    }
}

/// Linear interpolation between two vectors, `t` clamped to `[0, 1]`.
pub fn lerp(from: &Vec3, to: &Vec3, t: f64) -> Vec3 {
    let t = if t.is_nan() { 1.0 } else { t.clamp(0.0, 1.0) };
    from + (to - from) * t
}

/// Shrink a vector toward zero by `t` (0 keeps it, 1 zeroes it).
pub fn fade_to_zero(value: &Vec3, t: f64) -> Vec3 {
    lerp(value, &Vec3::zeros(), t)
}
