//! Math kernel: vectors, quaternions, rotation matrices, PID, low-pass.
//!
//! All angles are degrees, all rotations Hamilton-convention quaternions
//! that rotate earth-frame vectors into the body frame. `f32` throughout —
//! the flight math never needs more and the sensor data has far less.

mod lowpass;
mod pid;
mod quaternion;
mod rotation;
mod vector;

pub use lowpass::LowPass;
pub use pid::{Pid, PidGains};
pub use quaternion::Quaternion;
pub use rotation::Rotation3;
pub use vector::Vector3;

use thiserror::Error;

/// Errors produced by the math kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MathError {
    /// Inputs are colinear or too short to define a rotation.
    #[error("degenerate input: vectors colinear or below minimum magnitude")]
    Degenerate,
}

/// Wrap an angular error to the shortest way around, (−180, 180].
#[inline]
pub fn wrap_angle_deg(err: f32) -> f32 {
    let m = (err + 180.0).rem_euclid(360.0);
    m - 180.0
}

/// Clamp `v` into [lo, hi].
#[inline]
pub fn boundf(v: f32, lo: f32, hi: f32) -> f32 {
    v.clamp(lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_finds_shortest_way() {
        // desired +179, actual -179 => error must be -2, not +358
        assert!((wrap_angle_deg(179.0 - -179.0) - -2.0).abs() < 1e-4);
        assert!((wrap_angle_deg(-2.0) - -2.0).abs() < 1e-6);
        assert!((wrap_angle_deg(181.0) - -179.0).abs() < 1e-4);
        assert!((wrap_angle_deg(-181.0) - 179.0).abs() < 1e-4);
    }
}
