//! Unit quaternion, Hamilton convention, earth-to-body rotation.

use super::rotation::Rotation3;
use super::vector::Vector3;

/// Unit rotation quaternion `(w, x, y, z)`.
///
/// Rotates earth-frame vectors into the body frame. Kept canonicalised
/// (`w ≥ 0`) so the attitude-to-quaternion mapping stays unique.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quaternion {
    pub const IDENTITY: Self = Self {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    #[inline]
    pub const fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// Quaternion product `self ⊗ rhs`.
    pub fn mul(&self, rhs: &Self) -> Self {
        Self {
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        }
    }

    /// Conjugate; equals the inverse for unit quaternions.
    #[inline]
    pub fn inverse(&self) -> Self {
        Self {
            w: self.w,
            x: -self.x,
            y: -self.y,
            z: -self.z,
        }
    }

    #[inline]
    pub fn norm(&self) -> f32 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Scale to unit norm. The caller must handle the degenerate case
    /// (`norm < 1e-3` or NaN) before relying on the result.
    #[inline]
    pub fn normalized(&self) -> Self {
        let m = self.norm();
        Self {
            w: self.w / m,
            x: self.x / m,
            y: self.y / m,
            z: self.z / m,
        }
    }

    /// Flip sign so `w ≥ 0`.
    #[inline]
    pub fn canonicalized(&self) -> Self {
        if self.w < 0.0 {
            Self {
                w: -self.w,
                x: -self.x,
                y: -self.y,
                z: -self.z,
            }
        } else {
            *self
        }
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.w.is_finite() && self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Build from roll/pitch/yaw in degrees (Z-Y-X convention).
    pub fn from_rpy(rpy: [f32; 3]) -> Self {
        let phi = (rpy[0] / 2.0).to_radians();
        let theta = (rpy[1] / 2.0).to_radians();
        let psi = (rpy[2] / 2.0).to_radians();
        let (sphi, cphi) = phi.sin_cos();
        let (stheta, ctheta) = theta.sin_cos();
        let (spsi, cpsi) = psi.sin_cos();

        Self {
            w: cphi * ctheta * cpsi + sphi * stheta * spsi,
            x: sphi * ctheta * cpsi - cphi * stheta * spsi,
            y: cphi * stheta * cpsi + sphi * ctheta * spsi,
            z: cphi * ctheta * spsi - sphi * stheta * cpsi,
        }
        .canonicalized()
    }

    /// Roll/pitch/yaw in degrees.
    ///
    /// Pitch comes from an asin and is clamped into [−90, 90]; at the
    /// |pitch| ≈ 90° singularity roll and yaw individually lose meaning but
    /// their sum/difference stays consistent.
    pub fn to_rpy(&self) -> [f32; 3] {
        let q0s = self.w * self.w;
        let q1s = self.x * self.x;
        let q2s = self.y * self.y;
        let q3s = self.z * self.z;

        let r13 = 2.0 * (self.x * self.z - self.w * self.y);
        let r11 = q0s + q1s - q2s - q3s;
        let r12 = 2.0 * (self.x * self.y + self.w * self.z);
        let r23 = 2.0 * (self.y * self.z + self.w * self.x);
        let r33 = q0s - q1s - q2s + q3s;

        [
            r23.atan2(r33).to_degrees(),
            (-r13).clamp(-1.0, 1.0).asin().to_degrees(),
            r12.atan2(r11).to_degrees(),
        ]
    }

    /// The body-to-earth rotation matrix equivalent.
    #[inline]
    pub fn to_rotation(&self) -> Rotation3 {
        Rotation3::from_quaternion(self)
    }

    /// Body-frame direction of the earth z axis (the "down" vector the
    /// accelerometer should see under gravity, negated).
    pub fn gravity_body(&self) -> Vector3 {
        Vector3 {
            x: -(2.0 * (self.x * self.z - self.w * self.y)),
            y: -(2.0 * (self.y * self.z + self.w * self.x)),
            z: -(self.w * self.w - self.x * self.x - self.y * self.y + self.z * self.z),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!((a - b).abs() < tol, "{a} vs {b}");
    }

    #[test]
    fn rpy_round_trip_away_from_singularity() {
        for rpy in [
            [10.0, -20.0, 30.0],
            [-45.0, 5.0, -170.0],
            [0.0, 0.0, 179.0],
            [89.0, 0.0, 0.0],
        ] {
            let q = Quaternion::from_rpy(rpy);
            let back = q.to_rpy();
            for i in 0..3 {
                assert_close(back[i], rpy[i], 1e-2);
            }
        }
    }

    #[test]
    fn unit_norm_after_construction() {
        let q = Quaternion::from_rpy([12.0, 34.0, -56.0]);
        assert_close(q.norm(), 1.0, 1e-5);
        assert!(q.w >= 0.0);
    }

    #[test]
    fn product_with_inverse_is_identity() {
        let q = Quaternion::from_rpy([25.0, -10.0, 40.0]);
        let r = q.mul(&q.inverse());
        assert_close(r.w, 1.0, 1e-5);
        assert_close(r.x, 0.0, 1e-5);
        assert_close(r.y, 0.0, 1e-5);
        assert_close(r.z, 0.0, 1e-5);
    }

    #[test]
    fn level_gravity_points_down() {
        let g = Quaternion::IDENTITY.gravity_body();
        assert_close(g.x, 0.0, 1e-6);
        assert_close(g.y, 0.0, 1e-6);
        assert_close(g.z, -1.0, 1e-6);
    }
}
