//! 3×3 rotation matrices and conversions.

use super::quaternion::Quaternion;
use super::vector::Vector3;
use super::MathError;

/// Shortest vector magnitude accepted by the two-vector construction.
const MIN_ALLOWABLE_MAGNITUDE: f32 = 1e-30;

/// Rotation vector magnitude below which sin/cos are flushed to the
/// small-angle forms (√(2ε) for f32).
const SMALL_ANGLE_LIMIT: f32 = 0.000_488_281_25;

/// 3×3 rotation matrix, row-major.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation3(pub [[f32; 3]; 3]);

impl Default for Rotation3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Rotation3 {
    pub const IDENTITY: Self = Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    /// Rotation matrix equivalent of a quaternion (earth-to-body, matching
    /// the quaternion's own convention).
    pub fn from_quaternion(q: &Quaternion) -> Self {
        let q0s = q.w * q.w;
        let q1s = q.x * q.x;
        let q2s = q.y * q.y;
        let q3s = q.z * q.z;

        Self([
            [
                q0s + q1s - q2s - q3s,
                2.0 * (q.x * q.y + q.w * q.z),
                2.0 * (q.x * q.z - q.w * q.y),
            ],
            [
                2.0 * (q.x * q.y - q.w * q.z),
                q0s - q1s + q2s - q3s,
                2.0 * (q.y * q.z + q.w * q.x),
            ],
            [
                2.0 * (q.x * q.z + q.w * q.y),
                2.0 * (q.y * q.z - q.w * q.x),
                q0s - q1s - q2s + q3s,
            ],
        ])
    }

    /// Quaternion equivalent of a proper rotation matrix.
    ///
    /// Uses the largest-diagonal-sum branch to keep the divisor away from
    /// zero; the result is canonicalised (`w ≥ 0`).
    pub fn to_quaternion(&self) -> Quaternion {
        let r = &self.0;
        let m = [
            1.0 + r[0][0] + r[1][1] + r[2][2],
            1.0 + r[0][0] - r[1][1] - r[2][2],
            1.0 - r[0][0] + r[1][1] - r[2][2],
            1.0 - r[0][0] - r[1][1] + r[2][2],
        ];

        let mut index = 0;
        let mut mag = m[0];
        for (i, &v) in m.iter().enumerate().skip(1) {
            if v > mag {
                mag = v;
                index = i;
            }
        }
        let mag = 2.0 * mag.sqrt();

        let q = match index {
            0 => Quaternion::new(
                mag / 4.0,
                (r[1][2] - r[2][1]) / mag,
                (r[2][0] - r[0][2]) / mag,
                (r[0][1] - r[1][0]) / mag,
            ),
            1 => Quaternion::new(
                (r[1][2] - r[2][1]) / mag,
                mag / 4.0,
                (r[0][1] + r[1][0]) / mag,
                (r[0][2] + r[2][0]) / mag,
            ),
            2 => Quaternion::new(
                (r[2][0] - r[0][2]) / mag,
                (r[0][1] + r[1][0]) / mag,
                mag / 4.0,
                (r[1][2] + r[2][1]) / mag,
            ),
            _ => Quaternion::new(
                (r[0][1] - r[1][0]) / mag,
                (r[0][2] + r[2][0]) / mag,
                (r[1][2] + r[2][1]) / mag,
                mag / 4.0,
            ),
        };
        q.canonicalized()
    }

    /// Rotation matrix from two vector directions known in both frames
    /// (Gram–Schmidt). The solution is approximate when no exact rotation
    /// exists.
    ///
    /// Fails with [`MathError::Degenerate`] when any input or cross product
    /// falls below the minimum magnitude (zero or colinear vectors).
    pub fn from_two_vector_pairs(
        v1b: Vector3,
        v1e: Vector3,
        v2b: Vector3,
        v2e: Vector3,
    ) -> Result<Self, MathError> {
        let row = |v: Vector3| -> Result<Vector3, MathError> {
            let mag = v.norm();
            if mag.abs() < MIN_ALLOWABLE_MAGNITUDE {
                return Err(MathError::Degenerate);
            }
            Ok(v * (1.0 / mag))
        };

        // First rows in the direction of v1, second rows v1×v2, third rows
        // the cross of the first two.
        let rib0 = row(v1b)?;
        let rie0 = row(v1e)?;
        let rib1 = row(v1b.cross(&v2b))?;
        let rie1 = row(v1e.cross(&v2e))?;
        let rib2 = rib0.cross(&rib1);
        let rie2 = rie0.cross(&rie1);

        let rib = [rib0, rib1, rib2];
        let rie = [rie0, rie1, rie2];

        // Rbe = Ribᵀ · Rie
        let mut out = [[0.0f32; 3]; 3];
        for (i, out_row) in out.iter_mut().enumerate() {
            for (j, cell) in out_row.iter_mut().enumerate() {
                let mut acc = 0.0;
                for k in 0..3 {
                    acc += rib[k].axis(i) * rie[k].axis(j);
                }
                *cell = acc;
            }
        }
        Ok(Self(out))
    }

    /// Rotation matrix from an axis-angle rotation vector.
    ///
    /// Below the small-angle limit the quaternion is flushed to
    /// `(1, v/2)` — full accuracy with no division by zero.
    pub fn from_rotation_vector(rv: Vector3) -> Self {
        let angle = rv.norm();
        let q = if angle <= SMALL_ANGLE_LIMIT {
            Quaternion::new(1.0, 0.5 * rv.x, 0.5 * rv.y, 0.5 * rv.z)
        } else {
            let scale = (angle * 0.5).sin() / angle;
            Quaternion::new((angle * 0.5).cos(), scale * rv.x, scale * rv.y, scale * rv.z)
        };
        Self::from_quaternion(&q)
    }

    /// `self · v`.
    pub fn apply(&self, v: Vector3) -> Vector3 {
        let r = &self.0;
        Vector3 {
            x: r[0][0] * v.x + r[0][1] * v.y + r[0][2] * v.z,
            y: r[1][0] * v.x + r[1][1] * v.y + r[1][2] * v.z,
            z: r[2][0] * v.x + r[2][1] * v.y + r[2][2] * v.z,
        }
    }

    pub fn transpose(&self) -> Self {
        let r = &self.0;
        Self([
            [r[0][0], r[1][0], r[2][0]],
            [r[0][1], r[1][1], r[2][1]],
            [r[0][2], r[1][2], r[2][2]],
        ])
    }
}
