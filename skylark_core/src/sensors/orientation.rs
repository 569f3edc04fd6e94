//! Chip orientation remap.
//!
//! A sensor die can be soldered in any of the 24 proper axis alignments;
//! the remap table maps chip axes onto board axes with signs. Applied
//! in-driver, before calibration.

use skylark_common::math::Vector3;

/// One signed axis permutation: output axis `i` takes input axis
/// `map[i]` multiplied by `sign[i]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AxisMap {
    map: [u8; 3],
    sign: [i8; 3],
}

/// The 24 proper (determinant +1) signed axis permutations, grouped by
/// permutation with the sign sets that keep the handedness.
const ORIENTATIONS: [AxisMap; 24] = [
    // identity permutation (even)
    AxisMap { map: [0, 1, 2], sign: [1, 1, 1] },
    AxisMap { map: [0, 1, 2], sign: [1, -1, -1] },
    AxisMap { map: [0, 1, 2], sign: [-1, 1, -1] },
    AxisMap { map: [0, 1, 2], sign: [-1, -1, 1] },
    // swap y/z (odd)
    AxisMap { map: [0, 2, 1], sign: [1, 1, -1] },
    AxisMap { map: [0, 2, 1], sign: [1, -1, 1] },
    AxisMap { map: [0, 2, 1], sign: [-1, 1, 1] },
    AxisMap { map: [0, 2, 1], sign: [-1, -1, -1] },
    // swap x/y (odd)
    AxisMap { map: [1, 0, 2], sign: [1, 1, -1] },
    AxisMap { map: [1, 0, 2], sign: [1, -1, 1] },
    AxisMap { map: [1, 0, 2], sign: [-1, 1, 1] },
    AxisMap { map: [1, 0, 2], sign: [-1, -1, -1] },
    // cycle x→y→z (even)
    AxisMap { map: [1, 2, 0], sign: [1, 1, 1] },
    AxisMap { map: [1, 2, 0], sign: [1, -1, -1] },
    AxisMap { map: [1, 2, 0], sign: [-1, 1, -1] },
    AxisMap { map: [1, 2, 0], sign: [-1, -1, 1] },
    // cycle x→z→y (even)
    AxisMap { map: [2, 0, 1], sign: [1, 1, 1] },
    AxisMap { map: [2, 0, 1], sign: [1, -1, -1] },
    AxisMap { map: [2, 0, 1], sign: [-1, 1, -1] },
    AxisMap { map: [2, 0, 1], sign: [-1, -1, 1] },
    // swap x/z (odd)
    AxisMap { map: [2, 1, 0], sign: [1, 1, -1] },
    AxisMap { map: [2, 1, 0], sign: [1, -1, 1] },
    AxisMap { map: [2, 1, 0], sign: [-1, 1, 1] },
    AxisMap { map: [2, 1, 0], sign: [-1, -1, -1] },
];

/// Index into the orientation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorOrientation(u8);

impl Default for SensorOrientation {
    fn default() -> Self {
        Self::EAST_NORTH_UP
    }
}

impl SensorOrientation {
    /// Chip axes equal board axes.
    pub const EAST_NORTH_UP: Self = Self(0);
    /// Rotated 90° about z.
    pub const SOUTH_EAST_UP: Self = Self(9);
    /// Rotated 180° about z.
    pub const WEST_SOUTH_UP: Self = Self(3);
    /// Rotated 270° about z.
    pub const NORTH_WEST_UP: Self = Self(10);
    /// Flipped, component side down.
    pub const EAST_SOUTH_DOWN: Self = Self(1);
    pub const SOUTH_WEST_DOWN: Self = Self(11);
    pub const WEST_NORTH_DOWN: Self = Self(2);
    pub const NORTH_EAST_DOWN: Self = Self(8);

    /// Any of the 24 table entries.
    pub fn from_index(index: u8) -> Option<Self> {
        (usize::from(index) < ORIENTATIONS.len()).then_some(Self(index))
    }

    pub fn index(self) -> u8 {
        self.0
    }

    /// Remap a raw chip-frame vector into the board frame.
    #[inline]
    pub fn apply(self, v: Vector3) -> Vector3 {
        let m = &ORIENTATIONS[self.0 as usize];
        Vector3::new(
            m.sign[0] as f32 * v.axis(m.map[0] as usize),
            m.sign[1] as f32 * v.axis(m.map[1] as usize),
            m.sign[2] as f32 * v.axis(m.map[2] as usize),
        )
    }
}
