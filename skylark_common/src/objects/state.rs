//! Estimated-state records published by the sensor and estimator chain.

use crate::math::Quaternion;

/// Calibrated gyro rates [deg/s], body frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GyroState {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Die temperature [°C]; NaN when the chip provides none.
    pub temperature: f32,
}

/// Calibrated accelerometer reading [m/s²], body frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AccelState {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Die temperature [°C]; NaN when the chip provides none.
    pub temperature: f32,
}

/// Magnetometer reading [mGauss], body frame, orientation-corrected.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MagState {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Barometric state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BaroState {
    /// Static pressure [kPa].
    pub pressure: f32,
    /// Barometric altitude above the 1013.25 hPa reference [m].
    pub altitude: f32,
    /// Compensated temperature [°C].
    pub temperature: f32,
}

/// The fused attitude estimate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AttitudeState {
    pub q: Quaternion,
    /// Euler angles [deg], derived from `q` at publish time.
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

/// NED position relative to home [m].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionState {
    pub north: f32,
    pub east: f32,
    pub down: f32,
}

/// NED velocity [m/s].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityState {
    pub north: f32,
    pub east: f32,
    pub down: f32,
}
