//! Deterministic simulated IMU for the host binary and tests.

use skylark_common::consts::GRAV;
use skylark_common::math::Vector3;

use super::{SensorDriver, SensorKind, SensorSample};

/// Simulated gyro or accelerometer.
///
/// Produces a constant reading plus configured offsets: enough to exercise
/// the full ingest→estimate→stabilize chain and the bias bootstrap without
/// hardware. A sample is "ready" on every poll.
pub struct SimImu {
    kind: SensorKind,
    reading: Vector3,
    scale: Vector3,
    alive: bool,
}

impl SimImu {
    /// A gyro reporting `rate` [deg/s] (pre-scale raw equals deg/s, scale 1).
    pub fn gyro(rate: Vector3) -> Self {
        Self {
            kind: SensorKind::Gyro,
            reading: rate,
            scale: Vector3::new(1.0, 1.0, 1.0),
            alive: true,
        }
    }

    /// An accelerometer reporting `accel` [m/s²], emitted in raw LSB at
    /// the standard 0.004·g scale so the calibration path stays honest.
    pub fn accel(accel: Vector3) -> Self {
        let lsb = 1.0 / (GRAV * 0.004);
        Self {
            kind: SensorKind::Accel,
            reading: accel * lsb,
            scale: Vector3::new(GRAV * 0.004, GRAV * 0.004, GRAV * 0.004),
            alive: true,
        }
    }

    /// A level, motionless vehicle.
    pub fn level_pair() -> (Self, Self) {
        (
            Self::gyro(Vector3::ZERO),
            Self::accel(Vector3::new(0.0, 0.0, -GRAV)),
        )
    }

    pub fn set_reading(&mut self, reading: Vector3) {
        self.reading = reading;
    }

    /// Simulate a dead chip: polls stop producing until `reset`.
    pub fn kill(&mut self) {
        self.alive = false;
    }
}

impl SensorDriver for SimImu {
    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn test(&mut self) -> bool {
        self.alive
    }

    fn poll(&mut self) -> bool {
        self.alive
    }

    fn fetch(&mut self) -> SensorSample {
        SensorSample {
            axes: self.reading,
            pressure: 0.0,
            temperature: f32::NAN,
        }
    }

    fn scale(&self) -> Vector3 {
        self.scale
    }

    fn reset(&mut self) {
        self.alive = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{ImuQueue, SensorIngest, SensorOrientation};

    #[test]
    fn ingest_publishes_combined_samples() {
        let (gyro, accel) = SimImu::level_pair();
        let queue = ImuQueue::new();
        let mut ingest = SensorIngest::new(
            Box::new(gyro),
            Box::new(accel),
            SensorOrientation::default(),
            queue.clone(),
        );
        assert!(ingest.tick());
        let sample = queue.pop().expect("sample queued");
        assert_eq!(sample.gyro, Vector3::ZERO);
        // Raw LSB for -1 g on z.
        assert!((sample.accel.z - -1.0 / 0.004).abs() < 1e-2);
    }

    #[test]
    fn dead_gyro_stops_the_stream() {
        let (mut gyro, accel) = SimImu::level_pair();
        gyro.kill();
        let queue = ImuQueue::new();
        let mut ingest = SensorIngest::new(
            Box::new(gyro),
            Box::new(accel),
            SensorOrientation::default(),
            queue.clone(),
        );
        assert!(!ingest.tick());
        assert!(queue.is_empty());
    }
}
