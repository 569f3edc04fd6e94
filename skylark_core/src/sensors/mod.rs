//! Sensor ingest framework.
//!
//! Per-chip drivers implement the small polled capability contract
//! [`SensorDriver`]; the framework keeps a registry of boxed drivers per
//! sensor category, applies orientation remap plus bias/scale, and
//! publishes calibrated samples to the estimator queue.

mod orientation;
mod sim;

pub use orientation::SensorOrientation;
pub use sim::SimImu;

use std::time::Instant;

use skylark_bus::EventQueue;
use skylark_common::math::Vector3;
use tracing::{debug, warn};

/// Sensor categories the registry indexes by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Gyro,
    Accel,
    Mag,
    Baro,
}

/// One fetched sample. Inertial and magnetic chips fill `axes`;
/// barometers fill `pressure`. `temperature` is in °C, NaN when the chip
/// does not measure it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub axes: Vector3,
    pub pressure: f32,
    pub temperature: f32,
}

impl Default for SensorSample {
    fn default() -> Self {
        Self {
            axes: Vector3::ZERO,
            pressure: 0.0,
            temperature: f32::NAN,
        }
    }
}

/// Polled per-chip driver contract.
///
/// `poll` returns true when a new sample is available to `fetch`; `test`
/// verifies chip presence; `reset` recovers a wedged device. `scale`
/// converts raw LSB to engineering units per axis.
pub trait SensorDriver: Send {
    fn kind(&self) -> SensorKind;
    fn test(&mut self) -> bool;
    fn poll(&mut self) -> bool;
    fn fetch(&mut self) -> SensorSample;
    fn scale(&self) -> Vector3;
    fn reset(&mut self);
}

/// Registry of chip drivers, indexed by category.
///
/// Board init registers every detected chip; the ingest stage takes the
/// drivers it owns from here. Later registrations of the same category
/// stack (first registered wins on `take`).
#[derive(Default)]
pub struct SensorRegistry {
    drivers: Vec<Box<dyn SensorDriver>>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Box<dyn SensorDriver>) {
        self.drivers.push(driver);
    }

    /// Remove and return the first driver of `kind`.
    pub fn take(&mut self, kind: SensorKind) -> Option<Box<dyn SensorDriver>> {
        let idx = self.drivers.iter().position(|d| d.kind() == kind)?;
        Some(self.drivers.remove(idx))
    }

    pub fn count(&self, kind: SensorKind) -> usize {
        self.drivers.iter().filter(|d| d.kind() == kind).count()
    }
}

/// One gyro+accel pair handed to the estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    /// Scaled rates [deg/s], orientation-corrected.
    pub gyro: Vector3,
    /// Raw accelerometer [LSB], orientation-corrected. Bias/scale applies
    /// downstream where the calibration lives.
    pub accel: Vector3,
    /// Time step since the previous sample [s].
    pub dt: f32,
}

/// Queue depth between ingest and the estimator: a couple of back samples
/// survive one late estimator tick.
pub const IMU_QUEUE_DEPTH: usize = 4;

pub type ImuQueue = EventQueue<ImuSample, IMU_QUEUE_DEPTH>;

/// The ingest stage: drains registered drivers, remaps axes, and feeds
/// the estimator queue.
pub struct SensorIngest {
    gyro: Box<dyn SensorDriver>,
    accel: Box<dyn SensorDriver>,
    orientation: SensorOrientation,
    queue: ImuQueue,
    last_sample: Option<Instant>,
    accel_last: SensorSample,
    /// Consecutive polls with no gyro data, for the dead-sensor path.
    dry_polls: u32,
}

impl SensorIngest {
    pub fn new(
        mut gyro: Box<dyn SensorDriver>,
        mut accel: Box<dyn SensorDriver>,
        orientation: SensorOrientation,
        queue: ImuQueue,
    ) -> Self {
        debug_assert_eq!(gyro.kind(), SensorKind::Gyro);
        debug_assert_eq!(accel.kind(), SensorKind::Accel);
        if !gyro.test() {
            warn!("gyro self-test failed at init");
        }
        if !accel.test() {
            warn!("accel self-test failed at init");
        }
        Self {
            gyro,
            accel,
            orientation,
            queue,
            last_sample: None,
            accel_last: SensorSample::default(),
            dry_polls: 0,
        }
    }

    /// Periodic ingest tick: poll both chips, publish a combined sample.
    ///
    /// Returns true when a sample was produced. A single missed sample is
    /// a local retry (no alarm change); the caller escalates after
    /// repeated misses.
    pub fn tick(&mut self) -> bool {
        if !self.gyro.poll() {
            self.dry_polls += 1;
            if self.dry_polls == 8 {
                debug!("gyro produced no data for 8 polls, resetting");
                self.gyro.reset();
            }
            return false;
        }
        self.dry_polls = 0;

        let gyro_raw = self.gyro.fetch();
        let gyro_scale = self.gyro.scale();
        // Accel lags at most one tick; reuse the previous value when dry.
        if self.accel.poll() {
            self.accel_last = self.accel.fetch();
        }

        let now = Instant::now();
        let dt = match self.last_sample.replace(now) {
            Some(prev) => (now - prev).as_secs_f32(),
            None => skylark_common::consts::SENSOR_PERIOD_S,
        };

        let gyro = self.orientation.apply(Vector3::new(
            gyro_raw.axes.x * gyro_scale.x,
            gyro_raw.axes.y * gyro_scale.y,
            gyro_raw.axes.z * gyro_scale.z,
        ));
        let accel = self.orientation.apply(self.accel_last.axes);

        self.queue.push(ImuSample { gyro, accel, dt });
        true
    }
}
