//! Complementary-filter attitude estimator.
//!
//! Fuses gyro rates against the accelerometer gravity reference into the
//! body-to-earth quaternion, estimating gyro bias on the way. Runs per
//! sensor sample; for the first seconds after boot the gains are forced
//! high to pull the filter in and acquire the initial bias.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use skylark_common::alarms::{AlarmLevel, AlarmSlot};
use skylark_common::consts::{
    BOOTSTRAP_ACCEL_KI, BOOTSTRAP_ACCEL_KP, BOOTSTRAP_WINDOW_MS, BOOTSTRAP_YAW_BIAS_RATE,
    MAX_TRIM_FLIGHT_SAMPLES, SENSOR_PERIOD_S,
};
use skylark_common::math::{Quaternion, Rotation3, Vector3};
use skylark_common::objects::{AccelState, ArmedState, AttitudeSettings, AttitudeState, GyroState, TrimFlight};
use tracing::{debug, error, info};

use crate::alarms::Alarms;
use crate::objects::FlightObjects;
use crate::sensors::{ImuQueue, ImuSample};

/// Quaternion norm below which the state is considered destroyed.
const MIN_QUAT_NORM: f32 = 1e-3;

/// Per-step rotation at or beyond half a turn makes the Euler integration
/// meaningless; treat as a fault.
const MAX_STEP_ANGLE_RAD: f32 = core::f32::consts::PI;

#[derive(Debug, Default)]
struct TrimState {
    requested: bool,
    samples: u32,
    accum: Vector3,
}

/// The estimator state machine. Owned by its scheduler callback.
pub struct AttitudeEstimator {
    objects: Arc<FlightObjects>,
    alarms: Alarms,
    queue: ImuQueue,

    settings: AttitudeSettings,
    settings_dirty: Arc<AtomicBool>,

    // Active filter gains (forced during bootstrap).
    accel_kp: f32,
    accel_ki: f32,
    yaw_bias_rate: f32,
    gains_loaded: bool,

    q: Quaternion,
    /// Gyro bias integrator [deg/s].
    bias: Vector3,

    rotate: bool,
    board_rotation: Rotation3,
    trim: TrimState,

    /// Accumulated sample time since boot [s]; drives the one-shot
    /// bootstrap latch (immune to tick-counter wraparound).
    flight_time_s: f32,
    bootstrapped: bool,

    /// Sample time since the last consumed sample [s].
    starved_s: f32,
    /// A quaternion reset published `Critical` last tick; clear it now.
    critical_pulse: bool,
}

impl AttitudeEstimator {
    pub fn new(objects: Arc<FlightObjects>, queue: ImuQueue) -> Self {
        let alarms = Alarms::new(objects.system_alarms.clone());
        let settings_dirty = Arc::new(AtomicBool::new(false));
        {
            let dirty = Arc::clone(&settings_dirty);
            objects
                .settings
                .attitude
                .connect_callback(move |_| dirty.store(true, Ordering::Release));
        }

        let settings = objects.settings.attitude.get();
        let mut est = Self {
            objects,
            alarms,
            queue,
            settings,
            settings_dirty,
            accel_kp: BOOTSTRAP_ACCEL_KP,
            accel_ki: BOOTSTRAP_ACCEL_KI,
            yaw_bias_rate: BOOTSTRAP_YAW_BIAS_RATE,
            gains_loaded: false,
            q: Quaternion::IDENTITY,
            bias: Vector3::ZERO,
            rotate: false,
            board_rotation: Rotation3::IDENTITY,
            trim: TrimState::default(),
            flight_time_s: 0.0,
            bootstrapped: false,
            starved_s: 0.0,
            critical_pulse: false,
        };
        est.apply_settings();
        est
    }

    /// Current bias integrator [deg/s].
    pub fn gyro_bias(&self) -> Vector3 {
        self.bias
    }

    pub fn attitude(&self) -> Quaternion {
        self.q
    }

    /// Scheduler tick: drain queued samples, watch for starvation.
    pub fn tick(&mut self) {
        if self.settings_dirty.swap(false, Ordering::AcqRel) {
            self.settings = self.objects.settings.attitude.get();
            self.apply_settings();
        }

        let mut consumed = 0usize;
        while let Some(sample) = self.queue.pop() {
            self.process_sample(sample);
            consumed += 1;
        }

        if consumed == 0 {
            // Only wait the time of two nominal updates before alarming;
            // the last estimate stays published.
            self.starved_s += SENSOR_PERIOD_S;
            if self.starved_s > 2.0 * SENSOR_PERIOD_S {
                self.alarms.set(AlarmSlot::Attitude, AlarmLevel::Error);
            }
        }
    }

    /// Run the filter over one gyro+accel sample.
    pub fn process_sample(&mut self, sample: ImuSample) {
        self.starved_s = 0.0;
        let dt = if sample.dt > 0.0 {
            sample.dt
        } else {
            SENSOR_PERIOD_S
        };
        self.flight_time_s += dt;
        self.select_gains();

        let mut gyro = sample.gyro;
        let mut accel_raw = sample.accel;
        if self.rotate {
            gyro = self.board_rotation.apply(gyro);
            accel_raw = self.board_rotation.apply(accel_raw);
        }

        self.accumulate_trim(accel_raw);

        // Calibrate: bias in raw LSB, fixed scale per chip.
        let b = self.settings.accel_bias;
        let accel = Vector3::new(
            (accel_raw.x - b[0]) * self.settings.accel_scale,
            (accel_raw.y - b[1]) * self.settings.accel_scale,
            (accel_raw.z - b[2]) * self.settings.accel_scale,
        );

        if self.settings.bias_correct_gyro {
            // Applying the integral here lets the bias show on the
            // published rates as well as correct them.
            gyro += self.bias;
        }

        // Most craft get no gravity information about yaw; pull its bias
        // toward a zero-mean rate instead, weakly.
        self.bias.z += -gyro.z * self.yaw_bias_rate;

        self.objects.gyro_state.set(GyroState {
            x: gyro.x,
            y: gyro.y,
            z: gyro.z,
            temperature: f32::NAN,
        });
        self.objects.accel_state.set(AccelState {
            x: accel.x,
            y: accel.y,
            z: accel.z,
            temperature: f32::NAN,
        });

        self.update_attitude(gyro, accel, dt);
    }

    /// Forced gains through the bootstrap window and while arming (when
    /// configured); persisted gains afterwards. The window is a one-shot:
    /// it never re-opens however long the board runs.
    fn select_gains(&mut self) {
        let arming = self.objects.flight_status.get().armed == ArmedState::Arming;
        if !self.bootstrapped {
            if self.flight_time_s * 1000.0 < BOOTSTRAP_WINDOW_MS as f32 {
                self.force_bootstrap_gains();
                return;
            }
            self.bootstrapped = true;
            info!(bias = ?self.bias, "gyro bias bootstrap complete");
        }
        if self.settings.zero_during_arming && arming {
            self.force_bootstrap_gains();
            return;
        }
        if !self.gains_loaded {
            self.accel_kp = self.settings.accel_kp;
            self.accel_ki = self.settings.accel_ki;
            self.yaw_bias_rate = self.settings.yaw_bias_rate;
            self.gains_loaded = true;
        }
    }

    fn force_bootstrap_gains(&mut self) {
        self.accel_kp = BOOTSTRAP_ACCEL_KP;
        self.accel_ki = BOOTSTRAP_ACCEL_KI;
        self.yaw_bias_rate = BOOTSTRAP_YAW_BIAS_RATE;
        self.gains_loaded = false;
    }

    fn accumulate_trim(&mut self, accel_raw: Vector3) {
        if !self.trim.requested {
            return;
        }
        if self.trim.samples >= MAX_TRIM_FLIGHT_SAMPLES {
            self.trim.requested = false;
            return;
        }
        let status = self.objects.flight_status.get();
        let throttle = self.objects.manual_control.get().throttle;
        // Sample only airborne-ish: armed with positive throttle.
        if status.armed == ArmedState::Armed && throttle > 0.0 {
            self.trim.samples += 1;
            self.trim.accum += accel_raw;
        }
    }

    fn update_attitude(&mut self, gyro: Vector3, accel: Vector3, dt: f32) {
        // Rotate gravity into the body frame and cross with the accels.
        let grot = self.q.gravity_body();
        let accel_mag = accel.norm();
        let mut omega = gyro;
        if accel_mag > 1e-6 {
            let err = accel.cross(&grot) * (1.0 / accel_mag);
            // Integral goes to the bias estimate; Ki carries the 1/dt.
            self.bias.x += err.x * self.accel_ki;
            self.bias.y += err.y * self.accel_ki;
            // Proportional correction on the rate used for integration.
            omega += err * (self.accel_kp / dt);
        }

        let step_rad = omega.norm() * dt * core::f32::consts::PI / 180.0;
        if step_rad >= MAX_STEP_ANGLE_RAD || !omega.is_finite() {
            self.reset_attitude("rate step beyond integrable range");
            return;
        }

        // q̇ = ½ · q ⊗ (0, ω), Euler step in degrees-per-second units.
        let omega_q = Quaternion::new(0.0, omega.x, omega.y, omega.z);
        let qdot = self.q.mul(&omega_q);
        let k = dt * core::f32::consts::PI / 180.0 / 2.0;
        let q = Quaternion::new(
            self.q.w + qdot.w * k,
            self.q.x + qdot.x * k,
            self.q.y + qdot.y * k,
            self.q.z + qdot.z * k,
        )
        .canonicalized();

        let qmag = q.norm();
        if qmag < MIN_QUAT_NORM || !qmag.is_finite() {
            self.reset_attitude("quaternion norm collapsed");
            return;
        }
        self.q = q.normalized();

        if self.critical_pulse {
            self.critical_pulse = false;
        }
        self.alarms.set(AlarmSlot::Attitude, AlarmLevel::Ok);
        self.publish();
    }

    fn reset_attitude(&mut self, reason: &str) {
        error!(reason, "attitude estimate reset to identity");
        self.q = Quaternion::IDENTITY;
        self.critical_pulse = true;
        self.alarms.set(AlarmSlot::Attitude, AlarmLevel::Critical);
        self.publish();
    }

    fn publish(&self) {
        let rpy = self.q.to_rpy();
        self.objects.attitude_state.set(AttitudeState {
            q: self.q,
            roll: rpy[0],
            pitch: rpy[1],
            yaw: rpy[2],
        });
    }

    fn apply_settings(&mut self) {
        // Persisted bias is stored ×100 for resolution in the flash record.
        self.bias = Vector3::new(
            self.settings.gyro_bias[0] / 100.0,
            self.settings.gyro_bias[1] / 100.0,
            self.settings.gyro_bias[2] / 100.0,
        );
        self.gains_loaded = false;

        let rot = self.settings.board_rotation;
        if rot == [0.0; 3] {
            self.rotate = false;
            self.board_rotation = Rotation3::IDENTITY;
        } else {
            self.board_rotation = Quaternion::from_rpy(rot).to_rotation();
            self.rotate = true;
        }

        match self.settings.trim_flight {
            TrimFlight::Start => {
                self.trim = TrimState {
                    requested: true,
                    ..TrimState::default()
                };
                debug!("trim flight started");
            }
            TrimFlight::Load => {
                self.load_trim();
            }
            TrimFlight::Normal => {
                self.trim.requested = false;
            }
        }
    }

    /// Fold the trim-flight average into the accel bias and persist it.
    fn load_trim(&mut self) {
        self.trim.requested = false;
        if self.trim.samples == 0 {
            return;
        }
        let n = self.trim.samples as f32;
        let mut settings = self.settings;
        settings.accel_bias[0] = self.trim.accum.x / n;
        settings.accel_bias[1] = self.trim.accum.y / n;
        // z hangs on gravity: average reads -1 g, bias is the remainder.
        settings.accel_bias[2] =
            self.trim.accum.z / n + skylark_common::consts::GRAV / settings.accel_scale;
        settings.trim_flight = TrimFlight::Normal;
        info!(samples = self.trim.samples, "trim flight bias loaded");
        self.objects.settings.attitude.set(settings);
    }
}
