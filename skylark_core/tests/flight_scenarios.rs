//! Regression scenarios across the whole control chain.
//!
//! Each test drives several modules together the way the scheduler would,
//! with literal values: bias bootstrap at 400 Hz, the quaternion reset
//! pulse, yaw-wrap through the outer loop, the DSM failsafe chain down to
//! the forced disarm, and integrator hygiene across mode transitions.

use std::sync::Arc;

use skylark_common::alarms::{AlarmLevel, AlarmSlot};
use skylark_common::consts::{GRAV, SENSOR_PERIOD_S};
use skylark_common::math::{Quaternion, Vector3};
use skylark_common::objects::{
    ArmedState, AttitudeState, FlightMode, FlightStatus, ManualControlCommand,
    StabilizationDesired, StabilizationMode,
};

use skylark_core::alarms::Alarms;
use skylark_core::estimator::AttitudeEstimator;
use skylark_core::manual::ManualControl;
use skylark_core::objects::FlightObjects;
use skylark_core::sensors::{ImuQueue, ImuSample};
use skylark_core::stab::Stabilization;

use skylark_io::receiver::{DsmParser, RcReceiver, TIMEOUT};

fn imu_sample(gyro: Vector3, accel_ms2: Vector3, dt: f32) -> ImuSample {
    let lsb = 1.0 / (GRAV * 0.004);
    ImuSample {
        gyro,
        accel: accel_ms2 * lsb,
        dt,
    }
}

/// Scenario 1: boot with accel (0, 0, −9.81) and gyro (0.3, −0.2, 0.1)
/// deg/s steady. After 7 s of 400 Hz updates the bias integrator sits
/// within 0.05 of the negated rates.
#[test]
fn startup_bias_bootstrap() {
    let objects = FlightObjects::new_default();
    let queue = ImuQueue::new();
    let mut estimator = AttitudeEstimator::new(Arc::clone(&objects), queue.clone());

    let gyro = Vector3::new(0.3, -0.2, 0.1);
    let accel = Vector3::new(0.0, 0.0, -GRAV);
    for _ in 0..2800 {
        queue.push(imu_sample(gyro, accel, SENSOR_PERIOD_S));
        estimator.tick();
    }

    let bias = estimator.gyro_bias();
    let target = Vector3::new(-0.3, 0.2, -0.1);
    let err = (bias - target).norm();
    assert!(err < 0.05, "bias {bias:?}, error {err}");

    // The published rates are bias-corrected: they read near zero.
    let rates = objects.gyro_state.get();
    assert!(rates.x.abs() < 0.1 && rates.y.abs() < 0.1 && rates.z.abs() < 0.1);
}

/// Scenario 2: one tick of 1e6 deg/s on all axes with Δt = 0.01 resets
/// the quaternion to identity and pulses the attitude alarm Critical.
#[test]
fn quaternion_reset_pulses_critical() {
    let objects = FlightObjects::new_default();
    let queue = ImuQueue::new();
    let mut estimator = AttitudeEstimator::new(Arc::clone(&objects), queue.clone());
    let alarms = Alarms::new(objects.system_alarms.clone());

    queue.push(imu_sample(
        Vector3::new(1e6, 1e6, 1e6),
        Vector3::new(0.0, 0.0, -GRAV),
        0.01,
    ));
    estimator.tick();

    assert_eq!(objects.attitude_state.get().q, Quaternion::IDENTITY);
    assert_eq!(alarms.get(AlarmSlot::Attitude), AlarmLevel::Critical);

    // One good sample later the pulse is gone.
    queue.push(imu_sample(
        Vector3::ZERO,
        Vector3::new(0.0, 0.0, -GRAV),
        0.01,
    ));
    estimator.tick();
    assert_eq!(alarms.get(AlarmSlot::Attitude), AlarmLevel::Ok);
}

/// Scenario 3: desired yaw +179°, measured −179°: the outer loop error
/// resolves to −2°, not +358°.
#[test]
fn yaw_wrap_through_the_cascade() {
    let objects = FlightObjects::new_default();
    let mut stab = Stabilization::new(Arc::clone(&objects));

    objects.attitude_state.set(AttitudeState {
        yaw: -179.0,
        ..Default::default()
    });
    objects.stabilization_desired.set(StabilizationDesired {
        axis: [0.0, 0.0, 179.0, 0.0],
        mode: [StabilizationMode::Attitude; 4],
    });
    stab.gyro_tick(SENSOR_PERIOD_S);

    let rate = objects.rate_desired.get();
    let kp = objects.stabilization_bank.get().yaw_pi.kp;
    assert!(
        (rate.axis[2] - -2.0 * kp).abs() < 0.1,
        "yaw rate target {}",
        rate.axis[2]
    );
}

/// Scenario 4: stop delivering DSM frames. Past 102.4 ms every channel
/// reads the sentinel; with the receiver alarm Critical an armed craft
/// disarms within one arming tick.
#[test]
fn dsm_failsafe_forces_disarm() {
    // Receiver side: one good frame, then silence.
    let mut dsm = DsmParser::new();
    let mut frame = [0xffu8; 16];
    frame[0] = 0;
    frame[1] = 0xb2;
    let word: u16 = 1024; // channel 0 mid-stick
    frame[2] = (word >> 8) as u8;
    frame[3] = word as u8;
    for _ in 0..3 {
        dsm.supervisor_tick();
    }
    for b in frame {
        dsm.push_byte(b);
    }
    assert_eq!(dsm.read(0), 1500);

    // 65 supervisor ticks at 625 Hz ≈ 104 ms of silence.
    for _ in 0..65 {
        dsm.supervisor_tick();
    }
    assert_eq!(dsm.read(0), TIMEOUT);

    // Flight side: armed via a yaw-left gesture over a live link.
    let objects = FlightObjects::new_default();
    let mut fm = objects.settings.flight_modes.get();
    fm.arming = skylark_common::objects::ArmingSource::YawLeft;
    objects.settings.flight_modes.set(fm);
    objects.flight_status.set(FlightStatus {
        flight_mode: FlightMode::Stabilized1,
        ..Default::default()
    });
    let mut manual = ManualControl::new(Arc::clone(&objects));

    objects.manual_control.set(ManualControlCommand {
        yaw: -1.0,
        throttle: -1.0,
        connected: true,
        ..Default::default()
    });
    let mut now = 0;
    for _ in 0..60 {
        now += 20;
        manual.tick(now);
    }
    assert_eq!(objects.flight_status.get().armed, ArmedState::Armed);

    // The receiver layer reports the lost link.
    objects.manual_control.set(ManualControlCommand {
        connected: false,
        throttle: -1.0,
        ..Default::default()
    });
    manual.tick(now + 20);
    assert_eq!(objects.flight_status.get().armed, ArmedState::Disarmed);
}

/// Scenario 5 lives with the DShot encoder tests; scenario 6 with the
/// sanity check. Property 5: a mode change on one axis zeroes that PID
/// integrator for the first post-transition sample, observed through the
/// full cascade as no carried-over integral push.
#[test]
fn mode_transition_resets_the_axis_integrator() {
    let objects = FlightObjects::new_default();
    objects.flight_status.set(FlightStatus {
        armed: ArmedState::Armed,
        ..Default::default()
    });
    objects.manual_control.set(ManualControlCommand {
        throttle: 0.5,
        ..Default::default()
    });
    let mut stab = Stabilization::new(Arc::clone(&objects));

    // Wind up the roll integrator in Rate mode.
    objects.stabilization_desired.set(StabilizationDesired {
        axis: [200.0, 0.0, 0.0, 0.5],
        mode: [
            StabilizationMode::Rate,
            StabilizationMode::Rate,
            StabilizationMode::Rate,
            StabilizationMode::Manual,
        ],
    });
    for _ in 0..400 {
        stab.gyro_tick(SENSOR_PERIOD_S);
    }
    let wound = objects.actuator_desired.get().roll;
    assert!(wound > 0.0);

    // Switch roll to Acro (a different inner-loop mode) with zero input:
    // the very first sample must carry no integral momentum.
    objects.stabilization_desired.set(StabilizationDesired {
        axis: [0.0, 0.0, 0.0, 0.5],
        mode: [
            StabilizationMode::Acro,
            StabilizationMode::Rate,
            StabilizationMode::Rate,
            StabilizationMode::Manual,
        ],
    });
    stab.gyro_tick(SENSOR_PERIOD_S);
    let after = objects.actuator_desired.get().roll;
    assert!(
        after.abs() < 0.02,
        "integral carried across transition: {after}"
    );
}

/// Whole-chain smoke: level IMU through estimator and cascade drives the
/// mixer to spin all motors evenly when armed.
#[test]
fn level_hover_chain_end_to_end() {
    let objects = FlightObjects::new_default();
    let queue = ImuQueue::new();
    let mut estimator = AttitudeEstimator::new(Arc::clone(&objects), queue.clone());
    let mut stab = Stabilization::new(Arc::clone(&objects));
    let mut mixer = skylark_core::actuator::ActuatorMixer::new(Arc::clone(&objects));

    objects.flight_status.set(FlightStatus {
        armed: ArmedState::Armed,
        ..Default::default()
    });
    objects.manual_control.set(ManualControlCommand {
        throttle: 0.5,
        ..Default::default()
    });
    objects.stabilization_desired.set(StabilizationDesired {
        axis: [0.0, 0.0, 0.0, 0.5],
        mode: [
            StabilizationMode::Attitude,
            StabilizationMode::Attitude,
            StabilizationMode::AxisLock,
            StabilizationMode::Manual,
        ],
    });

    for _ in 0..800 {
        queue.push(imu_sample(
            Vector3::ZERO,
            Vector3::new(0.0, 0.0, -GRAV),
            SENSOR_PERIOD_S,
        ));
        estimator.tick();
        stab.gyro_tick(SENSOR_PERIOD_S);
        mixer.tick();
    }

    let cmd = objects.actuator_command.get();
    // All four motors near half throttle, spread tight.
    for ch in 0..4 {
        assert!(
            cmd.channel[ch] > 1350 && cmd.channel[ch] < 1650,
            "channel {ch} = {}",
            cmd.channel[ch]
        );
    }
    let spread = cmd.channel[..4].iter().max().unwrap() - cmd.channel[..4].iter().min().unwrap();
    assert!(spread < 60, "motor spread {spread}");

    // And the attitude stayed put.
    let att = objects.attitude_state.get();
    assert!(att.roll.abs() < 1.0 && att.pitch.abs() < 1.0);
}
