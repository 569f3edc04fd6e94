//! System-wide constants for the skylark workspace.
//!
//! Single source of truth for loop rates, timing windows and numeric
//! limits. Imported by all crates — no duplication permitted.

/// Control axes including thrust (roll, pitch, yaw, thrust).
pub const AXES: usize = 4;

/// Rotational axes only (roll, pitch, yaw).
pub const ROTATION_AXES: usize = 3;

static_assertions::const_assert!(AXES == ROTATION_AXES + 1);

/// Nominal gyro sample rate [Hz]. The inner loop runs at this rate.
pub const SENSOR_RATE_HZ: f32 = 400.0;

/// Nominal sensor update period [s].
pub const SENSOR_PERIOD_S: f32 = 1.0 / SENSOR_RATE_HZ;

/// Outer loop subsample factor: the outer loop runs every N gyro ticks.
pub const OUTER_LOOP_SKIP: u32 = 1;

/// Duration of the startup gyro-bias bootstrap window [ms].
pub const BOOTSTRAP_WINDOW_MS: u64 = 7000;

/// Forced complementary-filter gains during the bootstrap window.
pub const BOOTSTRAP_ACCEL_KP: f32 = 1.0;
pub const BOOTSTRAP_ACCEL_KI: f32 = 0.9;
pub const BOOTSTRAP_YAW_BIAS_RATE: f32 = 0.23;

/// Upper bound on trim-flight accelerometer samples.
pub const MAX_TRIM_FLIGHT_SAMPLES: u32 = 65_535;

/// Standard gravity [m/s²].
pub const GRAV: f32 = 9.81;

/// Number of flight-mode switch positions.
pub const FLIGHT_MODE_SLOTS: usize = 6;

/// Number of stabilization tuning banks.
pub const STABILIZATION_BANKS: usize = 3;

/// Number of accessory input channels.
pub const ACCESSORY_CHANNELS: usize = 4;

/// Number of actuator output channels.
pub const ACTUATOR_CHANNELS: usize = 8;

/// Receiver channel range [µs-like units].
pub const CHANNEL_MIN: u16 = 1000;
pub const CHANNEL_MAX: u16 = 2000;

/// Sentinel reported for every channel once the failsafe window expires.
/// Distinct from any valid channel reading.
pub const CHANNEL_TIMEOUT: u16 = u16::MAX;

/// Receiver failsafe window shared by the serial protocols [ms].
pub const RCVR_FAILSAFE_TIMEOUT_MS: u64 = 102; // 102.4 ms, integer tick

/// Stick arming threshold (fraction of full deflection).
pub const ARMED_THRESHOLD_STICK: f32 = 0.80;

/// Switch arming threshold (fraction of full deflection).
pub const ARMED_THRESHOLD_SWITCH: f32 = 0.20;

/// Low-throttle window for ground frames (absolute stick value).
pub const GROUND_LOW_THROTTLE: f32 = 0.01;

/// Minimum usable throttle/collective input range [raw units].
pub const MIN_THRUST_CHANNEL_RANGE: f32 = 300.0;

/// Rattitude stick position where attitude and rate authority cross over.
/// Root of x² + x − 1 = 0 in (0, 1).
pub const STICK_VALUE_AT_MODE_TRANSITION: f32 = 0.618_033_989;

/// Path follower idle reschedule period when the control chain is off [ms].
pub const PATHFOLLOWER_IDLE_PERIOD_MS: u32 = 100;

/// Scheduler worker maximum idle sleep [ms].
pub const SCHEDULER_MAX_SLEEP_MS: u64 = 1000;

/// Default configuration directory path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/skylark/config";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(SENSOR_RATE_HZ > 0.0);
        assert!(OUTER_LOOP_SKIP >= 1);
        assert!(CHANNEL_MIN < CHANNEL_MAX);
        assert!(CHANNEL_TIMEOUT > CHANNEL_MAX);
        assert!(ARMED_THRESHOLD_SWITCH < ARMED_THRESHOLD_STICK);
        assert!(STICK_VALUE_AT_MODE_TRANSITION > 0.0 && STICK_VALUE_AT_MODE_TRANSITION < 1.0);
    }
}
