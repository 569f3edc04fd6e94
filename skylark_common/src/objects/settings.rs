//! Settings records: everything the operator tunes and the flash store
//! persists. All of these deserialize directly from the TOML configuration.

use serde::{Deserialize, Serialize};

use crate::consts::{ACTUATOR_CHANNELS, FLIGHT_MODE_SLOTS, ROTATION_AXES};
use crate::math::PidGains;
use crate::objects::command::{FlightMode, FlightModeAssist, StabilizationMode};

// ─── Attitude estimator ─────────────────────────────────────────────

/// Trim-flight acquisition state requested through settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrimFlight {
    #[default]
    Normal,
    Start,
    Load,
}

/// Complementary-filter tuning and calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttitudeSettings {
    /// Proportional gain pulling the attitude toward the accel gravity vector.
    pub accel_kp: f32,
    /// Integral gain feeding the gyro bias estimate.
    pub accel_ki: f32,
    /// Weak zero-mean pull on the yaw gyro bias.
    pub yaw_bias_rate: f32,
    /// Accelerometer bias [raw LSB].
    pub accel_bias: [f32; 3],
    /// Accelerometer scale [m/s² per LSB].
    pub accel_scale: f32,
    /// Persisted gyro bias [deg/s · 100].
    pub gyro_bias: [f32; 3],
    /// Board-mount rotation, roll/pitch/yaw [deg]; all-zero disables.
    pub board_rotation: [f32; 3],
    /// Re-run the bias bootstrap while the arming gesture is held.
    pub zero_during_arming: bool,
    /// Publish bias-corrected rates on the gyro record.
    pub bias_correct_gyro: bool,
    pub trim_flight: TrimFlight,
}

impl Default for AttitudeSettings {
    fn default() -> Self {
        Self {
            accel_kp: 0.05,
            accel_ki: 0.0001,
            yaw_bias_rate: 0.000001,
            accel_bias: [0.0; 3],
            accel_scale: crate::consts::GRAV * 0.004,
            gyro_bias: [0.0; 3],
            board_rotation: [0.0; 3],
            zero_during_arming: false,
            bias_correct_gyro: true,
            trim_flight: TrimFlight::Normal,
        }
    }
}

// ─── Stabilization ──────────────────────────────────────────────────

/// One of the three selectable tuning banks: all six axis PIDs plus the
/// angle/rate envelopes and feed-forward time constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizationBank {
    pub roll_rate_pid: PidGains,
    pub pitch_rate_pid: PidGains,
    pub yaw_rate_pid: PidGains,
    pub roll_pi: PidGains,
    pub pitch_pi: PidGains,
    pub yaw_pi: PidGains,
    /// Attitude envelope [deg] per rotational axis.
    pub roll_max: f32,
    pub pitch_max: f32,
    pub yaw_max: f32,
    /// Full-stick rate in Rate-style modes [deg/s].
    pub manual_rate: [f32; ROTATION_AXES],
    /// Hard rate limit applied to inner-loop setpoints [deg/s]; 0 = none.
    pub maximum_rate: [f32; ROTATION_AXES],
    /// Attitude feed-forward time constants [s·10] per axis.
    pub attitude_feed_forward: [f32; ROTATION_AXES],
    /// Acro+ blending factor per axis [%].
    pub acro_insanity_factor: [f32; ROTATION_AXES],
}

impl Default for StabilizationBank {
    fn default() -> Self {
        let rate = PidGains {
            kp: 0.003,
            ki: 0.0065,
            kd: 0.00003,
            ilim: 0.3,
        };
        let att = PidGains {
            kp: 2.5,
            ki: 0.0,
            kd: 0.0,
            ilim: 50.0,
        };
        Self {
            roll_rate_pid: rate,
            pitch_rate_pid: rate,
            yaw_rate_pid: rate,
            roll_pi: att,
            pitch_pi: att,
            yaw_pi: att,
            roll_max: 55.0,
            pitch_max: 55.0,
            yaw_max: 180.0,
            manual_rate: [220.0, 220.0, 220.0],
            maximum_rate: [300.0, 300.0, 300.0],
            attitude_feed_forward: [0.0; ROTATION_AXES],
            acro_insanity_factor: [40.0, 40.0, 40.0],
        }
    }
}

/// Altitude-hold / vario loop tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AltitudeLoopSettings {
    /// Altitude error to climb-rate gain.
    pub kp: f32,
    /// Climb-rate PI.
    pub velocity_kp: f32,
    pub velocity_ki: f32,
    /// Climb-rate envelope [m/s].
    pub max_climb_rate: f32,
    /// Vario mode full-stick climb rate [m/s].
    pub vario_rate: f32,
}

impl Default for AltitudeLoopSettings {
    fn default() -> Self {
        Self {
            kp: 1.0,
            velocity_kp: 0.3,
            velocity_ki: 0.4,
            max_climb_rate: 5.0,
            vario_rate: 2.0,
        }
    }
}

/// Cruise-control thrust compensation tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CruiseControlSettings {
    /// Thrust window the compensation may command [0, 1].
    pub min_thrust: f32,
    pub max_thrust: f32,
    /// Bank angle beyond which compensation stops growing [deg].
    pub max_angle: f32,
    /// Upper clamp on the 1/cos power factor.
    pub max_power_factor: f32,
    /// Operator trim on the compensated power [%/100].
    pub power_trim: f32,
}

impl Default for CruiseControlSettings {
    fn default() -> Self {
        Self {
            min_thrust: 0.05,
            max_thrust: 0.9,
            max_angle: 105.0,
            max_power_factor: 3.0,
            power_trim: 1.0,
        }
    }
}

/// Global stabilization settings shared by all banks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizationSettings {
    /// Derivative low-pass cutoff [Hz].
    pub derivative_cutoff: f32,
    /// Derivative-on-measurement gamma.
    pub derivative_gamma: f32,
    /// Gyro feed-forward filter time constant [s].
    pub gyro_tau: f32,
    pub weak_leveling_kp: f32,
    /// Correction-rate bound in WeakLeveling [deg/s].
    pub max_weak_leveling_rate: f32,
    /// Zero all integrators while armed with throttle low.
    pub low_throttle_zero_integral: bool,
    /// Rattitude stick position [%] where the mode crossover lands.
    pub rattitude_mode_transition: u8,
    /// AxisLock heading-hold gain and envelopes.
    pub axis_lock_kp: f32,
    /// Maximum heading-target lead [deg].
    pub max_axis_lock: f32,
    /// Stick rate below which the heading hold engages [deg/s].
    pub max_axis_lock_rate: f32,
    /// Virtual flybar decay and per-axis sensitivity.
    pub vbar_tau: f32,
    pub vbar_sensitivity: [f32; ROTATION_AXES],
    /// System-ident excitation amplitude [deg/s] and period [ms].
    pub system_ident_amplitude: f32,
    pub system_ident_period_ms: u32,
    pub altitude: AltitudeLoopSettings,
    pub cruise_control: CruiseControlSettings,
    /// Bank selected per flight-mode slot (0-based bank index).
    pub flight_mode_map: [u8; FLIGHT_MODE_SLOTS],
    /// GPS-assist overlay per flight-mode slot.
    pub flight_mode_assist_map: [FlightModeAssist; FLIGHT_MODE_SLOTS],
}

impl Default for StabilizationSettings {
    fn default() -> Self {
        Self {
            derivative_cutoff: 20.0,
            derivative_gamma: 1.0,
            gyro_tau: 0.005,
            weak_leveling_kp: 0.1,
            max_weak_leveling_rate: 5.0,
            low_throttle_zero_integral: true,
            rattitude_mode_transition: 80,
            axis_lock_kp: 2.5,
            max_axis_lock: 30.0,
            max_axis_lock_rate: 2.0,
            vbar_tau: 0.5,
            vbar_sensitivity: [1.0, 1.0, 1.0],
            system_ident_amplitude: 60.0,
            system_ident_period_ms: 250,
            altitude: AltitudeLoopSettings::default(),
            cruise_control: CruiseControlSettings::default(),
            flight_mode_map: [0; FLIGHT_MODE_SLOTS],
            flight_mode_assist_map: [FlightModeAssist::None; FLIGHT_MODE_SLOTS],
        }
    }
}

// ─── Flight modes & arming ──────────────────────────────────────────

/// Where the arming command comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ArmingSource {
    #[default]
    AlwaysDisarmed,
    AlwaysArmed,
    RollLeft,
    RollRight,
    PitchForward,
    PitchAft,
    YawLeft,
    YawRight,
    Accessory0,
    Accessory1,
    Accessory2,
    Accessory3,
}

impl ArmingSource {
    /// Accessory channel index for switch arming sources.
    pub fn accessory_channel(self) -> Option<usize> {
        match self {
            ArmingSource::Accessory0 => Some(0),
            ArmingSource::Accessory1 => Some(1),
            ArmingSource::Accessory2 => Some(2),
            ArmingSource::Accessory3 => Some(3),
            _ => None,
        }
    }
}

/// Flight-mode switch slots and the arming configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightModeSettings {
    pub arming: ArmingSource,
    /// Gesture hold time before arming completes [ms].
    pub arming_sequence_time_ms: u32,
    /// Gesture hold time before disarming completes [ms].
    pub disarming_sequence_time_ms: u32,
    /// Inactivity disarm timeout [ms]; 0 disables.
    pub armed_timeout_ms: u32,
    /// Flight mode selected per switch position.
    pub flight_mode_position: [FlightMode; FLIGHT_MODE_SLOTS],
    /// Per-axis stabilization modes for each Stabilized1..6 slot
    /// (roll, pitch, yaw, thrust).
    pub stabilization_settings: [[StabilizationMode; 4]; FLIGHT_MODE_SLOTS],
    /// Downgrade sanity-check failures to warnings.
    pub disable_sanity_checks: bool,
}

impl Default for FlightModeSettings {
    fn default() -> Self {
        Self {
            arming: ArmingSource::AlwaysDisarmed,
            arming_sequence_time_ms: 1000,
            disarming_sequence_time_ms: 1000,
            armed_timeout_ms: 30_000,
            flight_mode_position: [
                FlightMode::Stabilized1,
                FlightMode::Stabilized2,
                FlightMode::Stabilized3,
                FlightMode::Stabilized4,
                FlightMode::Stabilized5,
                FlightMode::Stabilized6,
            ],
            stabilization_settings: [[
                StabilizationMode::Attitude,
                StabilizationMode::Attitude,
                StabilizationMode::AxisLock,
                StabilizationMode::Manual,
            ]; FLIGHT_MODE_SLOTS],
            disable_sanity_checks: false,
        }
    }
}

// ─── System ─────────────────────────────────────────────────────────

/// Airframe configured on this board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AirframeType {
    #[default]
    QuadX,
    QuadP,
    Hexa,
    Octo,
    HeliCp,
    FixedWing,
    FixedWingElevon,
    FixedWingVtail,
    GroundCar,
    GroundDifferential,
    Custom,
}

/// Broad airframe class driving controller selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    Multirotor,
    Heli,
    FixedWing,
    Ground,
    Custom,
}

impl AirframeType {
    pub fn class(self) -> FrameClass {
        match self {
            AirframeType::QuadX | AirframeType::QuadP | AirframeType::Hexa | AirframeType::Octo => {
                FrameClass::Multirotor
            }
            AirframeType::HeliCp => FrameClass::Heli,
            AirframeType::FixedWing
            | AirframeType::FixedWingElevon
            | AirframeType::FixedWingVtail => FrameClass::FixedWing,
            AirframeType::GroundCar | AirframeType::GroundDifferential => FrameClass::Ground,
            AirframeType::Custom => FrameClass::Custom,
        }
    }
}

/// Board capability class. CopterControl-class boards have no barometer
/// and cannot run the altitude modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BoardClass {
    CopterControl,
    #[default]
    Revolution,
}

/// Which control axis carries thrust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThrustControl {
    #[default]
    Throttle,
    Collective,
    None,
}

/// Attitude estimator variant in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FusionAlgorithm {
    #[default]
    ComplementaryFilter,
    ComplementaryMagGpsOutdoor,
    GpsNavigationIns,
}

impl FusionAlgorithm {
    /// Whether this estimator can feed navigation (GPS-assist, autopilot).
    pub fn nav_capable(self) -> bool {
        matches!(
            self,
            FusionAlgorithm::ComplementaryMagGpsOutdoor | FusionAlgorithm::GpsNavigationIns
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub airframe: AirframeType,
    pub board_class: BoardClass,
    pub thrust_control: ThrustControl,
    pub fusion_algorithm: FusionAlgorithm,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            airframe: AirframeType::QuadX,
            board_class: BoardClass::Revolution,
            thrust_control: ThrustControl::Throttle,
            fusion_algorithm: FusionAlgorithm::ComplementaryFilter,
        }
    }
}

/// Receiver channel calibration relevant to the sanity check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManualControlSettings {
    /// Number of populated flight-mode switch positions.
    pub flight_mode_number: u8,
    pub throttle_min: f32,
    pub throttle_max: f32,
    pub collective_min: f32,
    pub collective_max: f32,
}

impl Default for ManualControlSettings {
    fn default() -> Self {
        Self {
            flight_mode_number: 3,
            throttle_min: 1000.0,
            throttle_max: 2000.0,
            collective_min: 1000.0,
            collective_max: 2000.0,
        }
    }
}

// ─── Path follower ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathFollowerSettings {
    /// Update periods per airframe class [ms].
    pub vtol_update_period_ms: u32,
    pub fixed_wing_update_period_ms: u32,
    pub ground_update_period_ms: u32,
    /// Horizontal position error to velocity gain.
    pub horizontal_pos_kp: f32,
    /// Horizontal velocity envelope [m/s].
    pub horizontal_vel_max: f32,
    /// Vertical position error to climb-rate gain.
    pub vertical_pos_kp: f32,
    pub vertical_vel_max: f32,
    /// Brake deceleration [m/s²] and give-up timeout [s].
    pub brake_rate: f32,
    pub brake_timeout: f32,
    /// Landing descent rate [m/s].
    pub land_rate: f32,
    /// Auto-takeoff climb target [m] and rate [m/s].
    pub takeoff_height: f32,
    pub takeoff_rate: f32,
    /// Bank limit commanded by the velocity-to-attitude stage [deg].
    pub max_roll_pitch: f32,
}

impl Default for PathFollowerSettings {
    fn default() -> Self {
        Self {
            vtol_update_period_ms: 20,
            fixed_wing_update_period_ms: 100,
            ground_update_period_ms: 100,
            horizontal_pos_kp: 0.25,
            horizontal_vel_max: 10.0,
            vertical_pos_kp: 0.4,
            vertical_vel_max: 5.0,
            brake_rate: 2.5,
            brake_timeout: 10.0,
            land_rate: 0.6,
            takeoff_height: 2.5,
            takeoff_rate: 0.6,
            max_roll_pitch: 25.0,
        }
    }
}

// ─── Actuators ──────────────────────────────────────────────────────

/// Output mode of one actuator bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BankMode {
    #[default]
    Pwm,
    SinglePulse,
    Dshot150,
    Dshot300,
    Dshot600,
}

/// One actuator bank: a group of channels sharing timer settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorBank {
    pub mode: BankMode,
    /// PWM refresh rate [Hz], 50–500.
    pub rate_hz: u16,
}

impl Default for ActuatorBank {
    fn default() -> Self {
        Self {
            mode: BankMode::Pwm,
            rate_hz: 400,
        }
    }
}

/// Actuator output configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorSettings {
    pub banks: [ActuatorBank; 2],
    /// Bank index per channel.
    pub channel_bank: [u8; ACTUATOR_CHANNELS],
    /// Channel pulse range and disarmed/neutral value [µs].
    pub channel_min: [u16; ACTUATOR_CHANNELS],
    pub channel_max: [u16; ACTUATOR_CHANNELS],
    pub channel_neutral: [u16; ACTUATOR_CHANNELS],
    /// Mixer matrix: contribution of (roll, pitch, yaw, thrust) per channel.
    pub mixer: [[f32; 4]; ACTUATOR_CHANNELS],
}

impl Default for ActuatorSettings {
    fn default() -> Self {
        // QuadX: motors on channels 0..4, props crossed.
        let mut mixer = [[0.0; 4]; ACTUATOR_CHANNELS];
        mixer[0] = [-1.0, 1.0, -1.0, 1.0]; // front left, CW
        mixer[1] = [1.0, 1.0, 1.0, 1.0]; // front right, CCW
        mixer[2] = [1.0, -1.0, -1.0, 1.0]; // rear right, CW
        mixer[3] = [-1.0, -1.0, 1.0, 1.0]; // rear left, CCW
        Self {
            banks: [ActuatorBank::default(); 2],
            channel_bank: [0; ACTUATOR_CHANNELS],
            channel_min: [1000; ACTUATOR_CHANNELS],
            channel_max: [2000; ACTUATOR_CHANNELS],
            channel_neutral: [1000; ACTUATOR_CHANNELS],
            mixer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn airframe_classes() {
        assert_eq!(AirframeType::QuadX.class(), FrameClass::Multirotor);
        assert_eq!(AirframeType::HeliCp.class(), FrameClass::Heli);
        assert_eq!(AirframeType::FixedWingElevon.class(), FrameClass::FixedWing);
        assert_eq!(AirframeType::GroundCar.class(), FrameClass::Ground);
    }

    #[test]
    fn default_bank_round_trips_through_toml() {
        let bank = StabilizationBank::default();
        let text = toml::to_string(&bank).unwrap();
        let back: StabilizationBank = toml::from_str(&text).unwrap();
        assert_eq!(bank, back);
    }

    #[test]
    fn nav_capability_classification() {
        assert!(!FusionAlgorithm::ComplementaryFilter.nav_capable());
        assert!(FusionAlgorithm::GpsNavigationIns.nav_capable());
    }
}
