//! Command-side records: pilot input, loop setpoints, actuator outputs,
//! flight and path status.

use serde::{Deserialize, Serialize};

use crate::consts::{ACTUATOR_CHANNELS, AXES};

// ─── Pilot input ────────────────────────────────────────────────────

/// Scaled manual control input, sticks in [−1, 1], throttle in [−1, 1]
/// with negative meaning "below idle".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ManualControlCommand {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub throttle: f32,
    pub collective: f32,
    /// Selected flight-mode switch position (0-based).
    pub flight_mode_switch_position: u8,
    /// Receiver link considered healthy.
    pub connected: bool,
}

/// One accessory channel value in [−1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AccessoryDesired {
    pub value: f32,
}

// ─── Stabilization setpoints ────────────────────────────────────────

/// Per-axis stabilization mode, as configured per flight-mode slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StabilizationMode {
    #[default]
    Manual,
    Rate,
    Attitude,
    AxisLock,
    WeakLeveling,
    VirtualBar,
    Acro,
    Rattitude,
    RateTrainer,
    AltitudeHold,
    AltitudeVario,
    CruiseControl,
    SystemIdent,
}

/// What the stabilization cascade should achieve, written by manual
/// control or by the path follower.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StabilizationDesired {
    /// Desired roll/pitch/yaw (angle or rate depending on mode) and thrust.
    pub axis: [f32; AXES],
    /// Per-axis stabilization mode; index 3 is the thrust mode.
    pub mode: [StabilizationMode; AXES],
}

/// Outer-loop operating mode per axis, derived from [`StabilizationMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OuterLoopMode {
    #[default]
    Direct,
    DirectWithLimits,
    Attitude,
    Rattitude,
    WeakLeveling,
    Altitude,
    AltitudeVario,
}

/// Inner-loop operating mode per axis, derived from [`StabilizationMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InnerLoopMode {
    #[default]
    Direct,
    Rate,
    AxisLock,
    VirtualFlybar,
    Acro,
    CruiseControl,
    SystemIdent,
}

/// The derived (outer, inner) mode matrix the loops actually run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StabilizationStatus {
    pub outer: [OuterLoopMode; AXES],
    pub inner: [InnerLoopMode; AXES],
}

/// Rate targets produced by the outer loop [deg/s], thrust in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateDesired {
    pub axis: [f32; AXES],
}

/// Normalized actuator demand from the inner loop: roll/pitch/yaw in
/// [−1, 1], thrust in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ActuatorDesired {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub thrust: f32,
}

/// Raw channel commands clocked out by the mixer [µs-like units].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorCommand {
    pub channel: [u16; ACTUATOR_CHANNELS],
}

impl Default for ActuatorCommand {
    fn default() -> Self {
        Self {
            channel: [1000; ACTUATOR_CHANNELS],
        }
    }
}

// ─── Flight status ──────────────────────────────────────────────────

/// Arming state as published to the rest of the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArmedState {
    #[default]
    Disarmed,
    Arming,
    Armed,
}

/// Flight mode as selected by the mode switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlightMode {
    #[default]
    Manual,
    Stabilized1,
    Stabilized2,
    Stabilized3,
    Stabilized4,
    Stabilized5,
    Stabilized6,
    PositionHold,
    VelocityRoam,
    Land,
    AutoTakeoff,
    PathPlanner,
    ReturnToBase,
    AutoTune,
}

impl FlightMode {
    /// Index of the stabilized slot (1..=6), if this is one.
    pub fn stabilized_slot(self) -> Option<usize> {
        match self {
            FlightMode::Stabilized1 => Some(1),
            FlightMode::Stabilized2 => Some(2),
            FlightMode::Stabilized3 => Some(3),
            FlightMode::Stabilized4 => Some(4),
            FlightMode::Stabilized5 => Some(5),
            FlightMode::Stabilized6 => Some(6),
            _ => None,
        }
    }
}

/// GPS-assist overlay on a manual flight mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlightModeAssist {
    #[default]
    None,
    GpsAssist,
}

/// Which parts of the control chain are engaged for the current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlChain {
    pub stabilization: bool,
    pub path_follower: bool,
    pub path_planner: bool,
}

/// The system flight status record.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FlightStatus {
    pub armed: ArmedState,
    pub flight_mode: FlightMode,
    pub flight_mode_assist: FlightModeAssist,
    pub always_stabilize_when_armed: bool,
    pub control_chain: ControlChain,
}

// ─── Path descriptors ───────────────────────────────────────────────

/// Autopilot path mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathMode {
    #[default]
    GotoEndpoint,
    FollowVector,
    CircleRight,
    CircleLeft,
    FixedAttitude,
    Brake,
    Velocity,
    Land,
    AutoTakeoff,
    DisarmAlarm,
}

/// The commanded path segment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PathDesired {
    pub mode: PathMode,
    /// Segment start, NED [m].
    pub start: [f32; 3],
    /// Segment end / target, NED [m].
    pub end: [f32; 3],
    /// Mode-specific parameters (velocity, radius, attitude quad, …).
    pub mode_parameters: [f32; 4],
    /// Identifies the waypoint; echoed into [`PathStatus`].
    pub uid: u16,
}

/// Progress of the active path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathStatusKind {
    #[default]
    InProgress,
    Completed,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PathStatus {
    pub uid: u16,
    pub status: PathStatusKind,
    pub fractional_progress: f32,
    pub error: f32,
}

/// Velocity setpoint produced by the path controllers, NED [m/s].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityDesired {
    pub north: f32,
    pub east: f32,
    pub down: f32,
}
