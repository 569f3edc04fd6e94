//! Arming state machine.
//!
//! Interprets stick gestures or accessory switches into the
//! `Disarmed → ArmingManual → Armed → Disarming* → Disarmed` sequence,
//! gated on low throttle and on the pre-arm sanity check. Forced disarm
//! (guidance or receiver critical) overrides everything.

mod sanity;

pub use sanity::{CustomHook, SanityCheck};

use std::sync::Arc;

use skylark_common::alarms::{AlarmLevel, AlarmSlot};
use skylark_common::consts::{ARMED_THRESHOLD_STICK, ARMED_THRESHOLD_SWITCH, GROUND_LOW_THROTTLE};
use skylark_common::objects::{
    ArmedState, ArmingSource, FlightMode, FrameClass, StabilizationMode,
};
use tracing::{info, warn};

use crate::alarms::Alarms;
use crate::objects::FlightObjects;

/// Internal arming state; richer than the published [`ArmedState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmState {
    Disarmed,
    ArmingManual,
    Armed,
    DisarmingManual,
    DisarmingTimeout,
}

pub struct ArmHandler {
    objects: Arc<FlightObjects>,
    alarms: Alarms,
    sanity: SanityCheck,
    state: ArmState,
    /// Tick when the current gesture phase started [ms].
    phase_start_ms: u64,
    previous_arming_source: Option<ArmingSource>,
    previous_input_level: f32,
}

impl ArmHandler {
    pub fn new(objects: Arc<FlightObjects>) -> Self {
        let alarms = Alarms::new(objects.system_alarms.clone());
        let sanity = SanityCheck::new(Arc::clone(&objects));
        let mut handler = Self {
            objects,
            alarms,
            sanity,
            state: ArmState::Disarmed,
            phase_start_ms: 0,
            previous_arming_source: None,
            previous_input_level: 0.0,
        };
        handler.publish(ArmedState::Disarmed);
        handler
    }

    pub fn state(&self) -> ArmState {
        self.state
    }

    pub fn sanity_mut(&mut self) -> &mut SanityCheck {
        &mut self.sanity
    }

    /// One periodic arming evaluation at `now_ms`.
    pub fn tick(&mut self, now_ms: u64) {
        let settings = self.objects.settings.flight_modes.get();
        let cmd = self.objects.manual_control.get();
        let frame = self.objects.settings.system.get().airframe.class();

        let mut low_throttle = cmd.throttle < 0.0;
        if frame == FrameClass::Ground {
            // Ground frames drive in both directions; "low" means near zero.
            low_throttle = cmd.throttle.abs() < GROUND_LOW_THROTTLE;
        }

        // Switch arming reads its accessory channel.
        let arm_switch = settings.arming.accessory_channel().is_some();
        let accessory = settings
            .arming
            .accessory_channel()
            .and_then(|ch| self.objects.accessory_desired.instance_get(ch).ok())
            .map(|a| a.value)
            .unwrap_or(0.0);
        if arm_switch && accessory <= -ARMED_THRESHOLD_SWITCH {
            // Switch thrown to disarm acts like an immediate low throttle.
            low_throttle = true;
        }

        if self.forced_disarm() {
            if self.state != ArmState::Disarmed {
                warn!("forced disarm");
            }
            self.state = ArmState::Disarmed;
            self.publish(ArmedState::Disarmed);
            return;
        }

        if settings.arming == ArmingSource::AlwaysDisarmed {
            self.state = ArmState::Disarmed;
            self.publish(ArmedState::Disarmed);
            return;
        }

        // Throttle came up mid-sequence: abort toward the nearest stable
        // state, and do not evaluate gestures this tick.
        if !low_throttle {
            match self.state {
                ArmState::DisarmingManual | ArmState::DisarmingTimeout => {
                    self.state = ArmState::Armed;
                }
                ArmState::ArmingManual => {
                    self.state = ArmState::Disarmed;
                }
                _ => {}
            }
            return;
        }

        if settings.arming == ArmingSource::AlwaysArmed {
            self.state = ArmState::Armed;
            self.publish(ArmedState::Armed);
            return;
        }

        // Gesture input level: positive drives toward disarm, negative
        // toward arm (sticks held into the configured corner).
        let input_level = match settings.arming {
            ArmingSource::RollLeft => cmd.roll,
            ArmingSource::RollRight => -cmd.roll,
            ArmingSource::PitchForward => cmd.pitch,
            ArmingSource::PitchAft => -cmd.pitch,
            ArmingSource::YawLeft => cmd.yaw,
            ArmingSource::YawRight => -cmd.yaw,
            ArmingSource::Accessory0
            | ArmingSource::Accessory1
            | ArmingSource::Accessory2
            | ArmingSource::Accessory3 => -accessory,
            _ => 0.0,
        };

        if self.previous_arming_source != Some(settings.arming) {
            self.previous_arming_source = Some(settings.arming);
            self.previous_input_level = 0.0;
        }
        // Mid-sequence the edge detector rebases: only the fully armed or
        // fully disarmed states carry hysteresis history.
        if self.state != ArmState::Disarmed && self.state != ArmState::Armed {
            self.previous_input_level = 0.0;
        }

        let threshold = if arm_switch {
            ARMED_THRESHOLD_SWITCH
        } else {
            ARMED_THRESHOLD_STICK
        };
        // An edge requires the previous sample on the other side.
        let manual_arm =
            input_level <= -threshold && self.previous_input_level > -threshold;
        let manual_disarm =
            input_level >= threshold && self.previous_input_level < threshold;
        self.previous_input_level = input_level;

        match self.state {
            ArmState::Disarmed => {
                self.publish(ArmedState::Disarmed);
                if manual_arm && self.ok_to_arm() {
                    self.phase_start_ms = now_ms;
                    self.state = ArmState::ArmingManual;
                }
            }
            ArmState::ArmingManual => {
                self.publish(ArmedState::Arming);
                let held = input_level <= -threshold;
                if held
                    && now_ms - self.phase_start_ms > u64::from(settings.arming_sequence_time_ms)
                {
                    self.state = ArmState::Armed;
                    info!("armed");
                } else if !held {
                    self.state = ArmState::Disarmed;
                }
            }
            ArmState::Armed => {
                // Throttle is low here; the inactivity timeout starts.
                self.phase_start_ms = now_ms;
                self.state = ArmState::DisarmingTimeout;
                self.publish(ArmedState::Armed);
            }
            ArmState::DisarmingTimeout => {
                // The timeout never fires while the autopilot chain flies
                // the craft.
                if self.objects.flight_status.get().control_chain.path_follower {
                    self.phase_start_ms = now_ms;
                }
                if settings.armed_timeout_ms != 0
                    && now_ms - self.phase_start_ms > u64::from(settings.armed_timeout_ms)
                {
                    self.state = ArmState::Disarmed;
                    info!("disarmed by timeout");
                }
                if manual_disarm {
                    self.phase_start_ms = now_ms;
                    self.state = ArmState::DisarmingManual;
                }
            }
            ArmState::DisarmingManual => {
                let held = input_level >= threshold;
                if held
                    && now_ms - self.phase_start_ms
                        > u64::from(settings.disarming_sequence_time_ms)
                {
                    self.state = ArmState::Disarmed;
                    info!("disarmed");
                } else if !held {
                    self.state = ArmState::Armed;
                }
            }
        }
    }

    /// Arming gate: sanity check, alarm scan, and mode-specific refusals.
    fn ok_to_arm(&self) -> bool {
        self.sanity.configuration_check();

        let alarms = self.alarms.snapshot();
        if alarms.blocks_arming() {
            return false;
        }

        let flight_status = self.objects.flight_status.get();
        let desired = self.objects.stabilization_desired.get();
        match flight_status.flight_mode {
            FlightMode::Manual
            | FlightMode::Stabilized1
            | FlightMode::Stabilized2
            | FlightMode::Stabilized3
            | FlightMode::Stabilized4
            | FlightMode::Stabilized5
            | FlightMode::Stabilized6 => {
                // An auto-thrust mode would launch the moment it engages.
                if matches!(
                    desired.mode[3],
                    StabilizationMode::AltitudeHold | StabilizationMode::AltitudeVario
                ) {
                    return false;
                }
                if flight_status.flight_mode_assist
                    == skylark_common::objects::FlightModeAssist::GpsAssist
                {
                    return false;
                }
                if flight_status.always_stabilize_when_armed {
                    return false;
                }
                true
            }
            FlightMode::AutoTakeoff | FlightMode::PathPlanner => {
                !flight_status.always_stabilize_when_armed
            }
            _ => false,
        }
    }

    /// Guidance or receiver critical forces the disarm.
    fn forced_disarm(&self) -> bool {
        self.alarms.get(AlarmSlot::Guidance) == AlarmLevel::Critical
            || self.alarms.get(AlarmSlot::Receiver) == AlarmLevel::Critical
    }

    fn publish(&self, armed: ArmedState) {
        let mut status = self.objects.flight_status.get();
        if status.armed != armed {
            status.armed = armed;
            self.objects.flight_status.set(status);
        }
    }
}
