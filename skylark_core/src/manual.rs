//! Manual control: flight-mode switch handling and stick-to-setpoint
//! translation, plus the arming handler it hosts.
//!
//! When the path follower owns the control chain the sticks stay out of
//! the stabilization setpoints; otherwise each axis maps according to the
//! per-axis mode of the selected flight-mode slot.

use std::sync::Arc;

use skylark_common::alarms::{AlarmLevel, AlarmSlot};
use skylark_common::consts::FLIGHT_MODE_SLOTS;
use skylark_common::math::boundf;
use skylark_common::objects::{
    ControlChain, FlightMode, StabilizationDesired, StabilizationMode,
};
use tracing::info;

use crate::alarms::Alarms;
use crate::arming::ArmHandler;
use crate::objects::FlightObjects;

pub struct ManualControl {
    objects: Arc<FlightObjects>,
    alarms: Alarms,
    arm: ArmHandler,
}

impl ManualControl {
    pub fn new(objects: Arc<FlightObjects>) -> Self {
        let arm = ArmHandler::new(Arc::clone(&objects));
        let alarms = Alarms::new(objects.system_alarms.clone());
        Self {
            objects,
            alarms,
            arm,
        }
    }

    pub fn arm_handler_mut(&mut self) -> &mut ArmHandler {
        &mut self.arm
    }

    /// Periodic manual-control evaluation.
    pub fn tick(&mut self, now_ms: u64) {
        let cmd = self.objects.manual_control.get();
        let settings = self.objects.settings.flight_modes.get();

        // Link state drives the receiver alarm; a lost link at Critical
        // forces the arm handler to disarm on this same tick.
        let receiver_level = if cmd.connected {
            AlarmLevel::Ok
        } else {
            AlarmLevel::Critical
        };
        self.alarms.set(AlarmSlot::Receiver, receiver_level);

        let pos = usize::from(cmd.flight_mode_switch_position).min(FLIGHT_MODE_SLOTS - 1);
        let mode = settings.flight_mode_position[pos];

        let mut status = self.objects.flight_status.get();
        if status.flight_mode != mode {
            status.flight_mode = mode;
            status.control_chain = control_chain_for(mode);
            info!(?mode, "flight mode changed");
            self.objects.flight_status.set(status);
        }

        if !status.control_chain.path_follower {
            self.write_stabilization_desired(mode);
        }

        self.arm.tick(now_ms);
    }

    /// Stick values into `StabilizationDesired` for the slot's modes.
    fn write_stabilization_desired(&self, mode: FlightMode) {
        let cmd = self.objects.manual_control.get();
        let settings = self.objects.settings.flight_modes.get();
        let bank = self.objects.stabilization_bank.get();

        let axis_modes = match mode {
            FlightMode::Manual => [StabilizationMode::Manual; 4],
            _ => match mode.stabilized_slot() {
                Some(slot) => settings.stabilization_settings[slot - 1],
                None => return,
            },
        };

        let sticks = [cmd.roll, cmd.pitch, cmd.yaw];
        let max_angle = [bank.roll_max, bank.pitch_max, bank.yaw_max];
        let mut axis = [0.0f32; 4];
        for t in 0..3 {
            axis[t] = match axis_modes[t] {
                StabilizationMode::Manual => sticks[t],
                StabilizationMode::Attitude
                | StabilizationMode::Rattitude
                | StabilizationMode::WeakLeveling => sticks[t] * max_angle[t],
                _ => sticks[t] * bank.manual_rate[t],
            };
        }
        // Thrust: sticks below idle command zero.
        axis[3] = boundf(cmd.throttle, 0.0, 1.0);

        self.objects.stabilization_desired.set(StabilizationDesired {
            axis,
            mode: axis_modes,
        });
    }
}

/// Which chain stages a flight mode engages.
fn control_chain_for(mode: FlightMode) -> ControlChain {
    match mode {
        FlightMode::Manual => ControlChain {
            stabilization: true,
            path_follower: false,
            path_planner: false,
        },
        FlightMode::PositionHold
        | FlightMode::VelocityRoam
        | FlightMode::Land
        | FlightMode::AutoTakeoff
        | FlightMode::ReturnToBase => ControlChain {
            stabilization: true,
            path_follower: true,
            path_planner: false,
        },
        FlightMode::PathPlanner => ControlChain {
            stabilization: true,
            path_follower: true,
            path_planner: true,
        },
        _ => ControlChain {
            stabilization: true,
            path_follower: false,
            path_planner: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylark_common::objects::ManualControlCommand;

    #[test]
    fn switch_position_selects_mode_and_chain() {
        let objects = FlightObjects::new_default();
        let mut fm = objects.settings.flight_modes.get();
        fm.flight_mode_position[2] = FlightMode::PositionHold;
        objects.settings.flight_modes.set(fm);

        let mut mc = ManualControl::new(Arc::clone(&objects));
        objects.manual_control.set(ManualControlCommand {
            flight_mode_switch_position: 2,
            ..Default::default()
        });
        mc.tick(20);
        let status = objects.flight_status.get();
        assert_eq!(status.flight_mode, FlightMode::PositionHold);
        assert!(status.control_chain.path_follower);
    }

    #[test]
    fn attitude_slot_scales_sticks_to_angles() {
        let objects = FlightObjects::new_default();
        let mut mc = ManualControl::new(Arc::clone(&objects));
        objects.manual_control.set(ManualControlCommand {
            roll: 0.5,
            throttle: 0.3,
            ..Default::default() // slot 0 → Stabilized1: Attitude roll
        });
        mc.tick(20);
        let sd = objects.stabilization_desired.get();
        let bank = objects.stabilization_bank.get();
        assert!((sd.axis[0] - 0.5 * bank.roll_max).abs() < 1e-4);
        assert_eq!(sd.mode[0], StabilizationMode::Attitude);
        assert_eq!(sd.axis[3], 0.3);
    }

    #[test]
    fn negative_throttle_commands_zero_thrust() {
        let objects = FlightObjects::new_default();
        let mut mc = ManualControl::new(Arc::clone(&objects));
        objects.manual_control.set(ManualControlCommand {
            throttle: -1.0,
            ..Default::default()
        });
        mc.tick(20);
        assert_eq!(objects.stabilization_desired.get().axis[3], 0.0);
    }
}
