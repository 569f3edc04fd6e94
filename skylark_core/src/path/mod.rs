//! Path follower dispatcher.
//!
//! A single periodic callback that selects one mode controller by
//! `(airframe class, path mode)` and delegates the stabilization setpoint
//! to it. The dispatcher owns every controller in an arena indexed by
//! [`ControllerId`]; controllers get the shared object bus and settings as
//! arguments, never a back-pointer.

mod fixedwing;
mod ground;
mod vtol;

pub use fixedwing::{FixedWingFlyController, FixedWingLandController, FixedWingTakeoffController};
pub use ground::GroundDriveController;
pub use vtol::{
    AutoTakeoffController, BrakeController, FlyController, LandController, VelocityController,
};

use std::sync::Arc;

use skylark_common::alarms::{AlarmLevel, AlarmSlot};
use skylark_common::consts::PATHFOLLOWER_IDLE_PERIOD_MS;
use skylark_common::objects::{
    FrameClass, PathDesired, PathFollowerSettings, PathMode, PathStatus, PathStatusKind,
    StabilizationDesired, StabilizationMode,
};
use tracing::{debug, info};

use crate::alarms::Alarms;
use crate::objects::FlightObjects;

/// Everything a controller may touch during a tick.
pub struct ControlContext<'a> {
    pub objects: &'a Arc<FlightObjects>,
    pub settings: &'a PathFollowerSettings,
    pub path: &'a PathDesired,
    pub dt: f32,
}

/// One autopilot mode controller.
pub trait PathController: Send {
    /// Arm internal state for a fresh engagement.
    fn activate(&mut self, ctx: &ControlContext<'_>);
    /// Drop any held state; the controller is leaving duty.
    fn deactivate(&mut self);
    /// The path segment changed under the same mode.
    fn objective_updated(&mut self, ctx: &ControlContext<'_>) {
        self.activate(ctx);
    }
    /// One autopilot step; returns the path progress to publish.
    fn update_autopilot(&mut self, ctx: &ControlContext<'_>) -> PathStatus;
}

/// Arena slots. One controller instance per slot, created at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerId {
    Brake,
    Velocity,
    Fly,
    Land,
    AutoTakeoff,
    FixedWingFly,
    FixedWingLand,
    FixedWingTakeoff,
    Ground,
}

const CONTROLLER_COUNT: usize = 9;

fn slot_index(id: ControllerId) -> usize {
    match id {
        ControllerId::Brake => 0,
        ControllerId::Velocity => 1,
        ControllerId::Fly => 2,
        ControllerId::Land => 3,
        ControllerId::AutoTakeoff => 4,
        ControllerId::FixedWingFly => 5,
        ControllerId::FixedWingLand => 6,
        ControllerId::FixedWingTakeoff => 7,
        ControllerId::Ground => 8,
    }
}

/// Pick the controller for a frame class and path mode.
///
/// `None` means the mode is not controller-backed for this frame: either
/// one of the inline modes (FixedAttitude, DisarmAlarm) or an invalid
/// combination.
pub fn select_controller(frame: FrameClass, mode: PathMode) -> Option<ControllerId> {
    use PathMode::*;
    match frame {
        FrameClass::Multirotor | FrameClass::Heli => match mode {
            Brake => Some(ControllerId::Brake),
            Velocity => Some(ControllerId::Velocity),
            GotoEndpoint | FollowVector | CircleRight | CircleLeft => Some(ControllerId::Fly),
            Land => Some(ControllerId::Land),
            AutoTakeoff => Some(ControllerId::AutoTakeoff),
            _ => None,
        },
        FrameClass::FixedWing => match mode {
            GotoEndpoint | FollowVector | CircleRight | CircleLeft => {
                Some(ControllerId::FixedWingFly)
            }
            Land => Some(ControllerId::FixedWingLand),
            AutoTakeoff => Some(ControllerId::FixedWingTakeoff),
            _ => None,
        },
        FrameClass::Ground => match mode {
            GotoEndpoint | FollowVector | CircleRight | CircleLeft => Some(ControllerId::Ground),
            _ => None,
        },
        FrameClass::Custom => None,
    }
}

/// The dispatcher. Owned by its scheduler callback.
pub struct PathFollower {
    objects: Arc<FlightObjects>,
    alarms: Alarms,
    controllers: [Box<dyn PathController>; CONTROLLER_COUNT],
    active: Option<ControllerId>,
    /// Mode the active controller was selected for.
    active_mode: PathMode,
    /// Frame class the controllers were last initialised for.
    initialized_frame: Option<FrameClass>,
    last_path_version: u64,
}

impl PathFollower {
    pub fn new(objects: Arc<FlightObjects>) -> Self {
        let alarms = Alarms::new(objects.system_alarms.clone());
        Self {
            objects,
            alarms,
            controllers: [
                Box::new(BrakeController::default()),
                Box::new(VelocityController::default()),
                Box::new(FlyController::default()),
                Box::new(LandController::default()),
                Box::new(AutoTakeoffController::default()),
                Box::new(FixedWingFlyController::default()),
                Box::new(FixedWingLandController::default()),
                Box::new(FixedWingTakeoffController::default()),
                Box::new(GroundDriveController::default()),
            ],
            active: None,
            active_mode: PathMode::GotoEndpoint,
            initialized_frame: None,
            last_path_version: 0,
        }
    }

    fn frame_class(&self) -> FrameClass {
        self.objects.settings.system.get().airframe.class()
    }

    /// One dispatcher tick. Returns the delay until the next tick [ms].
    pub fn tick(&mut self, dt: f32) -> u32 {
        let flight_status = self.objects.flight_status.get();
        if !flight_status.control_chain.path_follower {
            if let Some(active) = self.active.take() {
                self.controllers[slot_index(active)].deactivate();
                debug!(?active, "path follower disengaged");
            }
            self.alarms
                .set(AlarmSlot::Guidance, AlarmLevel::Uninitialised);
            return PATHFOLLOWER_IDLE_PERIOD_MS;
        }

        let settings = self.objects.settings.path_follower.get();
        let path = self.objects.path_desired.get();
        let frame = self.frame_class();

        // Frame type changed under us: the controllers re-initialise for
        // the new class exactly once.
        if self.initialized_frame != Some(frame) {
            self.initialized_frame = Some(frame);
            if let Some(active) = self.active.take() {
                self.controllers[slot_index(active)].deactivate();
            }
            info!(?frame, "path follower controllers initialised");
        }

        // Objective changed: same mode re-targets, new mode re-selects.
        let path_version = self.objects.path_desired.version();
        let objective_changed = path_version != self.last_path_version;
        self.last_path_version = path_version;
        if let Some(active) = self.active {
            if path.mode != self.active_mode {
                self.controllers[slot_index(active)].deactivate();
                self.active = None;
            }
        }

        let mut status = PathStatus {
            uid: path.uid,
            status: PathStatusKind::InProgress,
            ..Default::default()
        };

        let ctx = ControlContext {
            objects: &self.objects,
            settings: &settings,
            path: &path,
            dt,
        };

        match self.active {
            None => {
                if let Some(id) = select_controller(frame, path.mode) {
                    self.controllers[slot_index(id)].activate(&ctx);
                    self.active = Some(id);
                    self.active_mode = path.mode;
                    self.alarms.set(AlarmSlot::Guidance, AlarmLevel::Ok);
                    info!(?id, mode = ?path.mode, "path controller activated");
                }
            }
            Some(active) if objective_changed => {
                self.controllers[slot_index(active)].objective_updated(&ctx);
            }
            Some(_) => {}
        }

        match self.active {
            Some(id) => {
                status = self.controllers[slot_index(id)].update_autopilot(&ctx);
                status.uid = path.uid;
            }
            None => match path.mode {
                PathMode::FixedAttitude => {
                    self.update_fixed_attitude(&path);
                    self.alarms.set(AlarmSlot::Guidance, AlarmLevel::Ok);
                }
                PathMode::DisarmAlarm => {
                    self.alarms.set(AlarmSlot::Guidance, AlarmLevel::Critical);
                }
                _ => {
                    status.status = PathStatusKind::Critical;
                    self.alarms.set(AlarmSlot::Guidance, AlarmLevel::Error);
                }
            },
        }

        self.objects.path_status.set(status);

        match frame {
            FrameClass::Multirotor | FrameClass::Heli => settings.vtol_update_period_ms,
            FrameClass::FixedWing => settings.fixed_wing_update_period_ms,
            _ => settings.ground_update_period_ms,
        }
    }

    /// The canned-attitude path mode: mode parameters carry roll, pitch,
    /// yaw [deg] and thrust.
    fn update_fixed_attitude(&self, path: &PathDesired) {
        let p = path.mode_parameters;
        self.objects.stabilization_desired.set(StabilizationDesired {
            axis: [p[0], p[1], p[2], p[3]],
            mode: [
                StabilizationMode::Attitude,
                StabilizationMode::Attitude,
                StabilizationMode::Attitude,
                StabilizationMode::Manual,
            ],
        });
    }

    pub fn active_controller(&self) -> Option<ControllerId> {
        self.active
    }
}
