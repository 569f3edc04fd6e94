//! Fixed-wing path controllers.
//!
//! A wing cannot hover: everything is expressed as bank toward the desired
//! course and pitch toward the desired altitude, with thrust as the energy
//! knob.

use skylark_common::math::{boundf, wrap_angle_deg};
use skylark_common::objects::{
    PathStatus, PathStatusKind, StabilizationDesired, StabilizationMode,
};
use tracing::debug;

use super::{ControlContext, PathController};

/// Bank/pitch/thrust command from a desired course and altitude.
fn command_course(ctx: &ControlContext<'_>, course_deg: f32, target_down: f32, thrust: f32) {
    let attitude = ctx.objects.attitude_state.get();
    let pos = ctx.objects.position_state.get();

    let course_err = wrap_angle_deg(course_deg - attitude.yaw);
    let max = ctx.settings.max_roll_pitch;
    let roll = boundf(course_err * 0.5, -max, max);

    // Positive when below target (NED down grows downward).
    let alt_err = pos.down - target_down;
    let pitch = boundf(alt_err * 2.0, -max, max);

    ctx.objects.stabilization_desired.set(StabilizationDesired {
        axis: [roll, pitch, course_deg, boundf(thrust, 0.0, 1.0)],
        mode: [
            StabilizationMode::Attitude,
            StabilizationMode::Attitude,
            StabilizationMode::Rate,
            StabilizationMode::Manual,
        ],
    });
}

/// Endpoint / vector / orbit following for wings.
#[derive(Default)]
pub struct FixedWingFlyController;

impl PathController for FixedWingFlyController {
    fn activate(&mut self, ctx: &ControlContext<'_>) {
        debug!(mode = ?ctx.path.mode, "fixed-wing fly engaged");
    }

    fn deactivate(&mut self) {}

    fn update_autopilot(&mut self, ctx: &ControlContext<'_>) -> PathStatus {
        use skylark_common::objects::PathMode::*;
        let pos = ctx.objects.position_state.get();
        let end = ctx.path.end;
        let dn = end[0] - pos.north;
        let de = end[1] - pos.east;
        let dist = (dn * dn + de * de).sqrt();

        let course = match ctx.path.mode {
            CircleRight | CircleLeft => {
                // Fly the tangent; the sign picks the orbit direction.
                let radial = de.atan2(dn).to_degrees();
                let offset = if ctx.path.mode == CircleRight {
                    90.0
                } else {
                    -90.0
                };
                wrap_angle_deg(radial + 180.0 + offset)
            }
            _ => de.atan2(dn).to_degrees(),
        };

        command_course(ctx, course, end[2], 0.7);

        PathStatus {
            status: if dist < 10.0 && !matches!(ctx.path.mode, CircleRight | CircleLeft) {
                PathStatusKind::Completed
            } else {
                PathStatusKind::InProgress
            },
            fractional_progress: 0.0,
            error: dist,
            ..Default::default()
        }
    }
}

/// Glide-slope landing: throttle back, shallow descent on the endpoint
/// course.
#[derive(Default)]
pub struct FixedWingLandController;

impl PathController for FixedWingLandController {
    fn activate(&mut self, _ctx: &ControlContext<'_>) {
        debug!("fixed-wing land engaged");
    }

    fn deactivate(&mut self) {}

    fn update_autopilot(&mut self, ctx: &ControlContext<'_>) -> PathStatus {
        let pos = ctx.objects.position_state.get();
        let end = ctx.path.end;
        let course = (end[1] - pos.east).atan2(end[0] - pos.north).to_degrees();
        // Aim below the field: the flare is the pilot's (or ground's) job.
        command_course(ctx, course, end[2] + 1.0, 0.1);
        PathStatus {
            status: PathStatusKind::InProgress,
            fractional_progress: 0.5,
            error: (pos.down - end[2]).abs(),
            ..Default::default()
        }
    }
}

/// Full-power climb-out straight ahead until the safe height.
#[derive(Default)]
pub struct FixedWingTakeoffController {
    course: f32,
    target_down: f32,
}

impl PathController for FixedWingTakeoffController {
    fn activate(&mut self, ctx: &ControlContext<'_>) {
        let attitude = ctx.objects.attitude_state.get();
        let pos = ctx.objects.position_state.get();
        self.course = attitude.yaw;
        self.target_down = pos.down - ctx.settings.takeoff_height.max(20.0);
        debug!(course = self.course, "fixed-wing takeoff engaged");
    }

    fn deactivate(&mut self) {}

    fn update_autopilot(&mut self, ctx: &ControlContext<'_>) -> PathStatus {
        let pos = ctx.objects.position_state.get();
        command_course(ctx, self.course, self.target_down, 1.0);
        let done = pos.down <= self.target_down + 0.5;
        PathStatus {
            status: if done {
                PathStatusKind::Completed
            } else {
                PathStatusKind::InProgress
            },
            fractional_progress: if done { 1.0 } else { 0.5 },
            error: (pos.down - self.target_down).max(0.0),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::FlightObjects;
    use skylark_common::objects::{
        AttitudeState, PathDesired, PathFollowerSettings, PathMode, PositionState,
    };
    use std::sync::Arc;

    #[test]
    fn fly_banks_toward_the_target_course() {
        let objects: Arc<FlightObjects> = FlightObjects::new_default();
        objects.attitude_state.set(AttitudeState {
            yaw: 0.0,
            ..Default::default()
        });
        let settings = PathFollowerSettings::default();
        let path = PathDesired {
            mode: PathMode::GotoEndpoint,
            end: [0.0, 100.0, -50.0], // due east, 50 m up
            ..Default::default()
        };
        let ctx = ControlContext {
            objects: &objects,
            settings: &settings,
            path: &path,
            dt: 0.1,
        };
        let mut fly = FixedWingFlyController::default();
        let status = fly.update_autopilot(&ctx);
        assert_eq!(status.status, PathStatusKind::InProgress);
        let sd = objects.stabilization_desired.get();
        assert!(sd.axis[0] > 0.0, "roll {}", sd.axis[0]); // bank right
        assert!(sd.axis[1] > 0.0, "pitch {}", sd.axis[1]); // nose up to climb
    }

    #[test]
    fn takeoff_holds_heading_at_full_power() {
        let objects: Arc<FlightObjects> = FlightObjects::new_default();
        objects.attitude_state.set(AttitudeState {
            yaw: 45.0,
            ..Default::default()
        });
        let settings = PathFollowerSettings::default();
        let path = PathDesired {
            mode: PathMode::AutoTakeoff,
            ..Default::default()
        };
        let ctx = ControlContext {
            objects: &objects,
            settings: &settings,
            path: &path,
            dt: 0.1,
        };
        let mut takeoff = FixedWingTakeoffController::default();
        takeoff.activate(&ctx);
        takeoff.update_autopilot(&ctx);
        let sd = objects.stabilization_desired.get();
        assert_eq!(sd.axis[3], 1.0);
        assert_eq!(sd.axis[2], 45.0);

        objects.position_state.set(PositionState {
            down: -25.0,
            ..Default::default()
        });
        let status = takeoff.update_autopilot(&ctx);
        assert_eq!(status.status, PathStatusKind::Completed);
    }
}
