//! Ground vehicle drive controller.
//!
//! Only the trajectory-following modes exist on the ground: steer toward
//! the target point, throttle with distance, stop on arrival.

use skylark_common::math::{boundf, wrap_angle_deg};
use skylark_common::objects::{
    PathStatus, PathStatusKind, StabilizationDesired, StabilizationMode,
};
use tracing::debug;

use super::{ControlContext, PathController};

/// Arrival radius [m].
const ARRIVAL_DISTANCE: f32 = 1.0;

#[derive(Default)]
pub struct GroundDriveController;

impl PathController for GroundDriveController {
    fn activate(&mut self, ctx: &ControlContext<'_>) {
        debug!(mode = ?ctx.path.mode, "ground drive engaged");
    }

    fn deactivate(&mut self) {}

    fn update_autopilot(&mut self, ctx: &ControlContext<'_>) -> PathStatus {
        let pos = ctx.objects.position_state.get();
        let attitude = ctx.objects.attitude_state.get();
        let end = ctx.path.end;

        let dn = end[0] - pos.north;
        let de = end[1] - pos.east;
        let dist = (dn * dn + de * de).sqrt();
        let arrived = dist < ARRIVAL_DISTANCE;

        let course = de.atan2(dn).to_degrees();
        let course_err = wrap_angle_deg(course - attitude.yaw);
        let steer = boundf(course_err / 45.0, -1.0, 1.0);

        // Slow down into the target, stop inside the arrival radius.
        let throttle = if arrived {
            0.0
        } else {
            boundf(dist * 0.1, 0.1, 0.5)
        };

        ctx.objects.stabilization_desired.set(StabilizationDesired {
            axis: [0.0, 0.0, steer, throttle],
            mode: [
                StabilizationMode::Manual,
                StabilizationMode::Manual,
                StabilizationMode::Manual,
                StabilizationMode::Manual,
            ],
        });

        PathStatus {
            status: if arrived {
                PathStatusKind::Completed
            } else {
                PathStatusKind::InProgress
            },
            fractional_progress: if arrived { 1.0 } else { 0.0 },
            error: dist,
            ..Default::default()
        }
    }
}
