//! Multirotor / helicopter path controllers.
//!
//! All of them funnel through the same velocity-to-attitude stage: an NED
//! velocity setpoint becomes roll/pitch angles (yaw held), published as a
//! `StabilizationDesired` in Attitude+CruiseControl form.

use skylark_common::math::boundf;
use skylark_common::objects::{
    PathStatus, PathStatusKind, StabilizationDesired, StabilizationMode, VelocityDesired,
};
use tracing::debug;

use super::{ControlContext, PathController};

/// Speed under which the brake sequence counts as stopped [m/s].
const BRAKE_STOPPED_SPEED: f32 = 0.2;

/// Turn an NED velocity setpoint into attitude setpoints and publish both.
fn command_velocity(ctx: &ControlContext<'_>, velocity: VelocityDesired, thrust: f32) {
    let objects = ctx.objects;
    let settings = ctx.settings;
    let actual = objects.velocity_state.get();
    let attitude = objects.attitude_state.get();

    // Velocity error, rotated into the body-ish frame by current yaw so a
    // north error pitches forward regardless of heading.
    let yaw = attitude.yaw.to_radians();
    let (sin_y, cos_y) = yaw.sin_cos();
    let err_n = velocity.north - actual.north;
    let err_e = velocity.east - actual.east;
    let err_fwd = err_n * cos_y + err_e * sin_y;
    let err_right = -err_n * sin_y + err_e * cos_y;

    let gain = settings.max_roll_pitch / settings.horizontal_vel_max.max(0.1);
    let pitch = boundf(-err_fwd * gain, -settings.max_roll_pitch, settings.max_roll_pitch);
    let roll = boundf(err_right * gain, -settings.max_roll_pitch, settings.max_roll_pitch);

    // Vertical: climb error trims thrust around hover.
    let climb_err = -(velocity.down - actual.down);
    let thrust = boundf(thrust + climb_err * 0.1, 0.0, 1.0);

    objects.velocity_desired.set(velocity);
    objects.stabilization_desired.set(StabilizationDesired {
        axis: [roll, pitch, attitude.yaw, thrust],
        mode: [
            StabilizationMode::Attitude,
            StabilizationMode::Attitude,
            StabilizationMode::Attitude,
            StabilizationMode::CruiseControl,
        ],
    });
}

// ─── Brake ──────────────────────────────────────────────────────────

/// Kill the current velocity, then hold.
#[derive(Default)]
pub struct BrakeController {
    elapsed: f32,
    holding: bool,
}

impl PathController for BrakeController {
    fn activate(&mut self, _ctx: &ControlContext<'_>) {
        self.elapsed = 0.0;
        self.holding = false;
        debug!("brake engaged");
    }

    fn deactivate(&mut self) {
        self.holding = false;
    }

    fn update_autopilot(&mut self, ctx: &ControlContext<'_>) -> PathStatus {
        self.elapsed += ctx.dt;
        let actual = ctx.objects.velocity_state.get();
        let speed =
            (actual.north * actual.north + actual.east * actual.east + actual.down * actual.down)
                .sqrt();

        if speed < BRAKE_STOPPED_SPEED || self.elapsed > ctx.settings.brake_timeout {
            self.holding = true;
        }
        command_velocity(ctx, VelocityDesired::default(), 0.5);

        PathStatus {
            status: if self.holding {
                PathStatusKind::Completed
            } else {
                PathStatusKind::InProgress
            },
            fractional_progress: if self.holding { 1.0 } else { 0.0 },
            error: speed,
            ..Default::default()
        }
    }
}

// ─── Velocity roam ──────────────────────────────────────────────────

/// Fly the velocity commanded in the path parameters (NED, m/s).
#[derive(Default)]
pub struct VelocityController;

impl PathController for VelocityController {
    fn activate(&mut self, _ctx: &ControlContext<'_>) {}

    fn deactivate(&mut self) {}

    fn update_autopilot(&mut self, ctx: &ControlContext<'_>) -> PathStatus {
        let p = ctx.path.mode_parameters;
        let limit = ctx.settings.horizontal_vel_max;
        let velocity = VelocityDesired {
            north: boundf(p[0], -limit, limit),
            east: boundf(p[1], -limit, limit),
            down: boundf(p[2], -ctx.settings.vertical_vel_max, ctx.settings.vertical_vel_max),
        };
        command_velocity(ctx, velocity, 0.5);
        PathStatus {
            status: PathStatusKind::InProgress,
            ..Default::default()
        }
    }
}

// ─── Fly (goto / follow vector / circles) ───────────────────────────

/// Trajectory controller for endpoint, vector and orbit segments.
#[derive(Default)]
pub struct FlyController;

impl FlyController {
    fn goto_endpoint(ctx: &ControlContext<'_>) -> (VelocityDesired, f32, f32) {
        let pos = ctx.objects.position_state.get();
        let end = ctx.path.end;
        let dn = end[0] - pos.north;
        let de = end[1] - pos.east;
        let dd = end[2] - pos.down;
        let dist = (dn * dn + de * de + dd * dd).sqrt();

        let kp = ctx.settings.horizontal_pos_kp;
        let limit = ctx.settings.horizontal_vel_max;
        let velocity = VelocityDesired {
            north: boundf(dn * kp, -limit, limit),
            east: boundf(de * kp, -limit, limit),
            down: boundf(
                dd * ctx.settings.vertical_pos_kp,
                -ctx.settings.vertical_vel_max,
                ctx.settings.vertical_vel_max,
            ),
        };
        let progress = if dist < 0.5 { 1.0 } else { 0.0 };
        (velocity, progress, dist)
    }

    fn follow_vector(ctx: &ControlContext<'_>) -> (VelocityDesired, f32, f32) {
        let pos = ctx.objects.position_state.get();
        let start = ctx.path.start;
        let end = ctx.path.end;
        let seg = [end[0] - start[0], end[1] - start[1], end[2] - start[2]];
        let seg_len_sq = seg[0] * seg[0] + seg[1] * seg[1] + seg[2] * seg[2];
        if seg_len_sq < 1e-6 {
            return Self::goto_endpoint(ctx);
        }
        let rel = [
            pos.north - start[0],
            pos.east - start[1],
            pos.down - start[2],
        ];
        let along = (rel[0] * seg[0] + rel[1] * seg[1] + rel[2] * seg[2]) / seg_len_sq;
        let along_clamped = along.clamp(0.0, 1.0);
        // Closest point on the segment; aim a little ahead of it.
        let lead = (along_clamped + 0.05).min(1.0);
        let target = [
            start[0] + seg[0] * lead,
            start[1] + seg[1] * lead,
            start[2] + seg[2] * lead,
        ];
        let dn = target[0] - pos.north;
        let de = target[1] - pos.east;
        let dd = target[2] - pos.down;
        let cross_track = {
            let closest = [
                start[0] + seg[0] * along_clamped,
                start[1] + seg[1] * along_clamped,
                start[2] + seg[2] * along_clamped,
            ];
            let cn = pos.north - closest[0];
            let ce = pos.east - closest[1];
            let cd = pos.down - closest[2];
            (cn * cn + ce * ce + cd * cd).sqrt()
        };

        let kp = ctx.settings.horizontal_pos_kp;
        let limit = ctx.settings.horizontal_vel_max;
        let velocity = VelocityDesired {
            north: boundf(dn * kp * 4.0, -limit, limit),
            east: boundf(de * kp * 4.0, -limit, limit),
            down: boundf(
                dd * ctx.settings.vertical_pos_kp,
                -ctx.settings.vertical_vel_max,
                ctx.settings.vertical_vel_max,
            ),
        };
        (velocity, along_clamped, cross_track)
    }

    fn circle(ctx: &ControlContext<'_>, clockwise: bool) -> (VelocityDesired, f32, f32) {
        let pos = ctx.objects.position_state.get();
        let center = ctx.path.end;
        // Radius from the path parameters; fall back to current distance.
        let dn = pos.north - center[0];
        let de = pos.east - center[1];
        let dist = (dn * dn + de * de).sqrt();
        let radius = if ctx.path.mode_parameters[0] > 0.1 {
            ctx.path.mode_parameters[0]
        } else {
            dist.max(1.0)
        };

        // Radial correction onto the circle plus a tangential component.
        let (rn, re) = if dist > 0.1 {
            (dn / dist, de / dist)
        } else {
            (1.0, 0.0)
        };
        let radial = (radius - dist) * ctx.settings.horizontal_pos_kp;
        let tangent_speed = ctx.settings.horizontal_vel_max * 0.5;
        let (tn, te) = if clockwise { (-re, rn) } else { (re, -rn) };

        let limit = ctx.settings.horizontal_vel_max;
        let velocity = VelocityDesired {
            north: boundf(rn * radial + tn * tangent_speed, -limit, limit),
            east: boundf(re * radial + te * tangent_speed, -limit, limit),
            down: boundf(
                (center[2] - pos.down) * ctx.settings.vertical_pos_kp,
                -ctx.settings.vertical_vel_max,
                ctx.settings.vertical_vel_max,
            ),
        };
        (velocity, 0.0, (dist - radius).abs())
    }
}

impl PathController for FlyController {
    fn activate(&mut self, ctx: &ControlContext<'_>) {
        debug!(mode = ?ctx.path.mode, "fly controller engaged");
    }

    fn deactivate(&mut self) {}

    fn update_autopilot(&mut self, ctx: &ControlContext<'_>) -> PathStatus {
        use skylark_common::objects::PathMode::*;
        let (velocity, progress, error) = match ctx.path.mode {
            FollowVector => Self::follow_vector(ctx),
            CircleRight => Self::circle(ctx, true),
            CircleLeft => Self::circle(ctx, false),
            _ => Self::goto_endpoint(ctx),
        };
        command_velocity(ctx, velocity, 0.5);
        PathStatus {
            status: if progress >= 1.0 {
                PathStatusKind::Completed
            } else {
                PathStatusKind::InProgress
            },
            fractional_progress: progress,
            error,
            ..Default::default()
        }
    }
}

// ─── Land ───────────────────────────────────────────────────────────

/// Hold horizontal position over the endpoint and descend until the
/// velocity feedback shows ground contact.
#[derive(Default)]
pub struct LandController {
    /// Consecutive ticks with commanded descent but no actual sink.
    ground_ticks: u32,
    touched_down: bool,
}

impl PathController for LandController {
    fn activate(&mut self, _ctx: &ControlContext<'_>) {
        self.ground_ticks = 0;
        self.touched_down = false;
        debug!("land sequence engaged");
    }

    fn deactivate(&mut self) {}

    fn update_autopilot(&mut self, ctx: &ControlContext<'_>) -> PathStatus {
        let pos = ctx.objects.position_state.get();
        let actual = ctx.objects.velocity_state.get();
        let end = ctx.path.end;

        let kp = ctx.settings.horizontal_pos_kp;
        let limit = ctx.settings.horizontal_vel_max;
        let velocity = VelocityDesired {
            north: boundf((end[0] - pos.north) * kp, -limit, limit),
            east: boundf((end[1] - pos.east) * kp, -limit, limit),
            down: ctx.settings.land_rate,
        };

        // Commanded sink with no measured sink means the gear is down.
        if !self.touched_down {
            if actual.down.abs() < 0.05 {
                self.ground_ticks += 1;
            } else {
                self.ground_ticks = 0;
            }
            if self.ground_ticks > 25 {
                self.touched_down = true;
                debug!("touchdown detected");
            }
        }

        let thrust = if self.touched_down { 0.0 } else { 0.5 };
        command_velocity(ctx, velocity, thrust);

        PathStatus {
            status: if self.touched_down {
                PathStatusKind::Completed
            } else {
                PathStatusKind::InProgress
            },
            fractional_progress: if self.touched_down { 1.0 } else { 0.5 },
            error: 0.0,
            ..Default::default()
        }
    }
}

// ─── Auto takeoff ───────────────────────────────────────────────────

/// Climb straight up to the configured height above the start point.
#[derive(Default)]
pub struct AutoTakeoffController {
    target_down: f32,
}

impl PathController for AutoTakeoffController {
    fn activate(&mut self, ctx: &ControlContext<'_>) {
        let pos = ctx.objects.position_state.get();
        // NED: up is negative down.
        self.target_down = pos.down - ctx.settings.takeoff_height;
        debug!(target_down = self.target_down, "auto takeoff engaged");
    }

    fn deactivate(&mut self) {}

    fn update_autopilot(&mut self, ctx: &ControlContext<'_>) -> PathStatus {
        let pos = ctx.objects.position_state.get();
        let start = ctx.path.start;

        let kp = ctx.settings.horizontal_pos_kp;
        let limit = ctx.settings.horizontal_vel_max;
        let remaining = pos.down - self.target_down;
        let velocity = VelocityDesired {
            north: boundf((start[0] - pos.north) * kp, -limit, limit),
            east: boundf((start[1] - pos.east) * kp, -limit, limit),
            down: -ctx.settings.takeoff_rate,
        };
        command_velocity(ctx, velocity, 0.6);

        let done = remaining <= 0.1;
        PathStatus {
            status: if done {
                PathStatusKind::Completed
            } else {
                PathStatusKind::InProgress
            },
            fractional_progress: 1.0 - (remaining / ctx.settings.takeoff_height).clamp(0.0, 1.0),
            error: remaining.max(0.0),
            ..Default::default()
        }
    }
}
