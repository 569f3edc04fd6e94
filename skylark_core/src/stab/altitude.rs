//! Altitude hold / vario thrust loop.
//!
//! Outer stage of the thrust axis when the slot selects AltitudeHold or
//! AltitudeVario: altitude error becomes a climb-rate target, a PI on
//! climb rate becomes a thrust demand. Must be disabled on the transition
//! away so its integrator cannot wind while another mode owns thrust.

use std::sync::Arc;

use skylark_common::math::{Pid, PidGains, boundf};
use skylark_common::objects::AltitudeLoopSettings;
use tracing::debug;

use crate::objects::FlightObjects;

/// Which altitude behavior the thrust axis runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AltitudeMode {
    /// Hold the altitude captured at engagement; stick nudges the setpoint.
    Hold,
    /// Stick commands climb rate directly; setpoint follows.
    Vario,
}

/// Thrust the loop idles around when the craft hovers.
const NEUTRAL_THRUST: f32 = 0.5;

pub struct AltitudeLoop {
    settings: AltitudeLoopSettings,
    velocity_pid: Pid,
    setpoint: f32,
    enabled: bool,
}

impl AltitudeLoop {
    pub fn new(settings: AltitudeLoopSettings) -> Self {
        let mut loop_ = Self {
            settings,
            velocity_pid: Pid::default(),
            setpoint: 0.0,
            enabled: false,
        };
        loop_.configure(settings);
        loop_
    }

    pub fn configure(&mut self, settings: AltitudeLoopSettings) {
        self.settings = settings;
        self.velocity_pid.configure(PidGains {
            kp: settings.velocity_kp,
            ki: settings.velocity_ki,
            kd: 0.0,
            ilim: NEUTRAL_THRUST,
        });
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Drop out of altitude control; called on the thrust-mode transition
    /// away from the altitude modes.
    pub fn disable(&mut self) {
        if self.enabled {
            debug!("altitude loop disabled");
        }
        self.enabled = false;
        self.velocity_pid.zero();
    }

    /// One outer-loop step. `stick` is the pilot thrust input in [0, 1].
    /// Returns the thrust demand for the inner loop.
    pub fn hold(
        &mut self,
        objects: &Arc<FlightObjects>,
        stick: f32,
        mode: AltitudeMode,
        reinit: bool,
        dt: f32,
    ) -> f32 {
        let baro = objects.baro_state.get();
        let velocity = objects.velocity_state.get();
        // NED: down positive. Climb rate is the negation.
        let climb_actual = -velocity.down;

        if reinit || !self.enabled {
            self.enabled = true;
            self.setpoint = baro.altitude;
            self.velocity_pid.zero();
            debug!(setpoint = self.setpoint, ?mode, "altitude loop engaged");
        }

        let climb_target = match mode {
            AltitudeMode::Hold => {
                // Stick around mid commands no change; the outer band
                // nudges the setpoint.
                let nudge = (stick - NEUTRAL_THRUST) * 2.0; // [-1, 1]
                if nudge.abs() > 0.25 {
                    self.setpoint += nudge * self.settings.vario_rate * dt;
                }
                boundf(
                    (self.setpoint - baro.altitude) * self.settings.kp,
                    -self.settings.max_climb_rate,
                    self.settings.max_climb_rate,
                )
            }
            AltitudeMode::Vario => {
                let rate = (stick - NEUTRAL_THRUST) * 2.0 * self.settings.vario_rate;
                self.setpoint = baro.altitude;
                boundf(rate, -self.settings.max_climb_rate, self.settings.max_climb_rate)
            }
        };

        let thrust = NEUTRAL_THRUST + self.velocity_pid.apply(climb_target - climb_actual, dt);
        boundf(thrust, 0.0, 1.0)
    }
}
