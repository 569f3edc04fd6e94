//! Inner (rate) loop: rate targets to actuator demands.

use std::sync::Arc;

use skylark_common::consts::{AXES, ROTATION_AXES};
use skylark_common::math::{Pid, boundf};
use skylark_common::objects::{
    ActuatorDesired, InnerLoopMode, StabilizationBank, StabilizationSettings, StabilizationStatus,
};

use crate::objects::FlightObjects;

use super::StabCache;
use super::cruisecontrol::cruise_control_factor;

pub(crate) struct InnerLoop {
    pids: [Pid; ROTATION_AXES],
    previous_mode: [Option<InnerLoopMode>; AXES],
    /// AxisLock heading-lead accumulator [deg].
    axis_lock_accum: [f32; ROTATION_AXES],
    /// Simulated flybar follow state [deg/s].
    vbar: [f32; ROTATION_AXES],
    /// System-ident excitation phase [ms] and current polarity.
    ident_phase_ms: f32,
    ident_sign: f32,
}

impl InnerLoop {
    pub fn new() -> Self {
        Self {
            pids: Default::default(),
            previous_mode: [None; AXES],
            axis_lock_accum: [0.0; ROTATION_AXES],
            vbar: [0.0; ROTATION_AXES],
            ident_phase_ms: 0.0,
            ident_sign: 1.0,
        }
    }

    pub fn configure(&mut self, bank: &StabilizationBank, settings: &StabilizationSettings) {
        let gains = [bank.roll_rate_pid, bank.pitch_rate_pid, bank.yaw_rate_pid];
        for (pid, g) in self.pids.iter_mut().zip(gains) {
            pid.configure(g);
            pid.configure_derivative(settings.derivative_cutoff, settings.derivative_gamma);
        }
    }

    pub fn force_reinit(&mut self) {
        self.previous_mode = [None; AXES];
    }

    pub fn run(
        &mut self,
        objects: &Arc<FlightObjects>,
        cache: &mut StabCache,
        status: &StabilizationStatus,
        gyro: [f32; ROTATION_AXES],
        dt: f32,
    ) {
        let rate_desired = objects.rate_desired.get();
        let mut out = [0.0f32; ROTATION_AXES];

        for t in 0..ROTATION_AXES {
            let mode = status.inner[t];
            if self.previous_mode[t] != Some(mode) {
                self.previous_mode[t] = Some(mode);
                self.pids[t].zero();
                self.axis_lock_accum[t] = 0.0;
                self.vbar[t] = 0.0;
            }

            let mut rate = rate_desired.axis[t];
            let max = cache.bank.maximum_rate[t];
            if max > 0.0 {
                rate = boundf(rate, -max, max);
            }

            out[t] = match mode {
                InnerLoopMode::Direct => rate,
                InnerLoopMode::Rate | InnerLoopMode::CruiseControl => {
                    self.pids[t].apply_setpoint(rate, gyro[t], dt)
                }
                InnerLoopMode::AxisLock => {
                    if rate.abs() > cache.settings.max_axis_lock_rate {
                        // Strong command: behave like rate mode, heading
                        // hold rebases on release.
                        self.axis_lock_accum[t] = 0.0;
                    } else {
                        self.axis_lock_accum[t] = boundf(
                            self.axis_lock_accum[t] + (rate - gyro[t]) * dt,
                            -cache.settings.max_axis_lock,
                            cache.settings.max_axis_lock,
                        );
                        rate += self.axis_lock_accum[t] * cache.settings.axis_lock_kp;
                    }
                    self.pids[t].apply_setpoint(rate, gyro[t], dt)
                }
                InnerLoopMode::VirtualFlybar => {
                    // Flybar paddle follows the body with a decay; its
                    // deflection opposes the command like a real head.
                    let tau = cache.settings.vbar_tau.max(1e-3);
                    self.vbar[t] += (gyro[t] - self.vbar[t]) * (dt / tau);
                    (rate - self.vbar[t] * cache.settings.vbar_sensitivity[t])
                        * self.pids[t].gains.kp
                }
                InnerLoopMode::Acro => {
                    // Blend raw stick against the rate PID by stick
                    // deflection; more stick, more direct authority.
                    let stick = boundf(rate / cache.bank.manual_rate[t].max(1.0), -1.0, 1.0);
                    let factor = stick.abs() * cache.acro_factor[t];
                    let pid_out = self.pids[t].apply_setpoint(rate, gyro[t], dt);
                    factor * stick + (1.0 - factor) * pid_out
                }
                InnerLoopMode::SystemIdent => {
                    let excited = rate + self.ident_excitation(cache, t, dt);
                    self.pids[t].apply_setpoint(excited, gyro[t], dt)
                }
            };
            out[t] = boundf(out[t], -1.0, 1.0);
        }

        // Thrust axis.
        let thrust_in = rate_desired.axis[3];
        let thrust = match status.inner[3] {
            InnerLoopMode::CruiseControl => {
                let attitude = objects.attitude_state.get();
                let factor = cruise_control_factor(&cache.settings.cruise_control, &attitude.q);
                let cc = &cache.settings.cruise_control;
                boundf(
                    cc.min_thrust + (thrust_in - cc.min_thrust) * factor * cc.power_trim,
                    cc.min_thrust,
                    cc.max_thrust,
                )
            }
            _ => thrust_in,
        };

        objects.actuator_desired.set(ActuatorDesired {
            roll: out[0],
            pitch: out[1],
            yaw: out[2],
            thrust: boundf(thrust, 0.0, 1.0),
        });
    }

    /// Square-wave excitation for system identification, advanced on the
    /// roll axis so all axes share one phase.
    fn ident_excitation(&mut self, cache: &StabCache, t: usize, dt: f32) -> f32 {
        if t == 0 {
            self.ident_phase_ms += dt * 1000.0;
            let half_period = cache.settings.system_ident_period_ms as f32 / 2.0;
            if self.ident_phase_ms >= half_period {
                self.ident_phase_ms -= half_period;
                self.ident_sign = -self.ident_sign;
            }
        }
        cache.settings.system_ident_amplitude * self.ident_sign
    }
}
