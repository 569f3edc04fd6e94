//! Outer (attitude) loop: desired angles to rate targets.

use std::sync::Arc;

use skylark_common::consts::{AXES, ROTATION_AXES, STICK_VALUE_AT_MODE_TRANSITION};
use skylark_common::math::{Pid, PidGains, boundf, wrap_angle_deg};
use skylark_common::objects::{OuterLoopMode, StabilizationBank, StabilizationStatus};

use crate::objects::FlightObjects;

use super::altitude::{AltitudeLoop, AltitudeMode};
use super::StabCache;

pub(crate) struct OuterLoop {
    pids: [Pid; ROTATION_AXES],
    previous_mode: [Option<OuterLoopMode>; AXES],
    // DirectWithLimits latches: once an envelope edge engages it holds
    // until the stick comes back.
    pitch_min: bool,
    pitch_max: bool,
    roll_min: bool,
    roll_max: bool,
}

impl OuterLoop {
    pub fn new() -> Self {
        Self {
            pids: Default::default(),
            previous_mode: [None; AXES],
            pitch_min: false,
            pitch_max: false,
            roll_min: false,
            roll_max: false,
        }
    }

    pub fn configure(&mut self, bank: &StabilizationBank) {
        let gains = [bank.roll_pi, bank.pitch_pi, bank.yaw_pi];
        for (pid, g) in self.pids.iter_mut().zip(gains) {
            pid.configure(PidGains { kd: 0.0, ..g });
        }
    }

    /// Force every axis to reinitialize on its next run.
    pub fn force_reinit(&mut self) {
        self.previous_mode = [None; AXES];
    }

    pub fn run(
        &mut self,
        objects: &Arc<FlightObjects>,
        cache: &mut StabCache,
        altitude: &mut AltitudeLoop,
        status: &StabilizationStatus,
        dt: f32,
    ) {
        let attitude = objects.attitude_state.get();
        let desired = objects.stabilization_desired.get();
        let mut rate = objects.rate_desired.get();
        let attitude_axis = [attitude.roll, attitude.pitch, attitude.yaw];

        // Thrust axis first; leaving an altitude mode must disable the
        // altitude controller so its integrator cannot run in the dark.
        let thrust_mode = status.outer[3];
        let thrust_reinit = self.previous_mode[3] != Some(thrust_mode);
        if thrust_reinit {
            if matches!(
                self.previous_mode[3],
                Some(OuterLoopMode::Altitude) | Some(OuterLoopMode::AltitudeVario)
            ) && !matches!(
                thrust_mode,
                OuterLoopMode::Altitude | OuterLoopMode::AltitudeVario
            ) {
                altitude.disable();
            }
            self.previous_mode[3] = Some(thrust_mode);
        }
        rate.axis[3] = match thrust_mode {
            OuterLoopMode::Altitude => altitude.hold(
                objects,
                desired.axis[3],
                AltitudeMode::Hold,
                thrust_reinit,
                dt,
            ),
            OuterLoopMode::AltitudeVario => altitude.hold(
                objects,
                desired.axis[3],
                AltitudeMode::Vario,
                thrust_reinit,
                dt,
            ),
            _ => desired.axis[3],
        };

        // Attitude error per rotational axis; yaw takes the shortest way.
        let mut local_error = [0.0f32; ROTATION_AXES];
        for t in 0..ROTATION_AXES {
            let desired_angle = match status.outer[t] {
                OuterLoopMode::Attitude | OuterLoopMode::Rattitude | OuterLoopMode::WeakLeveling => {
                    desired.axis[t]
                }
                _ => attitude_axis[t],
            };
            local_error[t] = desired_angle - attitude_axis[t];
        }
        local_error[2] = wrap_angle_deg(local_error[2]);

        // Feed forward: assume things always get worse before they get
        // better.
        for t in 0..ROTATION_AXES {
            local_error[t] -=
                cache.feed_forward_filter[t].value() * cache.bank.attitude_feed_forward[t];
        }

        let max_angle = [cache.bank.roll_max, cache.bank.pitch_max, cache.bank.yaw_max];
        for t in 0..ROTATION_AXES {
            let mode = status.outer[t];
            if self.previous_mode[t] != Some(mode) {
                self.previous_mode[t] = Some(mode);
                self.pids[t].zero();
            }

            rate.axis[t] = match mode {
                OuterLoopMode::Attitude => self.pids[t].apply(local_error[t], dt),
                OuterLoopMode::Rattitude => {
                    self.rattitude(cache, &desired.axis, local_error[t], t, dt)
                }
                OuterLoopMode::WeakLeveling => {
                    let stick = boundf(desired.axis[t] / max_angle[t], -1.0, 1.0);
                    let rate_input = stick * cache.bank.manual_rate[t];
                    let weak_leveling = boundf(
                        local_error[t] * cache.settings.weak_leveling_kp,
                        -cache.settings.max_weak_leveling_rate,
                        cache.settings.max_weak_leveling_rate,
                    );
                    rate_input + weak_leveling
                }
                OuterLoopMode::DirectWithLimits => self.direct_with_limits(
                    cache,
                    &attitude_axis,
                    desired.axis[t],
                    t,
                    dt,
                ),
                OuterLoopMode::Direct | OuterLoopMode::Altitude | OuterLoopMode::AltitudeVario => {
                    desired.axis[t]
                }
            };
        }

        objects.rate_desired.set(rate);
    }

    /// Rattitude: weighted blend of attitude and rate control, with the
    /// stick magnitude re-mapped so the crossover lands where the user put
    /// it.
    fn rattitude(
        &mut self,
        cache: &StabCache,
        desired_axis: &[f32; AXES],
        local_error: f32,
        t: usize,
        dt: f32,
    ) -> f32 {
        let max_angle = [cache.bank.roll_max, cache.bank.pitch_max, cache.bank.yaw_max];
        let stick: [f32; 3] =
            core::array::from_fn(|i| boundf(desired_axis[i] / max_angle[i], -1.0, 1.0));
        let rate_from_stick = stick[t] * cache.bank.manual_rate[t];

        // Corrective rate capped at the manual rate so it cannot dominate
        // once the two are joined.
        let rate_from_attitude = boundf(
            self.pids[t].apply(local_error, dt),
            -cache.bank.manual_rate[t],
            cache.bank.manual_rate[t],
        );

        // max() rather than sqrt() makes the stick region a square: hold a
        // roll angle and add pitch without the sensitivity changing.
        let mut magnitude = stick[t].abs();
        if t < 2 {
            magnitude = stick[0].abs().max(stick[1].abs());
        }

        // Piecewise-linear remap so the attitude-to-rate crossover happens
        // at the configured stick position instead of the natural root.
        let transition = cache.rattitude_transition;
        if magnitude <= transition {
            magnitude *= STICK_VALUE_AT_MODE_TRANSITION / transition;
        } else {
            magnitude = (magnitude - transition) / (1.0 - transition)
                + STICK_VALUE_AT_MODE_TRANSITION;
        }
        (1.0 - magnitude) * rate_from_attitude + magnitude * rate_from_stick
    }

    /// Rate passthrough that transparently switches to attitude hold at
    /// the envelope edge while the stick keeps pushing outward.
    fn direct_with_limits(
        &mut self,
        cache: &StabCache,
        attitude_axis: &[f32; ROTATION_AXES],
        desired: f32,
        t: usize,
        dt: f32,
    ) -> f32 {
        let mut out = desired;
        let (limit, att) = match t {
            0 => (cache.bank.roll_max, attitude_axis[0]),
            1 => (cache.bank.pitch_max, attitude_axis[1]),
            _ => return out,
        };
        let (mut latch_min, mut latch_max) = match t {
            0 => (self.roll_min, self.roll_max),
            _ => (self.pitch_min, self.pitch_max),
        };

        if att < -limit || latch_min {
            latch_min = true;
            if desired < 0.0 {
                // Hold the envelope edge while the stick still pushes out.
                let error = -limit - att;
                out = self.pids[t].apply(error, dt);
            } else {
                latch_min = false;
            }
        } else if att > limit || latch_max {
            latch_max = true;
            if desired > 0.0 {
                let error = limit - att;
                out = self.pids[t].apply(error, dt);
            } else {
                latch_max = false;
            }
        }
        match t {
            0 => {
                self.roll_min = latch_min;
                self.roll_max = latch_max;
            }
            _ => {
                self.pitch_min = latch_min;
                self.pitch_max = latch_max;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stab::derive_status;
    use skylark_common::objects::{AttitudeState, StabilizationDesired, StabilizationMode};

    const DT: f32 = 0.0025;

    fn setup(modes: [StabilizationMode; AXES]) -> (Arc<FlightObjects>, OuterLoop, StabCache, AltitudeLoop) {
        let objects = FlightObjects::new_default();
        let settings = objects.settings.stabilization.get();
        let bank = objects.settings.bank1.get();
        let cache = StabCache::rebuild(settings, bank);
        let mut outer = OuterLoop::new();
        outer.configure(&cache.bank);
        let altitude = AltitudeLoop::new(settings.altitude);
        objects.stabilization_desired.set(StabilizationDesired {
            axis: [0.0; AXES],
            mode: modes,
        });
        (objects, outer, cache, altitude)
    }

    #[test]
    fn yaw_error_takes_the_shortest_way() {
        // Desired +179°, measured −179°: the rate must command −2°'s worth,
        // not +358°'s.
        let (objects, mut outer, mut cache, mut alt) =
            setup([StabilizationMode::Attitude; AXES]);
        objects.attitude_state.set(AttitudeState {
            yaw: -179.0,
            ..Default::default()
        });
        let mut desired = objects.stabilization_desired.get();
        desired.axis[2] = 179.0;
        objects.stabilization_desired.set(desired);

        let status = derive_status(&objects.stabilization_desired.get().mode);
        outer.run(&objects, &mut cache, &mut alt, &status, DT);

        let rate = objects.rate_desired.get();
        // Outer yaw PI is pure P at default tuning: error × kp, negative.
        let kp = cache.bank.yaw_pi.kp;
        assert!(
            (rate.axis[2] - -2.0 * kp).abs() < 1e-3,
            "yaw rate {}",
            rate.axis[2]
        );
    }

    #[test]
    fn direct_mode_passes_rates_through() {
        let (objects, mut outer, mut cache, mut alt) = setup([StabilizationMode::Rate; AXES]);
        let mut desired = objects.stabilization_desired.get();
        desired.axis = [150.0, -30.0, 10.0, 0.4];
        objects.stabilization_desired.set(desired);

        let status = derive_status(&objects.stabilization_desired.get().mode);
        outer.run(&objects, &mut cache, &mut alt, &status, DT);
        let rate = objects.rate_desired.get();
        assert_eq!(rate.axis[0], 150.0);
        assert_eq!(rate.axis[3], 0.4);
    }

    #[test]
    fn mode_change_zeroes_the_outer_integrator() {
        let (objects, mut outer, mut cache, mut alt) =
            setup([StabilizationMode::Attitude; AXES]);
        // Give the integrator something to accumulate.
        let mut bank = cache.bank;
        bank.roll_pi.ki = 5.0;
        bank.roll_pi.ilim = 100.0;
        cache.bank = bank;
        outer.configure(&cache.bank);

        let mut desired = objects.stabilization_desired.get();
        desired.axis[0] = 30.0;
        objects.stabilization_desired.set(desired);
        let status = derive_status(&objects.stabilization_desired.get().mode);
        for _ in 0..200 {
            outer.run(&objects, &mut cache, &mut alt, &status, DT);
        }
        assert!(outer.pids[0].i_accumulator().abs() > 0.0);

        // Switch roll to Rate: the axis reinitializes, integrator drops.
        let mut desired = objects.stabilization_desired.get();
        desired.mode[0] = StabilizationMode::Rate;
        objects.stabilization_desired.set(desired);
        let status = derive_status(&objects.stabilization_desired.get().mode);
        outer.run(&objects, &mut cache, &mut alt, &status, DT);
        assert_eq!(outer.pids[0].i_accumulator(), 0.0);
    }

    #[test]
    fn direct_with_limits_latches_at_the_envelope() {
        let (objects, mut outer, mut cache, mut alt) =
            setup([StabilizationMode::RateTrainer; AXES]);
        // Pitch beyond +PitchMax with the stick still pushing forward.
        objects.attitude_state.set(AttitudeState {
            pitch: cache.bank.pitch_max + 10.0,
            ..Default::default()
        });
        let mut desired = objects.stabilization_desired.get();
        desired.axis[1] = 60.0; // stick keeps pushing
        objects.stabilization_desired.set(desired);

        let status = derive_status(&objects.stabilization_desired.get().mode);
        outer.run(&objects, &mut cache, &mut alt, &status, DT);
        let rate = objects.rate_desired.get();
        // Attitude hold at the limit commands a negative (recovering) rate.
        assert!(rate.axis[1] < 0.0, "pitch rate {}", rate.axis[1]);
        assert!(outer.pitch_max);

        // Stick released to neutral-negative: passthrough resumes.
        let mut desired = objects.stabilization_desired.get();
        desired.axis[1] = -5.0;
        objects.stabilization_desired.set(desired);
        outer.run(&objects, &mut cache, &mut alt, &status, DT);
        assert!(!outer.pitch_max);
        assert_eq!(objects.rate_desired.get().axis[1], -5.0);
    }

    #[test]
    fn rattitude_blends_toward_rate_at_full_stick() {
        let (objects, mut outer, mut cache, mut alt) =
            setup([StabilizationMode::Rattitude; AXES]);
        objects.attitude_state.set(AttitudeState::default());

        // Full roll stick: essentially pure rate response.
        let mut desired = objects.stabilization_desired.get();
        desired.axis[0] = cache.bank.roll_max; // stick = 1.0
        objects.stabilization_desired.set(desired);
        let status = derive_status(&objects.stabilization_desired.get().mode);
        outer.run(&objects, &mut cache, &mut alt, &status, DT);
        let full = objects.rate_desired.get().axis[0];
        assert!(
            (full - cache.bank.manual_rate[0]).abs() / cache.bank.manual_rate[0] < 0.4,
            "full-stick rate {full}"
        );

        // Small stick: dominated by the attitude loop (small rates).
        let mut desired = objects.stabilization_desired.get();
        desired.axis[0] = cache.bank.roll_max * 0.05;
        objects.stabilization_desired.set(desired);
        outer.run(&objects, &mut cache, &mut alt, &status, DT);
        let small = objects.rate_desired.get().axis[0];
        assert!(small.abs() < full.abs() * 0.5);
    }
}
