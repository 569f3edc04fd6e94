//! Actuator mixer.
//!
//! Maps the normalized `ActuatorDesired` through the configured mixer
//! matrix onto output channels, gated by the arming state: a disarmed
//! craft gets failsafe pulses on motors and neutral on servos. The wire
//! encodings (PWM pulse trains, DShot frames) live in the IO layer; this
//! stage produces the per-channel µs-like command values.

use std::sync::Arc;

use skylark_common::consts::ACTUATOR_CHANNELS;
use skylark_common::math::boundf;
use skylark_common::objects::{ActuatorCommand, ActuatorSettings, ArmedState};
use tracing::trace;

use crate::objects::FlightObjects;

pub struct ActuatorMixer {
    objects: Arc<FlightObjects>,
}

impl ActuatorMixer {
    pub fn new(objects: Arc<FlightObjects>) -> Self {
        Self { objects }
    }

    /// Mix the current demand into channel commands and publish them.
    pub fn tick(&mut self) {
        let desired = self.objects.actuator_desired.get();
        let settings = self.objects.settings.actuator.get();
        let armed = self.objects.flight_status.get().armed == ArmedState::Armed;

        let demand = [desired.roll, desired.pitch, desired.yaw, desired.thrust];
        let mut cmd = ActuatorCommand::default();

        for ch in 0..ACTUATOR_CHANNELS {
            cmd.channel[ch] = Self::mix_channel(&settings, ch, &demand, armed);
        }

        trace!(channels = ?cmd.channel, "actuator command");
        self.objects.actuator_command.set(cmd);
    }

    fn mix_channel(
        settings: &ActuatorSettings,
        ch: usize,
        demand: &[f32; 4],
        armed: bool,
    ) -> u16 {
        let mix = settings.mixer[ch];
        let is_motor = mix[3] > 0.0;
        let unused = mix.iter().all(|&m| m == 0.0);
        let min = settings.channel_min[ch];
        let max = settings.channel_max[ch];
        let neutral = settings.channel_neutral[ch];

        if unused {
            return neutral;
        }

        if is_motor {
            if !armed {
                // Failsafe: motors at the low end of their range.
                return min;
            }
            let thrust = demand[3] * mix[3];
            let correction =
                demand[0] * mix[0] + demand[1] * mix[1] + demand[2] * mix[2];
            // Attitude authority scales with commanded thrust so a motor
            // never reverses.
            let value = boundf(thrust + correction * thrust.min(1.0), 0.0, 1.0);
            let span = (max - min) as f32;
            min + (value * span) as u16
        } else {
            // Servos center on neutral and deflect symmetrically.
            let value = boundf(
                demand[0] * mix[0] + demand[1] * mix[1] + demand[2] * mix[2],
                -1.0,
                1.0,
            );
            let span = ((max - min) / 2) as f32;
            let out = neutral as f32 + value * span;
            out.clamp(min as f32, max as f32) as u16
        }
    }
}

/// DShot bit timings in processor cycles for a given core clock and
/// bit rate [kbit/s]. The adjustment constant absorbs the GPIO write
/// overhead of the bit-bang loop.
pub fn dshot_bit_timings(core_hz: u32, rate_kbps: u32) -> DshotTimings {
    let cycles_per_kbit = core_hz / rate_kbps;
    DshotTimings {
        t0h: cycles_per_kbit / 2666 - DSHOT_TIMING_ADJUST,
        t1h: cycles_per_kbit / 1333 - DSHOT_TIMING_ADJUST,
        period: cycles_per_kbit / 1000 - DSHOT_TIMING_ADJUST,
    }
}

const DSHOT_TIMING_ADJUST: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DshotTimings {
    /// High time of a zero bit [cycles].
    pub t0h: u32,
    /// High time of a one bit [cycles].
    pub t1h: u32,
    /// Total bit period [cycles].
    pub period: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylark_common::objects::{ActuatorDesired, FlightStatus};

    #[test]
    fn disarmed_motors_sit_at_minimum() {
        let objects = FlightObjects::new_default();
        objects.actuator_desired.set(ActuatorDesired {
            thrust: 0.8,
            ..Default::default()
        });
        let mut mixer = ActuatorMixer::new(Arc::clone(&objects));
        mixer.tick();
        let cmd = objects.actuator_command.get();
        for ch in 0..4 {
            assert_eq!(cmd.channel[ch], 1000, "channel {ch}");
        }
    }

    #[test]
    fn armed_thrust_raises_all_motors() {
        let objects = FlightObjects::new_default();
        objects.flight_status.set(FlightStatus {
            armed: ArmedState::Armed,
            ..Default::default()
        });
        objects.actuator_desired.set(ActuatorDesired {
            thrust: 0.5,
            ..Default::default()
        });
        let mut mixer = ActuatorMixer::new(Arc::clone(&objects));
        mixer.tick();
        let cmd = objects.actuator_command.get();
        for ch in 0..4 {
            assert_eq!(cmd.channel[ch], 1500, "channel {ch}");
        }
        // Unused channels stay at neutral.
        assert_eq!(cmd.channel[6], 1000);
    }

    #[test]
    fn roll_demand_differentiates_the_motors() {
        let objects = FlightObjects::new_default();
        objects.flight_status.set(FlightStatus {
            armed: ArmedState::Armed,
            ..Default::default()
        });
        objects.actuator_desired.set(ActuatorDesired {
            roll: 0.2,
            thrust: 0.5,
            ..Default::default()
        });
        let mut mixer = ActuatorMixer::new(Arc::clone(&objects));
        mixer.tick();
        let cmd = objects.actuator_command.get();
        // QuadX default mixer: channels 1,2 carry +roll, 0,3 −roll.
        assert!(cmd.channel[1] > cmd.channel[0]);
        assert!(cmd.channel[2] > cmd.channel[3]);
    }

    #[test]
    fn dshot_timings_match_the_divisors() {
        // 168 MHz core, DShot600.
        let t = dshot_bit_timings(168_000_000, 600);
        assert_eq!(t.t0h, 168_000_000 / 600 / 2666 - 8);
        assert_eq!(t.t1h, 168_000_000 / 600 / 1333 - 8);
        assert_eq!(t.period, 168_000_000 / 600 / 1000 - 8);
    }
}
