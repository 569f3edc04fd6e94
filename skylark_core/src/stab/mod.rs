//! Stabilization cascade: outer attitude loop, inner rate loop.
//!
//! Runs on every gyro sample. The per-axis [`StabilizationMode`] selected
//! by the flight-mode slot decomposes into an (outer, inner) pair; the
//! outer loop turns desired angles into rate targets (optionally
//! subsampled), the inner loop turns rate targets into actuator demands.
//!
//! Mode transitions reset the PID integrator on the affected axis; when
//! not armed (or armed at low throttle with `LowThrottleZeroIntegral`)
//! every axis re-arms for reinit on the next tick.

mod altitude;
mod cruisecontrol;
mod innerloop;
mod outerloop;

pub use altitude::{AltitudeLoop, AltitudeMode};
pub use cruisecontrol::cruise_control_factor;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use skylark_common::alarms::{AlarmLevel, AlarmSlot};
use skylark_common::consts::{AXES, OUTER_LOOP_SKIP, ROTATION_AXES, SENSOR_PERIOD_S};
use skylark_common::math::LowPass;
use skylark_common::objects::{
    ArmedState, InnerLoopMode, OuterLoopMode, StabilizationBank, StabilizationMode,
    StabilizationSettings, StabilizationStatus,
};
use tracing::debug;

use crate::alarms::Alarms;
use crate::objects::FlightObjects;

use innerloop::InnerLoop;
use outerloop::OuterLoop;

/// Decompose one per-axis stabilization mode into its loop pair.
///
/// Index 3 is the thrust axis, where only Manual / AltitudeHold /
/// AltitudeVario / CruiseControl are meaningful.
pub fn decompose_mode(mode: StabilizationMode) -> (OuterLoopMode, InnerLoopMode) {
    match mode {
        StabilizationMode::Manual => (OuterLoopMode::Direct, InnerLoopMode::Direct),
        StabilizationMode::Rate => (OuterLoopMode::Direct, InnerLoopMode::Rate),
        StabilizationMode::RateTrainer => (OuterLoopMode::DirectWithLimits, InnerLoopMode::Rate),
        StabilizationMode::Attitude => (OuterLoopMode::Attitude, InnerLoopMode::Rate),
        StabilizationMode::AxisLock => (OuterLoopMode::Direct, InnerLoopMode::AxisLock),
        StabilizationMode::WeakLeveling => (OuterLoopMode::WeakLeveling, InnerLoopMode::Rate),
        StabilizationMode::VirtualBar => (OuterLoopMode::Direct, InnerLoopMode::VirtualFlybar),
        StabilizationMode::Acro => (OuterLoopMode::Direct, InnerLoopMode::Acro),
        StabilizationMode::Rattitude => (OuterLoopMode::Rattitude, InnerLoopMode::Rate),
        StabilizationMode::AltitudeHold => {
            (OuterLoopMode::Altitude, InnerLoopMode::CruiseControl)
        }
        StabilizationMode::AltitudeVario => {
            (OuterLoopMode::AltitudeVario, InnerLoopMode::CruiseControl)
        }
        StabilizationMode::CruiseControl => (OuterLoopMode::Direct, InnerLoopMode::CruiseControl),
        StabilizationMode::SystemIdent => (OuterLoopMode::Attitude, InnerLoopMode::SystemIdent),
    }
}

/// Derive the loop-status matrix from the desired per-axis modes.
pub fn derive_status(modes: &[StabilizationMode; AXES]) -> StabilizationStatus {
    let mut status = StabilizationStatus::default();
    for (t, &mode) in modes.iter().enumerate() {
        let (outer, inner) = decompose_mode(mode);
        // SystemIdent excites roll/pitch through attitude; yaw stays direct.
        if mode == StabilizationMode::SystemIdent && t == 2 {
            status.outer[t] = OuterLoopMode::Direct;
        } else {
            status.outer[t] = outer;
        }
        status.inner[t] = inner;
    }
    status
}

/// Settings shared by both loops, recomputed only when the source records
/// change.
pub(crate) struct StabCache {
    pub settings: StabilizationSettings,
    pub bank: StabilizationBank,
    /// Rattitude transition stick position in (0, 1].
    pub rattitude_transition: f32,
    /// Feed-forward gyro filters, one per rotational axis.
    pub feed_forward_filter: [LowPass; ROTATION_AXES],
    /// Gyro low-pass for feed-forward and axis lock.
    pub gyro_filter: [LowPass; ROTATION_AXES],
    /// Acro insanity factors scaled to [0, 1].
    pub acro_factor: [f32; ROTATION_AXES],
}

impl StabCache {
    fn rebuild(settings: StabilizationSettings, bank: StabilizationBank) -> Self {
        // A nominal dt keeps the alphas stable against loop jitter.
        let dt = SENSOR_PERIOD_S;
        let transition = if settings.rattitude_mode_transition < 10 {
            0.10
        } else {
            f32::from(settings.rattitude_mode_transition) / 100.0
        };
        Self {
            settings,
            bank,
            rattitude_transition: transition,
            feed_forward_filter: core::array::from_fn(|t| {
                LowPass::from_tau(bank.attitude_feed_forward[t] * 0.1, dt)
            }),
            gyro_filter: core::array::from_fn(|_| LowPass::from_tau(settings.gyro_tau, dt)),
            acro_factor: core::array::from_fn(|t| bank.acro_insanity_factor[t] * 0.01),
        }
    }
}

/// The cascade. Owned by the gyro-rate scheduler callback.
pub struct Stabilization {
    objects: Arc<FlightObjects>,
    alarms: Alarms,
    cache: StabCache,
    settings_dirty: Arc<AtomicBool>,
    cur_flight_mode: Option<u8>,

    outer: OuterLoop,
    inner: InnerLoop,
    altitude: AltitudeLoop,

    tick: u32,
    published_status: StabilizationStatus,
}

impl Stabilization {
    pub fn new(objects: Arc<FlightObjects>) -> Self {
        let alarms = Alarms::new(objects.system_alarms.clone());
        let settings_dirty = Arc::new(AtomicBool::new(false));
        {
            let dirty = Arc::clone(&settings_dirty);
            objects
                .settings
                .stabilization
                .connect_callback(move |_| dirty.store(true, Ordering::Release));
        }
        for bank_obj in [
            &objects.settings.bank1,
            &objects.settings.bank2,
            &objects.settings.bank3,
        ] {
            let dirty = Arc::clone(&settings_dirty);
            bank_obj.connect_callback(move |_| dirty.store(true, Ordering::Release));
        }

        let settings = objects.settings.stabilization.get();
        let bank = objects.settings.bank1.get();
        let cache = StabCache::rebuild(settings, bank);
        let altitude = AltitudeLoop::new(settings.altitude);

        let mut stab = Self {
            objects,
            alarms,
            cache,
            settings_dirty,
            cur_flight_mode: None,
            outer: OuterLoop::new(),
            inner: InnerLoop::new(),
            altitude,
            tick: 0,
            published_status: StabilizationStatus::default(),
        };
        stab.reload_bank_for_mode(0);
        stab
    }

    /// One gyro sample: outer loop every `OUTER_LOOP_SKIP` ticks, inner
    /// loop every tick.
    pub fn gyro_tick(&mut self, dt: f32) {
        self.refresh_settings();

        let desired = self.objects.stabilization_desired.get();
        let status = derive_status(&desired.mode);
        if status != self.published_status {
            self.objects.stabilization_status.set(status);
            self.published_status = status;
        }

        // Feed the shared gyro filters once per sample.
        let gyro = self.objects.gyro_state.get();
        let rates = [gyro.x, gyro.y, gyro.z];
        for t in 0..ROTATION_AXES {
            self.cache.gyro_filter[t].apply(rates[t]);
            self.cache.feed_forward_filter[t].apply(rates[t]);
        }

        // Disarmed (or armed with low throttle, when configured) re-arms
        // every axis for integrator reinit.
        let flight_status = self.objects.flight_status.get();
        let throttle = self.objects.manual_control.get().throttle;
        if flight_status.armed != ArmedState::Armed
            || (self.cache.settings.low_throttle_zero_integral && throttle < 0.0)
        {
            self.outer.force_reinit();
            self.inner.force_reinit();
        }

        if self.tick % OUTER_LOOP_SKIP == 0 {
            let outer_dt = dt * OUTER_LOOP_SKIP as f32;
            self.outer.run(
                &self.objects,
                &mut self.cache,
                &mut self.altitude,
                &status,
                outer_dt,
            );
        }
        self.tick = self.tick.wrapping_add(1);

        self.inner
            .run(&self.objects, &mut self.cache, &status, rates, dt);

        self.alarms.set(AlarmSlot::Stabilization, AlarmLevel::Ok);
    }

    fn refresh_settings(&mut self) {
        if self.settings_dirty.swap(false, Ordering::AcqRel) {
            let settings = self.objects.settings.stabilization.get();
            self.cache = StabCache::rebuild(settings, self.cache.bank);
            self.altitude.configure(settings.altitude);
            self.cur_flight_mode = None; // force bank re-selection
            self.configure_pids();
        }
        let switch_pos = self
            .objects
            .manual_control
            .get()
            .flight_mode_switch_position;
        if self.cur_flight_mode != Some(switch_pos) {
            self.cur_flight_mode = Some(switch_pos);
            self.reload_bank_for_mode(switch_pos);
        }
    }

    fn reload_bank_for_mode(&mut self, switch_pos: u8) {
        let map = self.cache.settings.flight_mode_map;
        let bank_index = map
            .get(usize::from(switch_pos))
            .copied()
            .unwrap_or(0)
            .min(2);
        let bank = self.objects.settings.bank(bank_index).get();
        self.cache = StabCache::rebuild(self.cache.settings, bank);
        self.objects.stabilization_bank.set(bank);
        self.configure_pids();
        debug!(switch_pos, bank_index, "stabilization bank selected");
    }

    fn configure_pids(&mut self) {
        let bank = &self.cache.bank;
        let s = &self.cache.settings;
        self.inner.configure(bank, s);
        self.outer.configure(bank);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_table_matches_the_cascade_contract() {
        assert_eq!(
            decompose_mode(StabilizationMode::Attitude),
            (OuterLoopMode::Attitude, InnerLoopMode::Rate)
        );
        assert_eq!(
            decompose_mode(StabilizationMode::Manual),
            (OuterLoopMode::Direct, InnerLoopMode::Direct)
        );
        assert_eq!(
            decompose_mode(StabilizationMode::Rattitude),
            (OuterLoopMode::Rattitude, InnerLoopMode::Rate)
        );
        assert_eq!(
            decompose_mode(StabilizationMode::AltitudeHold),
            (OuterLoopMode::Altitude, InnerLoopMode::CruiseControl)
        );
        assert_eq!(
            decompose_mode(StabilizationMode::AxisLock),
            (OuterLoopMode::Direct, InnerLoopMode::AxisLock)
        );
    }

    #[test]
    fn system_ident_keeps_yaw_direct() {
        let modes = [StabilizationMode::SystemIdent; AXES];
        let status = derive_status(&modes);
        assert_eq!(status.outer[0], OuterLoopMode::Attitude);
        assert_eq!(status.outer[2], OuterLoopMode::Direct);
        assert_eq!(status.inner[2], InnerLoopMode::SystemIdent);
    }
}
