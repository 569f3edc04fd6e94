//! Pre-arm configuration sanity check.
//!
//! Runs on every arming request and after relevant settings changes.
//! Validates each flight-mode slot against the airframe, board class and
//! fusion algorithm, checks the thrust input range, and consults any
//! registered custom hooks. The first offender lands in the extended
//! alarm `(status, substatus)`.

use std::sync::Arc;

use skylark_common::alarms::{AlarmLevel, AlarmSlot, ExtendedAlarmStatus};
use skylark_common::consts::{FLIGHT_MODE_SLOTS, MIN_THRUST_CHANNEL_RANGE};
use skylark_common::objects::{
    BoardClass, FlightMode, FlightModeAssist, FrameClass, StabilizationMode, ThrustControl,
};
use tracing::debug;

use crate::alarms::Alarms;
use crate::objects::FlightObjects;

/// A plugin check; returning `Some(status)` raises `Critical`.
pub type CustomHook = Box<dyn Fn() -> Option<ExtendedAlarmStatus> + Send>;

pub struct SanityCheck {
    objects: Arc<FlightObjects>,
    alarms: Alarms,
    hooks: Vec<CustomHook>,
}

/// Accumulates "first failure wins" severity like the alarm layer expects.
struct Severity {
    level: AlarmLevel,
    status: ExtendedAlarmStatus,
    substatus: u8,
}

impl Severity {
    fn new() -> Self {
        Self {
            level: AlarmLevel::Ok,
            status: ExtendedAlarmStatus::None,
            substatus: 0,
        }
    }

    /// Latch `Critical` on the first failed check.
    fn add(&mut self, check: bool) {
        if self.level == AlarmLevel::Ok && !check {
            self.level = AlarmLevel::Critical;
        }
    }

    /// Record where it went wrong, once.
    fn mark(&mut self, status: ExtendedAlarmStatus, substatus: u8) {
        if self.level != AlarmLevel::Ok && self.status == ExtendedAlarmStatus::None {
            self.status = status;
            self.substatus = substatus;
        }
    }
}

impl SanityCheck {
    pub fn new(objects: Arc<FlightObjects>) -> Self {
        let alarms = Alarms::new(objects.system_alarms.clone());
        Self {
            objects,
            alarms,
            hooks: Vec::new(),
        }
    }

    /// Register a plugin hook consulted on every check.
    pub fn register_hook(&mut self, hook: CustomHook) {
        self.hooks.push(hook);
    }

    /// Run the full configuration check and publish the result on the
    /// `SystemConfiguration` alarm slot. Returns the resulting level.
    pub fn configuration_check(&self) -> AlarmLevel {
        let system = self.objects.settings.system.get();
        let flight_modes = self.objects.settings.flight_modes.get();
        let stabilization = self.objects.settings.stabilization.get();
        let manual = self.objects.settings.manual_control.get();

        let coptercontrol = system.board_class == BoardClass::CopterControl;
        let nav_capable = system.fusion_algorithm.nav_capable();
        let multirotor = system.airframe.class() == FrameClass::Multirotor;

        let mut severity = Severity::new();

        let slots = usize::from(manual.flight_mode_number).min(FLIGHT_MODE_SLOTS);
        for i in 0..slots {
            let gps_assisted =
                stabilization.flight_mode_assist_map[i] == FlightModeAssist::GpsAssist;
            if gps_assisted {
                severity.add(!coptercontrol);
                severity.add(multirotor);
                severity.add(nav_capable);
            }

            match flight_modes.flight_mode_position[i] {
                FlightMode::Manual => {
                    severity.add(!gps_assisted);
                    severity.add(!multirotor);
                }
                mode @ (FlightMode::Stabilized1
                | FlightMode::Stabilized2
                | FlightMode::Stabilized3
                | FlightMode::Stabilized4
                | FlightMode::Stabilized5
                | FlightMode::Stabilized6) => {
                    let slot = mode.stabilized_slot().unwrap_or(1);
                    severity.add(check_stabilization_settings(
                        &flight_modes.stabilization_settings[slot - 1],
                        multirotor,
                        coptercontrol,
                        gps_assisted,
                    ));
                }
                FlightMode::PathPlanner => {
                    severity.add(!gps_assisted);
                    severity.add(!coptercontrol);
                    severity.add(nav_capable);
                }
                FlightMode::PositionHold
                | FlightMode::VelocityRoam
                | FlightMode::Land
                | FlightMode::AutoTakeoff => {
                    severity.add(!coptercontrol);
                    severity.add(nav_capable);
                }
                FlightMode::ReturnToBase => {
                    severity.add(!gps_assisted);
                    severity.add(!coptercontrol);
                    severity.add(nav_capable);
                }
                FlightMode::AutoTune => {
                    severity.add(!gps_assisted);
                    severity.add(multirotor);
                }
            }
            severity.mark(ExtendedAlarmStatus::FlightMode, i as u8);
        }

        // The thrust input channel must have a usable range; a critical
        // control squeezed into a dead span will not arm.
        match system.thrust_control {
            ThrustControl::Throttle => {
                severity.add((manual.throttle_max - manual.throttle_min).abs()
                    > MIN_THRUST_CHANNEL_RANGE);
                severity.mark(ExtendedAlarmStatus::BadThrottleOrCollectiveInputRange, 0);
            }
            ThrustControl::Collective => {
                severity.add((manual.collective_max - manual.collective_min).abs()
                    > MIN_THRUST_CHANNEL_RANGE);
                severity.mark(ExtendedAlarmStatus::BadThrottleOrCollectiveInputRange, 0);
            }
            ThrustControl::None => {}
        }

        if severity.level < AlarmLevel::Critical {
            for hook in &self.hooks {
                if let Some(status) = hook() {
                    severity.level = AlarmLevel::Critical;
                    severity.status = status;
                    break;
                }
            }
        }

        let mut level = severity.level;
        if flight_modes.disable_sanity_checks && level != AlarmLevel::Ok {
            level = AlarmLevel::Warning;
        }

        if level != AlarmLevel::Ok {
            debug!(
                ?level,
                status = ?severity.status,
                substatus = severity.substatus,
                "configuration check failed"
            );
            self.alarms.set_extended(
                AlarmSlot::SystemConfiguration,
                level,
                severity.status,
                severity.substatus,
            );
        } else {
            self.alarms.clear(AlarmSlot::SystemConfiguration);
        }
        level
    }
}

/// Validate one stabilized slot's per-axis mode selection.
fn check_stabilization_settings(
    modes: &[StabilizationMode; 4],
    multirotor: bool,
    coptercontrol: bool,
    gps_assisted: bool,
) -> bool {
    // A multirotor with an unstabilized axis is a spin waiting to happen.
    if multirotor
        && modes[..3]
            .iter()
            .any(|&m| m == StabilizationMode::Manual)
    {
        return false;
    }

    // GPS assist flies the attitude envelope; roll/pitch must be in an
    // attitude-shaped mode.
    if gps_assisted
        && !modes[..2].iter().all(|&m| {
            m == StabilizationMode::Attitude || m == StabilizationMode::Rattitude
        })
    {
        return false;
    }

    // No barometer, no altitude modes.
    if coptercontrol
        && matches!(
            modes[3],
            StabilizationMode::AltitudeHold | StabilizationMode::AltitudeVario
        )
    {
        return false;
    }

    // Altitude modes only make sense on the thrust axis.
    if modes[..3].iter().any(|&m| {
        matches!(
            m,
            StabilizationMode::AltitudeHold | StabilizationMode::AltitudeVario
        )
    }) {
        return false;
    }

    if !matches!(
        modes[3],
        StabilizationMode::Manual
            | StabilizationMode::AltitudeHold
            | StabilizationMode::AltitudeVario
            | StabilizationMode::CruiseControl
    ) {
        return false;
    }

    // Acro+ under cruise control: the attitude estimate cannot be trusted.
    if modes[3] == StabilizationMode::CruiseControl
        && modes[..2].iter().any(|&m| m == StabilizationMode::Acro)
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylark_common::objects::AirframeType;

    fn check_with(mutate: impl FnOnce(&Arc<FlightObjects>)) -> (AlarmLevel, Arc<FlightObjects>) {
        let objects = FlightObjects::new_default();
        mutate(&objects);
        let sanity = SanityCheck::new(Arc::clone(&objects));
        let level = sanity.configuration_check();
        (level, objects)
    }

    #[test]
    fn default_configuration_is_sane() {
        let (level, _) = check_with(|_| {});
        assert_eq!(level, AlarmLevel::Ok);
    }

    #[test]
    fn manual_mode_on_a_multirotor_is_rejected() {
        // Spec regression: slot 0 Manual on QuadX → Critical/FlightMode/0.
        let (level, objects) = check_with(|objects| {
            let mut fm = objects.settings.flight_modes.get();
            fm.flight_mode_position[0] = FlightMode::Manual;
            objects.settings.flight_modes.set(fm);
        });
        assert_eq!(level, AlarmLevel::Critical);
        let alarms = objects.system_alarms.get();
        assert_eq!(alarms.extended_status, ExtendedAlarmStatus::FlightMode);
        assert_eq!(alarms.extended_substatus, 0);
    }

    #[test]
    fn manual_mode_is_fine_on_a_fixed_wing() {
        let (level, _) = check_with(|objects| {
            let mut sys = objects.settings.system.get();
            sys.airframe = AirframeType::FixedWing;
            objects.settings.system.set(sys);
            let mut fm = objects.settings.flight_modes.get();
            fm.flight_mode_position[0] = FlightMode::Manual;
            objects.settings.flight_modes.set(fm);
        });
        assert_eq!(level, AlarmLevel::Ok);
    }

    #[test]
    fn altitude_hold_rejected_on_coptercontrol_boards() {
        let (level, _) = check_with(|objects| {
            let mut sys = objects.settings.system.get();
            sys.board_class = BoardClass::CopterControl;
            objects.settings.system.set(sys);
            let mut fm = objects.settings.flight_modes.get();
            fm.stabilization_settings[0][3] = StabilizationMode::AltitudeHold;
            objects.settings.flight_modes.set(fm);
        });
        assert_eq!(level, AlarmLevel::Critical);
    }

    #[test]
    fn altitude_mode_rejected_on_rotation_axes() {
        let (level, _) = check_with(|objects| {
            let mut fm = objects.settings.flight_modes.get();
            fm.stabilization_settings[0][0] = StabilizationMode::AltitudeHold;
            objects.settings.flight_modes.set(fm);
        });
        assert_eq!(level, AlarmLevel::Critical);
    }

    #[test]
    fn acro_with_cruise_control_thrust_is_rejected() {
        let (level, _) = check_with(|objects| {
            let mut fm = objects.settings.flight_modes.get();
            fm.stabilization_settings[0] = [
                StabilizationMode::Acro,
                StabilizationMode::Acro,
                StabilizationMode::Rate,
                StabilizationMode::CruiseControl,
            ];
            objects.settings.flight_modes.set(fm);
        });
        assert_eq!(level, AlarmLevel::Critical);
    }

    #[test]
    fn narrow_throttle_range_is_rejected() {
        let (level, objects) = check_with(|objects| {
            let mut mc = objects.settings.manual_control.get();
            mc.throttle_min = 1500.0;
            mc.throttle_max = 1600.0;
            objects.settings.manual_control.set(mc);
        });
        assert_eq!(level, AlarmLevel::Critical);
        assert_eq!(
            objects.system_alarms.get().extended_status,
            ExtendedAlarmStatus::BadThrottleOrCollectiveInputRange
        );
    }

    #[test]
    fn disabled_checks_downgrade_to_warning() {
        let (level, _) = check_with(|objects| {
            let mut fm = objects.settings.flight_modes.get();
            fm.flight_mode_position[0] = FlightMode::Manual;
            fm.disable_sanity_checks = true;
            objects.settings.flight_modes.set(fm);
        });
        assert_eq!(level, AlarmLevel::Warning);
    }

    #[test]
    fn custom_hook_raises_critical() {
        let objects = FlightObjects::new_default();
        let mut sanity = SanityCheck::new(Arc::clone(&objects));
        sanity.register_hook(Box::new(|| Some(ExtendedAlarmStatus::CustomHook)));
        assert_eq!(sanity.configuration_check(), AlarmLevel::Critical);
        assert_eq!(
            objects.system_alarms.get().extended_status,
            ExtendedAlarmStatus::CustomHook
        );
    }

    #[test]
    fn gps_assist_requires_nav_capable_fusion() {
        let (level, _) = check_with(|objects| {
            let mut st = objects.settings.stabilization.get();
            st.flight_mode_assist_map[0] = FlightModeAssist::GpsAssist;
            objects.settings.stabilization.set(st);
            // fusion stays ComplementaryFilter: not nav capable
        });
        assert_eq!(level, AlarmLevel::Critical);
    }
}
