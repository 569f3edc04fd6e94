//! The typed object-bus instance shared by all flight modules.
//!
//! One channel per record type, created once at init. Modules clone the
//! handles they need; nothing here is created or destroyed afterwards.

use std::sync::Arc;

use skylark_bus::{Object, ObjectArray};
use skylark_common::alarms::SystemAlarms;
use skylark_common::config::CoreConfig;
use skylark_common::consts::ACCESSORY_CHANNELS;
use skylark_common::objects::*;

/// Settings records, seeded from the loaded configuration.
pub struct SettingsObjects {
    pub system: Object<SystemSettings>,
    pub attitude: Object<AttitudeSettings>,
    pub stabilization: Object<StabilizationSettings>,
    pub bank1: Object<StabilizationBank>,
    pub bank2: Object<StabilizationBank>,
    pub bank3: Object<StabilizationBank>,
    pub flight_modes: Object<FlightModeSettings>,
    pub manual_control: Object<ManualControlSettings>,
    pub path_follower: Object<PathFollowerSettings>,
    pub actuator: Object<ActuatorSettings>,
}

impl SettingsObjects {
    pub fn bank(&self, index: u8) -> &Object<StabilizationBank> {
        match index {
            0 => &self.bank1,
            1 => &self.bank2,
            _ => &self.bank3,
        }
    }
}

/// Every record the flight core exchanges over the bus.
pub struct FlightObjects {
    // Sensor / estimated state
    pub gyro_state: Object<GyroState>,
    pub accel_state: Object<AccelState>,
    pub mag_state: Object<MagState>,
    pub baro_state: Object<BaroState>,
    pub attitude_state: Object<AttitudeState>,
    pub position_state: Object<PositionState>,
    pub velocity_state: Object<VelocityState>,

    // Pilot input
    pub manual_control: Object<ManualControlCommand>,
    pub accessory_desired: ObjectArray<AccessoryDesired, ACCESSORY_CHANNELS>,

    // Control chain
    pub stabilization_desired: Object<StabilizationDesired>,
    pub stabilization_status: Object<StabilizationStatus>,
    /// The currently active tuning bank.
    pub stabilization_bank: Object<StabilizationBank>,
    pub rate_desired: Object<RateDesired>,
    pub actuator_desired: Object<ActuatorDesired>,
    pub actuator_command: Object<ActuatorCommand>,

    // Autopilot
    pub path_desired: Object<PathDesired>,
    pub path_status: Object<PathStatus>,
    pub velocity_desired: Object<VelocityDesired>,

    // System
    pub flight_status: Object<FlightStatus>,
    pub system_alarms: Object<SystemAlarms>,

    pub settings: SettingsObjects,
}

impl FlightObjects {
    /// Create the bus, seeding settings records from the configuration.
    pub fn from_config(config: &CoreConfig) -> Arc<Self> {
        Arc::new(Self {
            gyro_state: Object::new("GyroState"),
            accel_state: Object::new("AccelState"),
            mag_state: Object::new("MagState"),
            baro_state: Object::new("BaroState"),
            attitude_state: Object::new("AttitudeState"),
            position_state: Object::new("PositionState"),
            velocity_state: Object::new("VelocityState"),
            manual_control: Object::new("ManualControlCommand"),
            accessory_desired: ObjectArray::new("AccessoryDesired"),
            stabilization_desired: Object::new("StabilizationDesired"),
            stabilization_status: Object::new("StabilizationStatus"),
            stabilization_bank: Object::with_initial("StabilizationBank", config.banks[0]),
            rate_desired: Object::new("RateDesired"),
            actuator_desired: Object::new("ActuatorDesired"),
            actuator_command: Object::new("ActuatorCommand"),
            path_desired: Object::new("PathDesired"),
            path_status: Object::new("PathStatus"),
            velocity_desired: Object::new("VelocityDesired"),
            flight_status: Object::new("FlightStatus"),
            system_alarms: Object::new("SystemAlarms"),
            settings: SettingsObjects {
                system: Object::with_initial("SystemSettings", config.system),
                attitude: Object::with_initial("AttitudeSettings", config.attitude),
                stabilization: Object::with_initial("StabilizationSettings", config.stabilization),
                bank1: Object::with_initial("StabilizationBank1", config.banks[0]),
                bank2: Object::with_initial("StabilizationBank2", config.banks[1]),
                bank3: Object::with_initial("StabilizationBank3", config.banks[2]),
                flight_modes: Object::with_initial("FlightModeSettings", config.flight_modes),
                manual_control: Object::with_initial(
                    "ManualControlSettings",
                    config.manual_control,
                ),
                path_follower: Object::with_initial("PathFollowerSettings", config.path_follower),
                actuator: Object::with_initial("ActuatorSettings", config.actuator),
            },
        })
    }

    /// A bus seeded from the default configuration (tests, benches).
    pub fn new_default() -> Arc<Self> {
        Self::from_config(&CoreConfig::default())
    }
}
