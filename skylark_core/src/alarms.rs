//! Alarm record manipulation.
//!
//! Thin wrapper over the `SystemAlarms` bus object. Setters are
//! read-modify-write of the whole record; only the owning subsystem writes
//! its slot, so slot-level races do not arise in practice.

use skylark_bus::Object;
use skylark_common::alarms::{AlarmLevel, AlarmSlot, ExtendedAlarmStatus, SystemAlarms};
use tracing::warn;

/// Handle used by subsystems to raise and clear their alarm slot.
#[derive(Clone)]
pub struct Alarms {
    object: Object<SystemAlarms>,
}

impl Alarms {
    pub fn new(object: Object<SystemAlarms>) -> Self {
        Self { object }
    }

    pub fn get(&self, slot: AlarmSlot) -> AlarmLevel {
        self.object.get().get(slot)
    }

    pub fn set(&self, slot: AlarmSlot, level: AlarmLevel) {
        let mut alarms = self.object.get();
        if alarms.get(slot) == level {
            return;
        }
        if level >= AlarmLevel::Critical {
            warn!(?slot, ?level, "alarm escalated");
        }
        alarms.set(slot, level);
        self.object.set(alarms);
    }

    /// Set a slot together with the extended `(status, substatus)` detail.
    pub fn set_extended(
        &self,
        slot: AlarmSlot,
        level: AlarmLevel,
        status: ExtendedAlarmStatus,
        substatus: u8,
    ) {
        let mut alarms = self.object.get();
        alarms.set(slot, level);
        alarms.extended_status = status;
        alarms.extended_substatus = substatus;
        self.object.set(alarms);
        if level >= AlarmLevel::Critical {
            warn!(?slot, ?status, substatus, "alarm escalated");
        }
    }

    /// Return the slot to `Ok`, clearing extended detail it owned.
    pub fn clear(&self, slot: AlarmSlot) {
        let mut alarms = self.object.get();
        if alarms.get(slot) == AlarmLevel::Ok {
            return;
        }
        alarms.set(slot, AlarmLevel::Ok);
        if slot == AlarmSlot::SystemConfiguration {
            alarms.extended_status = ExtendedAlarmStatus::None;
            alarms.extended_substatus = 0;
        }
        self.object.set(alarms);
    }

    /// Whole-record snapshot.
    pub fn snapshot(&self) -> SystemAlarms {
        self.object.get()
    }
}
