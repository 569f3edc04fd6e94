//! Alarm taxonomy and the `SystemAlarms` record.
//!
//! Each subsystem owns exactly one alarm slot. Alarms are an observability
//! layer on top of `Result`-based error handling: operations return errors,
//! callers escalate alarms, nothing is silently swallowed.

use serde::{Deserialize, Serialize};

/// Severity of one alarm slot, ordered from least to most severe.
///
/// `Uninitialised` sorts lowest: a subsystem that never started is not an
/// armed-flight hazard by itself, its gate lives elsewhere.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum AlarmLevel {
    #[default]
    Uninitialised = 0,
    Ok = 1,
    Warning = 2,
    Error = 3,
    Critical = 4,
}

/// The subsystems that own an alarm slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmSlot {
    Attitude,
    Stabilization,
    Guidance,
    Receiver,
    Telemetry,
    Gps,
    I2c,
    SystemConfiguration,
    BootFault,
}

/// Number of alarm slots.
pub const ALARM_SLOTS: usize = 9;

impl AlarmSlot {
    pub const ALL: [AlarmSlot; ALARM_SLOTS] = [
        AlarmSlot::Attitude,
        AlarmSlot::Stabilization,
        AlarmSlot::Guidance,
        AlarmSlot::Receiver,
        AlarmSlot::Telemetry,
        AlarmSlot::Gps,
        AlarmSlot::I2c,
        AlarmSlot::SystemConfiguration,
        AlarmSlot::BootFault,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Slots whose `Critical` level does not block arming.
    #[inline]
    pub fn arming_whitelisted(self) -> bool {
        matches!(self, AlarmSlot::Gps | AlarmSlot::Telemetry)
    }
}

/// Extended status describing what the sanity check objected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtendedAlarmStatus {
    #[default]
    None,
    /// A flight-mode slot failed validation; substatus holds the slot.
    FlightMode,
    /// Throttle/collective channel range too narrow.
    BadThrottleOrCollectiveInputRange,
    /// A registered custom hook objected.
    CustomHook,
    /// Boot failed repeatedly; settings were reset.
    RebootRequired,
}

/// The system-wide alarm record, one level per slot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SystemAlarms {
    pub alarm: [AlarmLevel; ALARM_SLOTS],
    pub extended_status: ExtendedAlarmStatus,
    pub extended_substatus: u8,
}

impl SystemAlarms {
    #[inline]
    pub fn get(&self, slot: AlarmSlot) -> AlarmLevel {
        self.alarm[slot.index()]
    }

    #[inline]
    pub fn set(&mut self, slot: AlarmSlot, level: AlarmLevel) {
        self.alarm[slot.index()] = level;
    }

    /// True when any non-whitelisted slot is at `Critical`.
    pub fn blocks_arming(&self) -> bool {
        AlarmSlot::ALL
            .iter()
            .any(|&slot| !slot.arming_whitelisted() && self.get(slot) >= AlarmLevel::Critical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_matches_severity() {
        assert!(AlarmLevel::Ok < AlarmLevel::Warning);
        assert!(AlarmLevel::Warning < AlarmLevel::Error);
        assert!(AlarmLevel::Error < AlarmLevel::Critical);
        assert!(AlarmLevel::Uninitialised < AlarmLevel::Ok);
    }

    #[test]
    fn gps_critical_does_not_block_arming() {
        let mut alarms = SystemAlarms::default();
        alarms.set(AlarmSlot::Gps, AlarmLevel::Critical);
        alarms.set(AlarmSlot::Telemetry, AlarmLevel::Critical);
        assert!(!alarms.blocks_arming());

        alarms.set(AlarmSlot::Receiver, AlarmLevel::Critical);
        assert!(alarms.blocks_arming());
    }
}
