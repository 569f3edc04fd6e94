//! Skylark Common Library
//!
//! Shared foundation for the skylark flight-control workspace: the math
//! kernel (quaternions, rotation matrices, PID), the typed records carried
//! on the object bus, the alarm taxonomy, TOML configuration loading, and
//! the watchdog flag registry.
//!
//! # Module Structure
//!
//! - [`math`] - Quaternion / rotation / vector / PID / low-pass kernel
//! - [`objects`] - Record types shared over the object bus
//! - [`alarms`] - Alarm levels, slots and the `SystemAlarms` record
//! - [`config`] - Configuration loading and validation
//! - [`watchdog`] - Task liveness flag registry
//! - [`consts`] - System-wide constants

pub mod alarms;
pub mod config;
pub mod consts;
pub mod math;
pub mod objects;
pub mod watchdog;
