//! # Skylark IO
//!
//! The external interfaces of the flight core: radio-control receiver
//! protocol decoders with failsafe supervision, the DShot actuator frame
//! encoding, the flash-backed settings store, the bootloader DFU protocol,
//! and the polled barometer/magnetometer chip drivers.
//!
//! Everything here is wire-format code, written against small transport
//! traits so the parsers and state machines run (and test) on the host.

pub mod baro;
pub mod crc;
pub mod dfu;
pub mod dshot;
pub mod flashfs;
pub mod mag;
pub mod receiver;
