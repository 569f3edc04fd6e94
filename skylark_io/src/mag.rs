//! QMC5883-class magnetometer driver.
//!
//! Polled contract over a shared I²C bus: the driver checks the data-ready
//! status, reads the three axes LSB-first, and applies its orientation
//! remap before anyone else sees the vector. A NACK counts against the
//! retry budget; exhausting it declares the device dead until a reset.

use thiserror::Error;
use tracing::{debug, warn};

/// 7-bit bus address of the chip.
pub const QMC5883_I2C_ADDR: u8 = 0x0D;

const REG_DATA: u8 = 0x00;
const REG_STATUS: u8 = 0x06;
const REG_CONTROL1: u8 = 0x09;
const REG_SET_RESET: u8 = 0x0B;
const REG_CHIP_ID: u8 = 0x0D;

const STATUS_DRDY: u8 = 0x01;
const CHIP_ID_VALUE: u8 = 0xFF;

/// Continuous mode, 200 Hz, 8 G range, OSR 512.
const CONTROL1_CONFIG: u8 = 0b0001_1101;

/// Counts per Gauss at the 8 G range.
const COUNTS_PER_GAUSS: f32 = 3000.0;

/// NACKs tolerated before the device is declared dead.
const MAX_RETRIES: u8 = 3;

/// I²C transaction errors. The bus mutex lives around the transaction;
/// the driver never nests them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum I2cError {
    #[error("device did not acknowledge")]
    Nack,
    #[error("bus fault")]
    Bus,
}

/// Minimal I²C master view: one write, one read, each a single
/// serialised transaction.
pub trait I2cBus {
    fn write(&mut self, addr: u8, data: &[u8]) -> Result<(), I2cError>;
    fn read_reg(&mut self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<(), I2cError>;
}

/// Where the chip sits on the board; remap applied in-driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MagOrientation {
    #[default]
    EastNorthUp,
    SouthEastUp,
    WestSouthUp,
    NorthWestUp,
    EastSouthDown,
    SouthWestDown,
    WestNorthDown,
    NorthEastDown,
}

impl MagOrientation {
    fn apply(self, v: [i16; 3]) -> [i16; 3] {
        let [x, y, z] = v;
        match self {
            MagOrientation::EastNorthUp => [x, y, z],
            MagOrientation::SouthEastUp => [y, -x, z],
            MagOrientation::WestSouthUp => [-x, -y, z],
            MagOrientation::NorthWestUp => [-y, x, z],
            MagOrientation::EastSouthDown => [x, -y, -z],
            MagOrientation::SouthWestDown => [-y, -x, -z],
            MagOrientation::WestNorthDown => [-x, y, -z],
            MagOrientation::NorthEastDown => [y, x, -z],
        }
    }
}

/// One calibrated reading [mGauss], board frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

pub struct QmcMag<B: I2cBus> {
    bus: B,
    orientation: MagOrientation,
    retries: u8,
    dead: bool,
    sample: Option<MagSample>,
}

impl<B: I2cBus> QmcMag<B> {
    pub fn new(mut bus: B, orientation: MagOrientation) -> Result<Self, I2cError> {
        bus.write(QMC5883_I2C_ADDR, &[REG_SET_RESET, 0x01])?;
        bus.write(QMC5883_I2C_ADDR, &[REG_CONTROL1, CONTROL1_CONFIG])?;
        Ok(Self {
            bus,
            orientation,
            retries: 0,
            dead: false,
            sample: None,
        })
    }

    /// Chip responds with its ID.
    pub fn test(&mut self) -> bool {
        let mut id = [0u8; 1];
        match self.bus.read_reg(QMC5883_I2C_ADDR, REG_CHIP_ID, &mut id) {
            Ok(()) => id[0] == CHIP_ID_VALUE,
            Err(_) => false,
        }
    }

    /// True once the retry budget is spent; the owner must `reset`.
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn sample(&self) -> Option<MagSample> {
        self.sample
    }

    /// Poll for a new reading. Returns true when one was produced.
    pub fn poll(&mut self) -> Result<bool, I2cError> {
        if self.dead {
            return Err(I2cError::Nack);
        }
        match self.try_read() {
            Ok(fresh) => {
                self.retries = 0;
                Ok(fresh)
            }
            Err(e) => {
                self.retries += 1;
                if self.retries >= MAX_RETRIES {
                    // Not responding: stop hammering the shared bus until
                    // someone resets us.
                    warn!(retries = self.retries, "magnetometer declared dead");
                    self.dead = true;
                }
                Err(e)
            }
        }
    }

    /// Bring a dead (or wedged) chip back through full re-init.
    pub fn reset(&mut self) -> Result<(), I2cError> {
        debug!("magnetometer reset");
        self.bus.write(QMC5883_I2C_ADDR, &[REG_SET_RESET, 0x01])?;
        self.bus
            .write(QMC5883_I2C_ADDR, &[REG_CONTROL1, CONTROL1_CONFIG])?;
        self.retries = 0;
        self.dead = false;
        Ok(())
    }

    fn try_read(&mut self) -> Result<bool, I2cError> {
        let mut status = [0u8; 1];
        self.bus
            .read_reg(QMC5883_I2C_ADDR, REG_STATUS, &mut status)?;
        if status[0] & STATUS_DRDY == 0 {
            return Ok(false);
        }

        let mut raw = [0u8; 6];
        self.bus.read_reg(QMC5883_I2C_ADDR, REG_DATA, &mut raw)?;
        let axes = [
            i16::from_le_bytes([raw[0], raw[1]]),
            i16::from_le_bytes([raw[2], raw[3]]),
            i16::from_le_bytes([raw[4], raw[5]]),
        ];
        let [x, y, z] = self.orientation.apply(axes);
        let scale = 1000.0 / COUNTS_PER_GAUSS;
        self.sample = Some(MagSample {
            x: f32::from(x) * scale,
            y: f32::from(y) * scale,
            z: f32::from(z) * scale,
        });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Register-level chip simulation with NACK injection.
    struct SimBus {
        regs: [u8; 16],
        nacks_remaining: u32,
    }

    impl SimBus {
        fn new() -> Self {
            let mut regs = [0u8; 16];
            regs[usize::from(REG_CHIP_ID)] = CHIP_ID_VALUE;
            Self {
                regs,
                nacks_remaining: 0,
            }
        }

        fn set_field(&mut self, x: i16, y: i16, z: i16) {
            self.regs[0..2].copy_from_slice(&x.to_le_bytes());
            self.regs[2..4].copy_from_slice(&y.to_le_bytes());
            self.regs[4..6].copy_from_slice(&z.to_le_bytes());
            self.regs[usize::from(REG_STATUS)] = STATUS_DRDY;
        }
    }

    impl I2cBus for SimBus {
        fn write(&mut self, _addr: u8, data: &[u8]) -> Result<(), I2cError> {
            if self.nacks_remaining > 0 {
                self.nacks_remaining -= 1;
                return Err(I2cError::Nack);
            }
            if let [reg, value] = data {
                self.regs[usize::from(*reg) & 0xF] = *value;
            }
            Ok(())
        }

        fn read_reg(&mut self, _addr: u8, reg: u8, buf: &mut [u8]) -> Result<(), I2cError> {
            if self.nacks_remaining > 0 {
                self.nacks_remaining -= 1;
                return Err(I2cError::Nack);
            }
            let start = usize::from(reg) & 0xF;
            buf.copy_from_slice(&self.regs[start..start + buf.len()]);
            // Data reads clear DRDY like the real chip.
            if reg == REG_DATA {
                self.regs[usize::from(REG_STATUS)] = 0;
            }
            Ok(())
        }
    }

    #[test]
    fn reads_and_scales_a_sample() {
        let mut bus = SimBus::new();
        bus.set_field(3000, -1500, 0);
        let mut mag = QmcMag::new(bus, MagOrientation::EastNorthUp).unwrap();
        assert!(mag.test());
        assert!(mag.poll().unwrap());
        let s = mag.sample().unwrap();
        assert!((s.x - 1000.0).abs() < 1e-3); // 1 Gauss
        assert!((s.y - -500.0).abs() < 1e-3);
    }

    #[test]
    fn no_data_ready_is_not_an_error() {
        let bus = SimBus::new();
        let mut mag = QmcMag::new(bus, MagOrientation::default()).unwrap();
        assert!(!mag.poll().unwrap());
        assert!(mag.sample().is_none());
    }

    #[test]
    fn orientation_remap_applies_in_driver() {
        let mut bus = SimBus::new();
        bus.set_field(100, 200, 300);
        let mut mag = QmcMag::new(bus, MagOrientation::SouthEastUp).unwrap();
        mag.poll().unwrap();
        let s = mag.sample().unwrap();
        // x' = y, y' = -x.
        assert!((s.x - 200.0 / 3.0).abs() < 0.1);
        assert!((s.y - -100.0 / 3.0).abs() < 0.1);
    }

    #[test]
    fn repeated_nacks_kill_the_device() {
        // Init needs a healthy bus; the NACKs start afterwards.
        let mut good = SimBus::new();
        good.set_field(1, 1, 1);
        let mut mag = QmcMag::new(good, MagOrientation::default()).unwrap();
        mag.bus.nacks_remaining = 100;

        for _ in 0..MAX_RETRIES {
            assert_eq!(mag.poll(), Err(I2cError::Nack));
        }
        assert!(mag.is_dead());

        // Reset with the bus healthy again brings it back.
        mag.bus.nacks_remaining = 0;
        mag.reset().unwrap();
        assert!(!mag.is_dead());
        assert!(mag.poll().unwrap());
    }
}
