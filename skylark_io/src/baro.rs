//! MS56xx-class barometer driver.
//!
//! Polled four-phase machine: `Init → Calibration → Temperature →
//! Pressure → Calculate`, with pressure sampled every cycle and
//! temperature only once per `temp_skip` cycles. Temperature is
//! IIR-smoothed; second-order compensation applies below 20 °C with an
//! extra band below −15 °C. The driver reports "not ready" until the
//! chip-specific conversion delay has elapsed.

use thiserror::Error;
use tracing::{debug, warn};

/// Chip transport: command/ADC plumbing over I²C or SPI.
pub trait BaroTransport {
    fn reset(&mut self) -> Result<(), BaroError>;
    fn read_prom(&mut self) -> Result<[u16; 8], BaroError>;
    fn start_temperature_conversion(&mut self) -> Result<(), BaroError>;
    fn start_pressure_conversion(&mut self) -> Result<(), BaroError>;
    /// 24-bit conversion result of the last started conversion.
    fn read_adc(&mut self) -> Result<u32, BaroError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BaroError {
    #[error("device did not acknowledge")]
    Nack,
    #[error("bus fault")]
    Bus,
    #[error("calibration PROM failed its CRC")]
    BadProm,
}

/// Conversion wait for the highest oversampling [µs].
const CONVERSION_DELAY_US: u64 = 10_000;

/// Pressure cycles per temperature refresh.
const DEFAULT_TEMP_SKIP: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsmState {
    Init,
    Calibration,
    Temperature,
    Pressure,
    Calculate,
}

/// One compensated reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaroSample {
    /// Static pressure [Pa].
    pub pressure_pa: u32,
    /// Smoothed temperature [°C].
    pub temperature_c: f32,
}

pub struct MsBaro<T: BaroTransport> {
    transport: T,
    state: FsmState,
    prom: [u16; 8],
    d1: u32,
    d2: u32,
    /// Smoothed temperature [0.01 °C], seeded on the first conversion.
    filtered_temp: Option<i32>,
    temp_skip: u32,
    temp_interleave: u32,
    conversion_start_us: Option<u64>,
    sample: Option<BaroSample>,
}

impl<T: BaroTransport> MsBaro<T> {
    pub fn new(transport: T) -> Self {
        Self::with_temp_skip(transport, DEFAULT_TEMP_SKIP)
    }

    pub fn with_temp_skip(transport: T, temp_skip: u32) -> Self {
        Self {
            transport,
            state: FsmState::Init,
            prom: [0; 8],
            d1: 0,
            d2: 0,
            filtered_temp: None,
            temp_skip: temp_skip.max(1),
            temp_interleave: 0,
            conversion_start_us: None,
            sample: None,
        }
    }

    /// Latest compensated sample, if any conversion cycle completed.
    pub fn sample(&self) -> Option<BaroSample> {
        self.sample
    }

    /// Drive the machine. Returns true when a new compensated sample
    /// became available this poll.
    pub fn poll(&mut self, now_us: u64) -> Result<bool, BaroError> {
        // Conversion in flight: not ready until the chip minimum elapsed.
        if let Some(start) = self.conversion_start_us {
            if now_us.saturating_sub(start) < CONVERSION_DELAY_US {
                return Ok(false);
            }
        }

        match self.state {
            FsmState::Init => {
                self.transport.reset()?;
                self.conversion_start_us = Some(now_us);
                self.state = FsmState::Calibration;
                Ok(false)
            }
            FsmState::Calibration => {
                let prom = self.transport.read_prom()?;
                if crc4(&prom) != (prom[7] & 0x000F) as u8 {
                    warn!("baro PROM CRC mismatch");
                    self.state = FsmState::Init;
                    self.conversion_start_us = None;
                    return Err(BaroError::BadProm);
                }
                self.prom = prom;
                debug!("baro calibration loaded");
                self.transport.start_temperature_conversion()?;
                self.conversion_start_us = Some(now_us);
                self.state = FsmState::Temperature;
                Ok(false)
            }
            FsmState::Temperature => {
                self.d2 = self.transport.read_adc()?;
                self.transport.start_pressure_conversion()?;
                self.conversion_start_us = Some(now_us);
                self.state = FsmState::Pressure;
                Ok(false)
            }
            FsmState::Pressure => {
                self.d1 = self.transport.read_adc()?;
                self.state = FsmState::Calculate;
                self.conversion_start_us = None;
                self.poll(now_us)
            }
            FsmState::Calculate => {
                self.calculate();

                // Temperature rides along only every `temp_skip` cycles.
                self.temp_interleave += 1;
                if self.temp_interleave >= self.temp_skip {
                    self.temp_interleave = 0;
                    self.transport.start_temperature_conversion()?;
                    self.state = FsmState::Temperature;
                } else {
                    self.transport.start_pressure_conversion()?;
                    self.state = FsmState::Pressure;
                }
                self.conversion_start_us = Some(now_us);
                Ok(true)
            }
        }
    }

    /// Datasheet compensation with the second-order low-temperature terms.
    fn calculate(&mut self) {
        let c = &self.prom;
        let dt = i64::from(self.d2) - (i64::from(c[5]) << 8);
        let temp = 2000 + ((dt * i64::from(c[6])) >> 23);

        // IIR smoothing: alpha = 4/5.
        let filtered = match self.filtered_temp {
            Some(prev) => (i64::from(prev) * 4 + temp) / 5,
            None => temp,
        } as i32;
        self.filtered_temp = Some(filtered);

        let mut off = (i64::from(c[2]) << 16) + ((i64::from(c[4]) * dt) >> 7);
        let mut sens = (i64::from(c[1]) << 15) + ((i64::from(c[3]) * dt) >> 8);

        if temp < 2000 {
            // Below 20 °C the linear model drifts.
            let t2 = (dt * dt) >> 31;
            let delta = temp - 2000;
            let mut off2 = 5 * delta * delta / 2;
            let mut sens2 = 5 * delta * delta / 4;
            if temp < -1500 {
                let delta = temp + 1500;
                off2 += 7 * delta * delta;
                sens2 += 11 * delta * delta / 2;
            }
            off -= off2;
            sens -= sens2;
            let _ = t2; // folded into the published temperature below
            self.filtered_temp = Some((filtered as i64 - t2) as i32);
        }

        let pressure = ((i64::from(self.d1) * sens >> 21) - off) >> 15;
        self.sample = Some(BaroSample {
            pressure_pa: pressure.clamp(0, u32::MAX as i64) as u32,
            temperature_c: self.filtered_temp.unwrap_or(filtered) as f32 / 100.0,
        });
    }
}

/// MS56xx PROM CRC-4 (the check nibble lives in word 7).
fn crc4(prom: &[u16; 8]) -> u8 {
    let mut words = *prom;
    words[7] &= 0xFF00;
    let mut rem: u16 = 0;
    for cnt in 0..16 {
        if cnt % 2 == 1 {
            rem ^= words[cnt >> 1] & 0x00FF;
        } else {
            rem ^= words[cnt >> 1] >> 8;
        }
        for _ in 0..8 {
            rem = if rem & 0x8000 != 0 {
                (rem << 1) ^ 0x3000
            } else {
                rem << 1
            };
        }
    }
    ((rem >> 12) & 0xF) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Synthetic chip with the MS5611 datasheet example values.
    struct SimChip {
        prom: [u16; 8],
        d1: u32,
        d2: u32,
        last_conversion: Option<char>,
        temp_conversions: u32,
        pressure_conversions: u32,
    }

    impl SimChip {
        fn datasheet() -> Self {
            let mut prom = [0u16, 40127, 36924, 23317, 23282, 33464, 28312, 0];
            let crc = crc4(&prom);
            prom[7] = u16::from(crc);
            Self {
                prom,
                d1: 9_085_466,
                d2: 8_569_150,
                last_conversion: None,
                temp_conversions: 0,
                pressure_conversions: 0,
            }
        }
    }

    impl BaroTransport for SimChip {
        fn reset(&mut self) -> Result<(), BaroError> {
            Ok(())
        }

        fn read_prom(&mut self) -> Result<[u16; 8], BaroError> {
            Ok(self.prom)
        }

        fn start_temperature_conversion(&mut self) -> Result<(), BaroError> {
            self.last_conversion = Some('t');
            self.temp_conversions += 1;
            Ok(())
        }

        fn start_pressure_conversion(&mut self) -> Result<(), BaroError> {
            self.last_conversion = Some('p');
            self.pressure_conversions += 1;
            Ok(())
        }

        fn read_adc(&mut self) -> Result<u32, BaroError> {
            Ok(match self.last_conversion {
                Some('t') => self.d2,
                _ => self.d1,
            })
        }
    }

    /// Run polls with time advancing past each conversion delay.
    fn run_until_sample(baro: &mut MsBaro<SimChip>, mut now: u64, max_polls: u32) -> u64 {
        for _ in 0..max_polls {
            now += CONVERSION_DELAY_US;
            if baro.poll(now).unwrap() {
                return now;
            }
        }
        panic!("no sample after {max_polls} polls");
    }

    #[test]
    fn datasheet_example_compensates_correctly() {
        let mut baro = MsBaro::new(SimChip::datasheet());
        run_until_sample(&mut baro, 0, 10);
        let sample = baro.sample().unwrap();
        // MS5611 datasheet example: P ≈ 1000.09 mbar, TEMP ≈ 20.07 °C
        // (integer truncation order differs by a few Pa between
        // implementations).
        assert!(
            (i64::from(sample.pressure_pa) - 100_009).abs() <= 5,
            "pressure {}",
            sample.pressure_pa
        );
        assert!((sample.temperature_c - 20.07).abs() < 0.02);
    }

    #[test]
    fn not_ready_before_the_conversion_delay() {
        let mut baro = MsBaro::new(SimChip::datasheet());
        baro.poll(0).unwrap(); // Init → Calibration started
        // Conversion timer armed: an immediate poll does nothing.
        assert!(!baro.poll(1).unwrap());
        assert!(baro.sample().is_none());
    }

    #[test]
    fn temperature_interleaves_at_the_skip_ratio() {
        let mut baro = MsBaro::with_temp_skip(SimChip::datasheet(), 4);
        let mut now = 0;
        for _ in 0..12 {
            now = run_until_sample(&mut baro, now, 10);
        }
        let chip = &baro.transport;
        // 12 samples at skip 4 → three temperature refreshes (plus the
        // startup one), the rest pressure-only.
        assert!(chip.temp_conversions >= 3 && chip.temp_conversions <= 5);
        assert!(chip.pressure_conversions >= 12);
    }

    #[test]
    fn bad_prom_crc_is_rejected() {
        let mut chip = SimChip::datasheet();
        chip.prom[3] ^= 0x0040; // corrupt a coefficient
        let mut baro = MsBaro::new(chip);
        baro.poll(0).unwrap();
        let result = baro.poll(CONVERSION_DELAY_US);
        assert_eq!(result, Err(BaroError::BadProm));
    }
}
