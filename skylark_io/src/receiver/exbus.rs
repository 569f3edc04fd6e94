//! Jeti EX.Bus decoder.
//!
//! Channel frames: sync 0x3E, a request byte, total length, packet id,
//! then sub-blocks of `{data id, sub-length, payload}`; the 0x31 block
//! carries up to 16 channels as 16-bit little-endian values in ⅛ µs.
//! The whole frame is covered by a CCITT-16 CRC, LSB-first, appended
//! little-endian.

use heapless::Vec;
use tracing::trace;

use crate::crc::crc16_ccitt_lsb_update;

use super::{ChannelBank, RcReceiver};

const EXBUS_SYNC_CHANNEL: u8 = 0x3E;
const EXBUS_DATA_CHANNEL: u8 = 0x31;
const EXBUS_MAX_CHANNELS: usize = 16;

/// Header (4) + payload + CRC (2).
const EXBUS_MAX_FRAME_LENGTH: usize = EXBUS_MAX_CHANNELS * 2 + 10 + 6;

/// Supervisor ticks (625 Hz) without a valid frame before failsafe.
const FAILSAFE_TICKS: u8 = 64;

pub struct ExBusParser {
    channels: ChannelBank<EXBUS_MAX_CHANNELS>,
    frame: Vec<u8, EXBUS_MAX_FRAME_LENGTH>,
    /// Total frame length from the header, once known.
    expected_len: usize,
    in_frame: bool,
    failsafe_timer: u8,
}

impl Default for ExBusParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ExBusParser {
    pub fn new() -> Self {
        Self {
            channels: ChannelBank::new(),
            frame: Vec::new(),
            expected_len: 0,
            in_frame: false,
            failsafe_timer: 0,
        }
    }

    pub fn push_byte(&mut self, byte: u8) {
        if !self.in_frame {
            if byte == EXBUS_SYNC_CHANNEL {
                self.frame.clear();
                let _ = self.frame.push(byte);
                self.expected_len = 0;
                self.in_frame = true;
            }
            return;
        }

        if self.frame.push(byte).is_err() {
            // Oversized: resynchronise.
            self.in_frame = false;
            return;
        }

        // Byte 2 is the total frame length.
        if self.frame.len() == 3 {
            self.expected_len = usize::from(self.frame[2]);
            if self.expected_len < 8 || self.expected_len > EXBUS_MAX_FRAME_LENGTH {
                self.in_frame = false;
                return;
            }
        }

        if self.expected_len != 0 && self.frame.len() == self.expected_len {
            self.in_frame = false;
            self.process_frame();
        }
    }

    /// 625 Hz supervisor: failsafe window.
    pub fn supervisor_tick(&mut self) {
        self.failsafe_timer = self.failsafe_timer.saturating_add(1);
        if self.failsafe_timer > FAILSAFE_TICKS {
            self.channels.invalidate();
            self.failsafe_timer = FAILSAFE_TICKS;
        }
    }

    fn process_frame(&mut self) {
        let frame = &self.frame;
        let n = frame.len();
        let crc_rx = u16::from_le_bytes([frame[n - 2], frame[n - 1]]);
        if crc16_ccitt_lsb_update(0, &frame[..n - 2]) != crc_rx {
            trace!("EX.Bus CRC mismatch");
            return;
        }

        // Walk the sub-blocks after {sync, req, len, packet id}.
        let mut idx = 4;
        while idx + 2 <= n - 2 {
            let data_id = frame[idx];
            let sub_len = usize::from(frame[idx + 1]);
            let payload_start = idx + 2;
            let payload_end = payload_start + sub_len;
            if payload_end > n - 2 {
                return;
            }
            if data_id == EXBUS_DATA_CHANNEL {
                let count = (sub_len / 2).min(EXBUS_MAX_CHANNELS);
                for ch in 0..count {
                    let raw = u16::from_le_bytes([
                        frame[payload_start + 2 * ch],
                        frame[payload_start + 2 * ch + 1],
                    ]);
                    // ⅛ µs resolution on the wire.
                    self.channels.set(ch, raw / 8);
                }
                self.failsafe_timer = 0;
            }
            idx = payload_end;
        }
    }
}

impl RcReceiver for ExBusParser {
    fn channel_count(&self) -> usize {
        EXBUS_MAX_CHANNELS
    }

    fn read(&self, channel: usize) -> u16 {
        self.channels.get(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::TIMEOUT;

    fn build_frame(values: &[u16]) -> std::vec::Vec<u8> {
        let mut frame = vec![
            EXBUS_SYNC_CHANNEL,
            0x03, // no telemetry request
            0x00, // length, patched below
            0x42, // packet id
            EXBUS_DATA_CHANNEL,
            (values.len() * 2) as u8,
        ];
        for &v in values {
            frame.extend_from_slice(&(v * 8).to_le_bytes());
        }
        frame[2] = (frame.len() + 2) as u8;
        let crc = crc16_ccitt_lsb_update(0, &frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    #[test]
    fn decodes_a_channel_frame() {
        let mut parser = ExBusParser::new();
        for b in build_frame(&[1500, 1000, 2000, 1250]) {
            parser.push_byte(b);
        }
        assert_eq!(parser.read(0), 1500);
        assert_eq!(parser.read(1), 1000);
        assert_eq!(parser.read(2), 2000);
        assert_eq!(parser.read(3), 1250);
        assert_eq!(parser.read(4), TIMEOUT);
    }

    #[test]
    fn crc_mismatch_is_rejected() {
        let mut parser = ExBusParser::new();
        let mut frame = build_frame(&[1500]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        for b in frame {
            parser.push_byte(b);
        }
        assert_eq!(parser.read(0), TIMEOUT);
    }

    #[test]
    fn resynchronises_after_garbage() {
        let mut parser = ExBusParser::new();
        for b in [0x12u8, 0x99, 0x00] {
            parser.push_byte(b);
        }
        for b in build_frame(&[1600]) {
            parser.push_byte(b);
        }
        assert_eq!(parser.read(0), 1600);
    }

    #[test]
    fn failsafe_window() {
        let mut parser = ExBusParser::new();
        for b in build_frame(&[1500]) {
            parser.push_byte(b);
        }
        for _ in 0..65 {
            parser.supervisor_tick();
        }
        assert_eq!(parser.read(0), TIMEOUT);
    }
}
