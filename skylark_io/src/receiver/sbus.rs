//! Futaba S.Bus decoder.
//!
//! 25-byte frames: start 0x0F, 22 bytes packing 16 channels at 11 bits
//! LSB-first, a flags byte (frame-lost, failsafe, two digital channels),
//! and an end byte. The line itself is inverted 100 kbaud 8E2; by the
//! time bytes get here the UART has undone that.

use bitflags::bitflags;

use super::{ChannelBank, RcReceiver};

/// Bytes per S.Bus frame.
pub const SBUS_FRAME_LENGTH: usize = 25;

const SBUS_START_BYTE: u8 = 0x0F;
const SBUS_END_BYTE: u8 = 0x00;
const NUM_CHANNELS: usize = 16;

/// Supervisor ticks (625 Hz) without a valid frame before failsafe.
const FAILSAFE_TICKS: u8 = 64;

bitflags! {
    /// S.Bus status flags (byte 23).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SbusFlags: u8 {
        const DIGITAL_CH1 = 0x01;
        const DIGITAL_CH2 = 0x02;
        const FRAME_LOST  = 0x04;
        const FAILSAFE    = 0x08;
    }
}

pub struct SbusParser {
    channels: ChannelBank<NUM_CHANNELS>,
    frame: [u8; SBUS_FRAME_LENGTH],
    byte_count: usize,
    in_frame: bool,
    failsafe_timer: u8,
    frames_lost: u32,
}

impl Default for SbusParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SbusParser {
    pub fn new() -> Self {
        Self {
            channels: ChannelBank::new(),
            frame: [0; SBUS_FRAME_LENGTH],
            byte_count: 0,
            in_frame: false,
            failsafe_timer: 0,
            frames_lost: 0,
        }
    }

    pub fn push_byte(&mut self, byte: u8) {
        if !self.in_frame {
            if byte == SBUS_START_BYTE {
                self.in_frame = true;
                self.frame[0] = byte;
                self.byte_count = 1;
            }
            return;
        }

        self.frame[self.byte_count] = byte;
        self.byte_count += 1;
        if self.byte_count == SBUS_FRAME_LENGTH {
            self.in_frame = false;
            self.process_frame();
        }
    }

    /// 625 Hz supervisor: failsafe window only — S.Bus frames carry their
    /// own sync byte.
    pub fn supervisor_tick(&mut self) {
        self.failsafe_timer = self.failsafe_timer.saturating_add(1);
        if self.failsafe_timer > FAILSAFE_TICKS {
            self.channels.invalidate();
            self.failsafe_timer = FAILSAFE_TICKS;
        }
    }

    pub fn frames_lost(&self) -> u32 {
        self.frames_lost
    }

    fn process_frame(&mut self) {
        if self.frame[SBUS_FRAME_LENGTH - 1] != SBUS_END_BYTE {
            return;
        }
        let flags = SbusFlags::from_bits_truncate(self.frame[23]);
        if flags.contains(SbusFlags::FRAME_LOST) {
            self.frames_lost = self.frames_lost.wrapping_add(1);
        }
        if flags.contains(SbusFlags::FAILSAFE) {
            // The receiver itself declared link loss.
            self.channels.invalidate();
            return;
        }

        // 16 channels × 11 bits, LSB-first across bytes 1..=22.
        let data = &self.frame[1..23];
        let mut bit_offset = 0usize;
        for ch in 0..NUM_CHANNELS {
            let mut value: u16 = 0;
            for bit in 0..11 {
                let idx = bit_offset + bit;
                if data[idx / 8] & (1 << (idx % 8)) != 0 {
                    value |= 1 << bit;
                }
            }
            bit_offset += 11;
            self.channels.set(ch, scale(value));
        }
        self.failsafe_timer = 0;
    }
}

/// Map the 0–2047 S.Bus range onto µs-like units: the usual 192→1000,
/// 1792→2000 calibration.
fn scale(raw: u16) -> u16 {
    let us = 880 + (u32::from(raw) * 5) / 8;
    us as u16
}

impl RcReceiver for SbusParser {
    fn channel_count(&self) -> usize {
        NUM_CHANNELS
    }

    fn read(&self, channel: usize) -> u16 {
        self.channels.get(channel)
    }
}
