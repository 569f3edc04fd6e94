//! Bootloader DFU protocol.
//!
//! 64-byte packets over USB HID or serial. The command byte carries an
//! echo-request flag (bit 7), echo-answer flag (bit 6), start-of-transfer
//! flag (bit 5) and a 5-bit opcode. Transfers move 14 × 32-bit words per
//! packet; the first packet announces the packet count, the word count of
//! the final packet and the expected full-image CRC-32, which is verified
//! at `OpEnd` before the operation is acknowledged.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::crc::crc32;

/// Packet size on the wire.
pub const DFU_PACKET_SIZE: usize = 64;

/// Payload words per full packet.
pub const WORDS_PER_PACKET: usize = 14;

const ECHO_REQ_FLAG: u8 = 0x80;
const ECHO_ANS_FLAG: u8 = 0x40;
const START_FLAG: u8 = 0x20;
const OPCODE_MASK: u8 = 0x1F;

/// Offset of the 32-bit count field.
const COUNT_OFFSET: usize = 1;
/// Offset of the data area.
const DATA_OFFSET: usize = 5;

static_assertions::const_assert!(DATA_OFFSET + WORDS_PER_PACKET * 4 < DFU_PACKET_SIZE);

/// Protocol opcodes (low five bits of the command byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Reserved = 0,
    ReqCapabilities = 1,
    RepCapabilities = 2,
    EnterDfu = 3,
    JumpFw = 4,
    Reset = 5,
    AbortOperation = 6,
    Upload = 7,
    OpEnd = 8,
    DownloadReq = 9,
    Download = 10,
    StatusRequest = 11,
    StatusRep = 12,
}

impl Opcode {
    fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0 => Opcode::Reserved,
            1 => Opcode::ReqCapabilities,
            2 => Opcode::RepCapabilities,
            3 => Opcode::EnterDfu,
            4 => Opcode::JumpFw,
            5 => Opcode::Reset,
            6 => Opcode::AbortOperation,
            7 => Opcode::Upload,
            8 => Opcode::OpEnd,
            9 => Opcode::DownloadReq,
            10 => Opcode::Download,
            11 => Opcode::StatusRequest,
            12 => Opcode::StatusRep,
            _ => return None,
        })
    }
}

/// Device-side protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuState {
    BlIdle,
    DfuIdle,
    Uploading,
    Downloading,
    LastOperationSuccess,
    LastOperationFailed,
    WrongPacketReceived,
    TooManyPackets,
    OutsideDevCapabilities,
}

/// Effects a packet may ask of the surrounding firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuAction {
    None,
    /// Jump to the (verified) firmware image.
    JumpToFirmware,
    /// Reset the processor.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DfuError {
    #[error("packet shorter than {DFU_PACKET_SIZE} bytes")]
    ShortPacket,
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
}

struct Upload {
    total_packets: u32,
    next_packet: u32,
    last_packet_words: u8,
    expected_crc: u32,
}

/// The DFU engine: owns the image buffer it programs and serves.
pub struct DfuDevice {
    state: DfuState,
    capacity: usize,
    image: Vec<u8>,
    upload: Option<Upload>,
    download_cursor: u32,
}

impl DfuDevice {
    /// `capacity` bounds the firmware image region [bytes].
    pub fn new(capacity: usize) -> Self {
        Self {
            state: DfuState::BlIdle,
            capacity,
            image: Vec::new(),
            upload: None,
            download_cursor: 0,
        }
    }

    pub fn state(&self) -> DfuState {
        self.state
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Preload an image (the "current firmware" for downloads).
    pub fn set_image(&mut self, image: Vec<u8>) {
        self.image = image;
    }

    /// Process one received packet. Returns the reply packet (if the
    /// opcode produces one) and the action the caller must take.
    pub fn process(
        &mut self,
        packet: &[u8],
    ) -> Result<(Option<[u8; DFU_PACKET_SIZE]>, DfuAction), DfuError> {
        if packet.len() < DFU_PACKET_SIZE {
            return Err(DfuError::ShortPacket);
        }
        let command = packet[0];

        // Echo request: the packet comes straight back with the answer
        // flag, before normal processing.
        if command & ECHO_REQ_FLAG != 0 {
            let mut echo = [0u8; DFU_PACKET_SIZE];
            echo.copy_from_slice(&packet[..DFU_PACKET_SIZE]);
            echo[0] = (echo[0] & !ECHO_REQ_FLAG) | ECHO_ANS_FLAG;
            return Ok((Some(echo), DfuAction::None));
        }

        let start_flag = command & START_FLAG != 0;
        let opcode = Opcode::from_bits(command & OPCODE_MASK)
            .ok_or(DfuError::UnknownOpcode(command & OPCODE_MASK))?;
        let count = u32::from_be_bytes([
            packet[COUNT_OFFSET],
            packet[COUNT_OFFSET + 1],
            packet[COUNT_OFFSET + 2],
            packet[COUNT_OFFSET + 3],
        ]);
        let data = &packet[DATA_OFFSET..DFU_PACKET_SIZE];

        let mut reply = None;
        let mut action = DfuAction::None;
        match opcode {
            Opcode::EnterDfu => {
                if self.state == DfuState::BlIdle || self.state == DfuState::DfuIdle {
                    self.state = DfuState::DfuIdle;
                    info!("entered DFU mode");
                }
            }
            Opcode::Upload => self.handle_upload(start_flag, count, data),
            Opcode::OpEnd => self.handle_op_end(),
            Opcode::ReqCapabilities => {
                let mut out = [0u8; DFU_PACKET_SIZE];
                out[0] = Opcode::RepCapabilities as u8;
                out[COUNT_OFFSET..COUNT_OFFSET + 4]
                    .copy_from_slice(&(self.capacity as u32).to_be_bytes());
                reply = Some(out);
            }
            Opcode::DownloadReq => {
                if self.state == DfuState::DfuIdle {
                    self.download_cursor = 0;
                    self.state = DfuState::Downloading;
                }
            }
            Opcode::Download => {
                reply = self.next_download_packet();
            }
            Opcode::StatusRequest => {
                let mut out = [0u8; DFU_PACKET_SIZE];
                out[0] = Opcode::StatusRep as u8;
                out[DATA_OFFSET] = self.state as u8;
                reply = Some(out);
            }
            Opcode::AbortOperation => {
                self.upload = None;
                self.state = DfuState::DfuIdle;
            }
            Opcode::JumpFw => {
                action = DfuAction::JumpToFirmware;
            }
            Opcode::Reset => {
                action = DfuAction::Reset;
            }
            Opcode::Reserved | Opcode::RepCapabilities | Opcode::StatusRep => {}
        }
        Ok((reply, action))
    }

    fn handle_upload(&mut self, start_flag: bool, count: u32, data: &[u8]) {
        if start_flag {
            if self.state != DfuState::DfuIdle {
                self.state = DfuState::WrongPacketReceived;
                return;
            }
            let last_packet_words = data[1];
            let expected_crc =
                u32::from_be_bytes([data[2], data[3], data[4], data[5]]);
            let total_bytes = (count.saturating_sub(1) as usize) * WORDS_PER_PACKET * 4
                + usize::from(last_packet_words) * 4;
            if total_bytes > self.capacity {
                self.state = DfuState::OutsideDevCapabilities;
                return;
            }
            self.image = vec![0xFF; total_bytes];
            self.upload = Some(Upload {
                total_packets: count,
                next_packet: 0,
                last_packet_words,
                expected_crc,
            });
            self.state = DfuState::Uploading;
            debug!(packets = count, bytes = total_bytes, "upload started");
            return;
        }

        let Some(upload) = self.upload.as_mut() else {
            self.state = DfuState::WrongPacketReceived;
            return;
        };
        if count >= upload.total_packets {
            self.state = DfuState::TooManyPackets;
            return;
        }
        if count != upload.next_packet {
            self.state = DfuState::WrongPacketReceived;
            return;
        }
        let words = if count == upload.total_packets - 1 {
            usize::from(upload.last_packet_words)
        } else {
            WORDS_PER_PACKET
        };
        let offset = count as usize * WORDS_PER_PACKET * 4;
        let len = words * 4;
        self.image[offset..offset + len].copy_from_slice(&data[..len]);
        upload.next_packet += 1;
    }

    /// Verify the full image against the announced CRC before
    /// acknowledging the transfer.
    fn handle_op_end(&mut self) {
        let Some(upload) = self.upload.take() else {
            self.state = DfuState::WrongPacketReceived;
            return;
        };
        if upload.next_packet != upload.total_packets {
            self.state = DfuState::LastOperationFailed;
            return;
        }
        let computed = crc32(&self.image);
        if computed == upload.expected_crc {
            self.state = DfuState::LastOperationSuccess;
            info!(bytes = self.image.len(), "upload verified");
        } else {
            warn!(
                expected = upload.expected_crc,
                computed, "image CRC mismatch"
            );
            self.state = DfuState::LastOperationFailed;
        }
    }

    fn next_download_packet(&mut self) -> Option<[u8; DFU_PACKET_SIZE]> {
        if self.state != DfuState::Downloading {
            return None;
        }
        let offset = self.download_cursor as usize * WORDS_PER_PACKET * 4;
        if offset >= self.image.len() {
            self.state = DfuState::DfuIdle;
            return None;
        }
        let len = (self.image.len() - offset).min(WORDS_PER_PACKET * 4);
        let mut out = [0u8; DFU_PACKET_SIZE];
        out[0] = Opcode::Download as u8;
        out[COUNT_OFFSET..COUNT_OFFSET + 4]
            .copy_from_slice(&self.download_cursor.to_be_bytes());
        out[DATA_OFFSET..DATA_OFFSET + len]
            .copy_from_slice(&self.image[offset..offset + len]);
        self.download_cursor += 1;
        Some(out)
    }
}

// ─── Host-side packet builders ──────────────────────────────────────

/// Build a command packet (the ground-tool side of the exchange).
pub fn build_packet(opcode: Opcode, start: bool, count: u32) -> [u8; DFU_PACKET_SIZE] {
    let mut out = [0u8; DFU_PACKET_SIZE];
    out[0] = opcode as u8 | if start { START_FLAG } else { 0 };
    out[COUNT_OFFSET..COUNT_OFFSET + 4].copy_from_slice(&count.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload_image(device: &mut DfuDevice, image: &[u8]) {
        assert_eq!(image.len() % 4, 0);
        let total_words = image.len() / 4;
        let full_packets = total_words / WORDS_PER_PACKET;
        let tail_words = total_words % WORDS_PER_PACKET;
        let (packets, last_words) = if tail_words == 0 {
            (full_packets, WORDS_PER_PACKET)
        } else {
            (full_packets + 1, tail_words)
        };

        device
            .process(&build_packet(Opcode::EnterDfu, false, 0))
            .unwrap();

        let mut start = build_packet(Opcode::Upload, true, packets as u32);
        start[DATA_OFFSET] = 0; // transfer type: firmware
        start[DATA_OFFSET + 1] = last_words as u8;
        start[DATA_OFFSET + 2..DATA_OFFSET + 6].copy_from_slice(&crc32(image).to_be_bytes());
        device.process(&start).unwrap();
        assert_eq!(device.state(), DfuState::Uploading);

        for (i, chunk) in image.chunks(WORDS_PER_PACKET * 4).enumerate() {
            let mut packet = build_packet(Opcode::Upload, false, i as u32);
            packet[DATA_OFFSET..DATA_OFFSET + chunk.len()].copy_from_slice(chunk);
            device.process(&packet).unwrap();
        }
        device
            .process(&build_packet(Opcode::OpEnd, false, 0))
            .unwrap();
    }

    #[test]
    fn upload_verifies_against_the_image_crc() {
        let mut device = DfuDevice::new(4096);
        let image: Vec<u8> = (0..200u32).flat_map(|w| w.to_le_bytes()).collect();
        upload_image(&mut device, &image);
        assert_eq!(device.state(), DfuState::LastOperationSuccess);
        assert_eq!(device.image(), &image[..]);
    }

    #[test]
    fn wrong_crc_fails_the_operation() {
        let mut device = DfuDevice::new(4096);
        device
            .process(&build_packet(Opcode::EnterDfu, false, 0))
            .unwrap();

        let image = [0x11u8; 56];
        let mut start = build_packet(Opcode::Upload, true, 1);
        start[DATA_OFFSET + 1] = WORDS_PER_PACKET as u8;
        start[DATA_OFFSET + 2..DATA_OFFSET + 6].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());
        device.process(&start).unwrap();
        let mut packet = build_packet(Opcode::Upload, false, 0);
        packet[DATA_OFFSET..DATA_OFFSET + 56].copy_from_slice(&image);
        device.process(&packet).unwrap();
        device
            .process(&build_packet(Opcode::OpEnd, false, 0))
            .unwrap();
        assert_eq!(device.state(), DfuState::LastOperationFailed);
    }

    #[test]
    fn oversized_transfer_is_outside_capabilities() {
        let mut device = DfuDevice::new(64);
        device
            .process(&build_packet(Opcode::EnterDfu, false, 0))
            .unwrap();
        let mut start = build_packet(Opcode::Upload, true, 100);
        start[DATA_OFFSET + 1] = WORDS_PER_PACKET as u8;
        device.process(&start).unwrap();
        assert_eq!(device.state(), DfuState::OutsideDevCapabilities);
    }

    #[test]
    fn out_of_order_packet_is_rejected() {
        let mut device = DfuDevice::new(4096);
        device
            .process(&build_packet(Opcode::EnterDfu, false, 0))
            .unwrap();
        let mut start = build_packet(Opcode::Upload, true, 3);
        start[DATA_OFFSET + 1] = WORDS_PER_PACKET as u8;
        device.process(&start).unwrap();

        // Packet 1 before packet 0.
        let packet = build_packet(Opcode::Upload, false, 1);
        device.process(&packet).unwrap();
        assert_eq!(device.state(), DfuState::WrongPacketReceived);
    }

    #[test]
    fn echo_request_bounces_with_the_answer_flag() {
        let mut device = DfuDevice::new(64);
        let mut packet = build_packet(Opcode::StatusRequest, false, 0);
        packet[0] |= ECHO_REQ_FLAG;
        packet[10] = 0x5A;
        let (reply, _) = device.process(&packet).unwrap();
        let reply = reply.unwrap();
        assert_eq!(reply[0] & ECHO_ANS_FLAG, ECHO_ANS_FLAG);
        assert_eq!(reply[0] & ECHO_REQ_FLAG, 0);
        assert_eq!(reply[10], 0x5A);
    }

    #[test]
    fn download_round_trips_the_image() {
        let mut device = DfuDevice::new(4096);
        let image: Vec<u8> = (0..123u8).collect();
        device.set_image(image.clone());
        device
            .process(&build_packet(Opcode::EnterDfu, false, 0))
            .unwrap();
        device
            .process(&build_packet(Opcode::DownloadReq, false, 0))
            .unwrap();

        let mut received = Vec::new();
        loop {
            let (reply, _) = device
                .process(&build_packet(Opcode::Download, false, 0))
                .unwrap();
            match reply {
                Some(packet) => {
                    let len = (image.len() - received.len()).min(WORDS_PER_PACKET * 4);
                    received.extend_from_slice(&packet[DATA_OFFSET..DATA_OFFSET + len]);
                }
                None => break,
            }
        }
        assert_eq!(received, image);
    }

    #[test]
    fn status_request_reports_the_state() {
        let mut device = DfuDevice::new(64);
        let (reply, _) = device
            .process(&build_packet(Opcode::StatusRequest, false, 0))
            .unwrap();
        let reply = reply.unwrap();
        assert_eq!(reply[0], Opcode::StatusRep as u8);
        assert_eq!(reply[DATA_OFFSET], DfuState::BlIdle as u8);
    }

    #[test]
    fn jump_and_reset_produce_actions() {
        let mut device = DfuDevice::new(64);
        let (_, action) = device
            .process(&build_packet(Opcode::JumpFw, false, 0))
            .unwrap();
        assert_eq!(action, DfuAction::JumpToFirmware);
        let (_, action) = device
            .process(&build_packet(Opcode::Reset, false, 0))
            .unwrap();
        assert_eq!(action, DfuAction::Reset);
    }
}
