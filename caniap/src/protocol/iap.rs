//! CAN IAP wire protocol.
//!
//! The target listens on two standard identifiers and dispatches on the CAN
//! DLC field, so every message is a command code plus a short payload:
//!
//! ```text
//! +-------+----------------+------------------------------+
//! |  ID   |  DLC (command) |  data (first `DLC` bytes)    |
//! +-------+----------------+------------------------------+
//! | 0x600 |  0x05 start    |  03 03 03 03 03              |
//! | 0x600 |  0x08 write    |  8 image bytes               |
//! | 0x600 |  0x04 last     |  04 04 04 04                 |
//! | 0x600 |  0x03 crc ok   |  03 03 03                    |
//! | 0x600 |  0x07 crc fail |  07 07 07 07 07 07 07        |
//! | 0x600 |  0x02 load     |  CC CC                       |
//! | 0x601 |  (device)      |  crc_hi crc_lo               |
//! +-------+----------------+------------------------------+
//! ```

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// Maximum data bytes in a classic CAN frame.
pub const MAX_PAYLOAD: usize = 8;

/// Start a programming session (device erases the application area).
pub const PROGRAM_START: u8 = 0x05;
/// Program-end marker byte, carried with [`LOAD_NEW_PROGRAM`].
pub const PROGRAM_END: u8 = 0xCC;
/// Ask the device for its status byte.
pub const SEND_STATUS: u8 = 0x00;
/// Commit the flashed program, or reset the IAP markers.
pub const LOAD_NEW_PROGRAM: u8 = 0x02;
/// One 8-byte frame of image data.
pub const WRITE_TO_FLASH: u8 = 0x08;
/// Page CRC matched.
pub const CRC_SUCCEEDED: u8 = 0x03;
/// Page CRC mismatched; the device erases the page.
pub const CRC_FAILED: u8 = 0x07;
/// Status byte: flash erase failed.
pub const ERASE_FAILED: u8 = 0x22;
/// The next frame is the last one of the image.
pub const LAST_FRAME: u8 = 0x04;

/// Status byte: device is ready after an erase.
pub const READY: u8 = 0xAA;
/// Start payload byte requesting a jump into the ROM bootloader.
pub const STM_BOOTLOADER: u8 = 0xAB;
/// Marker byte requesting the IAP flags to be cleared.
pub const RESET_MARKERS: u8 = 0xBB;

/// Filler carried by a plain start request.
const START_FILL: u8 = 0x03;

/// Logical CAN channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Channel {
    /// Host-to-device traffic and device status replies (0x600).
    Update,
    /// Device page CRC acknowledgments (0x601).
    CrcAck,
}

impl Channel {
    /// Standard 11-bit arbitration identifier.
    #[must_use]
    pub const fn id(self) -> u16 {
        match self {
            Self::Update => 0x600,
            Self::CrcAck => 0x601,
        }
    }

    /// Map an identifier back to a channel.
    #[must_use]
    pub const fn from_id(id: u16) -> Option<Self> {
        match id {
            0x600 => Some(Self::Update),
            0x601 => Some(Self::CrcAck),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update => write!(f, "update (0x{:03x})", self.id()),
            Self::CrcAck => write!(f, "crc-ack (0x{:03x})", self.id()),
        }
    }
}

/// One protocol message: channel, command code and up to 8 payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    channel: Channel,
    code: u8,
    payload: Vec<u8>,
}

impl ProtocolMessage {
    /// Create a message. Payloads longer than a CAN frame are rejected.
    pub fn new(channel: Channel, code: u8, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::Protocol(format!(
                "payload of {} bytes exceeds {MAX_PAYLOAD}",
                payload.len()
            )));
        }
        Ok(Self::filled(channel, code, payload))
    }

    /// Infallible constructor for the fixed shapes below.
    fn filled(channel: Channel, code: u8, payload: &[u8]) -> Self {
        Self {
            channel,
            code,
            payload: payload.to_vec(),
        }
    }

    fn marker(code: u8, byte: u8, count: usize) -> Self {
        Self::filled(Channel::Update, code, &[byte; MAX_PAYLOAD][..count])
    }

    /// Start programming; the device erases and answers READY or ERASE_FAILED.
    #[must_use]
    pub fn program_start() -> Self {
        Self::marker(PROGRAM_START, START_FILL, 7)
    }

    /// Ask the device to jump into the ROM bootloader.
    #[must_use]
    pub fn system_bootloader() -> Self {
        Self::marker(PROGRAM_START, STM_BOOTLOADER, 7)
    }

    /// One frame of image data.
    #[must_use]
    pub fn write_to_flash(frame: &[u8; 8]) -> Self {
        Self::filled(Channel::Update, WRITE_TO_FLASH, frame)
    }

    /// Announce that the next data frame is the last one.
    #[must_use]
    pub fn last_frame() -> Self {
        Self::marker(LAST_FRAME, LAST_FRAME, 4)
    }

    /// Page verified.
    #[must_use]
    pub fn crc_succeeded() -> Self {
        Self::marker(CRC_SUCCEEDED, CRC_SUCCEEDED, 3)
    }

    /// Page rejected; the device erases it and waits for a resend.
    #[must_use]
    pub fn crc_failed() -> Self {
        Self::marker(CRC_FAILED, CRC_FAILED, 7)
    }

    /// Commit the new program and reboot into it.
    #[must_use]
    pub fn program_end() -> Self {
        Self::marker(LOAD_NEW_PROGRAM, PROGRAM_END, 2)
    }

    /// Clear the "programmed" flags kept in flash.
    #[must_use]
    pub fn reset_markers() -> Self {
        Self::marker(LOAD_NEW_PROGRAM, RESET_MARKERS, 2)
    }

    /// Status query.
    #[must_use]
    pub fn send_status() -> Self {
        Self::filled(Channel::Update, SEND_STATUS, &[])
    }

    /// Channel this message travels on.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Command code.
    pub fn code(&self) -> u8 {
        self.code
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Data field as transmitted: the first `code` payload bytes, zero padded.
    ///
    /// The device dispatches on DLC, so the command code doubles as the data
    /// length on the wire.
    pub fn wire_data(&self) -> Result<Vec<u8>> {
        let dlc = usize::from(self.code);
        if dlc > MAX_PAYLOAD {
            return Err(Error::Protocol(format!(
                "command code {:#04x} cannot be carried as a DLC",
                self.code
            )));
        }
        let mut data = vec![0u8; dlc];
        let n = dlc.min(self.payload.len());
        data[..n].copy_from_slice(&self.payload[..n]);
        Ok(data)
    }
}

/// Device status byte, as answered to a status query or an erase request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DeviceStatus {
    /// Idle, nothing to report.
    AllGood,
    /// Reading flash failed.
    FailRead,
    /// A flash write is in progress.
    WriteBusy,
    /// The last flash write succeeded.
    WriteSucceeded,
    /// The last flash write failed.
    WriteFailed,
    /// The last erase failed.
    EraseFailed,
    /// Erase done, ready for data.
    Ready,
    /// Unknown status byte.
    Unknown(u8),
}

impl DeviceStatus {
    /// Decode the first byte of a status response.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let &byte = payload
            .first()
            .ok_or_else(|| Error::MalformedResponse("empty status response".into()))?;
        Ok(Self::from(byte))
    }

    /// Whether the device reports a failure.
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::FailRead | Self::WriteFailed | Self::EraseFailed
        )
    }
}

impl From<u8> for DeviceStatus {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::AllGood,
            0x01 => Self::FailRead,
            0x10 => Self::WriteBusy,
            0x11 => Self::WriteSucceeded,
            0x21 => Self::WriteFailed,
            ERASE_FAILED => Self::EraseFailed,
            READY => Self::Ready,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllGood => write!(f, "all good"),
            Self::FailRead => write!(f, "read failed"),
            Self::WriteBusy => write!(f, "write busy"),
            Self::WriteSucceeded => write!(f, "write succeeded"),
            Self::WriteFailed => write!(f, "write failed"),
            Self::EraseFailed => write!(f, "erase failed"),
            Self::Ready => write!(f, "ready"),
            Self::Unknown(b) => write!(f, "unknown (0x{b:02X})"),
        }
    }
}

/// Decode the page CRC reported on the crc-ack channel.
///
/// The device sends the CRC big-endian in the first two data bytes.
pub fn decode_crc_ack(payload: &[u8]) -> Result<u16> {
    if payload.len() < 2 {
        return Err(Error::MalformedResponse(format!(
            "CRC acknowledgment needs 2 bytes, got {}",
            payload.len()
        )));
    }
    Ok(BigEndian::read_u16(&payload[..2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_ids() {
        assert_eq!(Channel::Update.id(), 0x600);
        assert_eq!(Channel::CrcAck.id(), 0x601);
        assert_eq!(Channel::from_id(0x601), Some(Channel::CrcAck));
        assert_eq!(Channel::from_id(0x123), None);
    }

    #[test]
    fn test_marker_shapes() {
        let start = ProtocolMessage::program_start();
        assert_eq!(start.code(), PROGRAM_START);
        assert_eq!(start.payload(), &[3; 7]);

        assert_eq!(ProtocolMessage::last_frame().payload(), &[LAST_FRAME; 4]);
        assert_eq!(ProtocolMessage::crc_succeeded().payload(), &[3; 3]);
        assert_eq!(ProtocolMessage::crc_failed().payload(), &[7; 7]);

        let end = ProtocolMessage::program_end();
        assert_eq!(end.code(), LOAD_NEW_PROGRAM);
        assert_eq!(end.payload(), &[PROGRAM_END; 2]);
    }

    #[test]
    fn test_wire_data_truncates_to_code() {
        // The start request carries seven marker bytes but a DLC of five.
        let data = ProtocolMessage::program_start()
            .wire_data()
            .unwrap();
        assert_eq!(data, vec![3; 5]);
    }

    #[test]
    fn test_wire_data_pads_short_payload() {
        let data = ProtocolMessage::program_end()
            .wire_data()
            .unwrap();
        assert_eq!(data, vec![PROGRAM_END, PROGRAM_END]);

        let status = ProtocolMessage::send_status()
            .wire_data()
            .unwrap();
        assert!(status.is_empty());
    }

    #[test]
    fn test_wire_data_rejects_oversized_code() {
        let msg = ProtocolMessage::new(Channel::Update, PROGRAM_END, &[]).unwrap();
        assert!(matches!(msg.wire_data(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_new_rejects_long_payload() {
        let result = ProtocolMessage::new(Channel::Update, WRITE_TO_FLASH, &[0; 9]);
        assert!(result.is_err());
    }

    #[test]
    fn test_write_to_flash_carries_frame() {
        let frame = [1, 2, 3, 4, 5, 6, 7, 8];
        let msg = ProtocolMessage::write_to_flash(&frame);
        assert_eq!(msg.channel(), Channel::Update);
        assert_eq!(msg.wire_data().unwrap(), frame.to_vec());
    }

    #[test]
    fn test_decode_crc_ack() {
        assert_eq!(decode_crc_ack(&[0x31, 0xC3]).unwrap(), 0x31C3);
        assert_eq!(decode_crc_ack(&[0xAB, 0xCD, 0, 0, 0]).unwrap(), 0xABCD);
    }

    #[test]
    fn test_decode_crc_ack_short_is_malformed() {
        assert!(matches!(
            decode_crc_ack(&[0x31]),
            Err(Error::MalformedResponse(_))
        ));
        assert!(matches!(
            decode_crc_ack(&[]),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_device_status_decode() {
        assert_eq!(DeviceStatus::decode(&[0xAA, 0xAA, 0xAA]).unwrap(), DeviceStatus::Ready);
        assert_eq!(DeviceStatus::decode(&[0x22]).unwrap(), DeviceStatus::EraseFailed);
        assert_eq!(DeviceStatus::decode(&[0x42]).unwrap(), DeviceStatus::Unknown(0x42));
        assert!(DeviceStatus::EraseFailed.is_failure());
        assert!(!DeviceStatus::Ready.is_failure());
        assert!(DeviceStatus::decode(&[]).is_err());
    }
}
