use crate::constants::*;
use crate::error::TcmError;
use bytes::{BufMut, Bytes, BytesMut};
use modular_bitfield::prelude::*;
use num_enum::{FromPrimitive, IntoPrimitive};
use strum_macros::Display;

/// Header that opens every message read from the device
#[bitfield(bytes = 4)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MessageHeader {
    pub marker: u8,
    pub code: u8,
    pub length: u16,
}

/// Status and report codes share one byte-wide namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum MessageCode {
    // status codes: 0x00..=0x0f, plus INVALID (0xff) which lands in Unknown
    Idle = 0x00,
    Ok = 0x01,
    Busy = 0x02,
    ContinuedRead = 0x03,
    ReceiveBufferOverflow = 0x0c,
    PreviousCommandPending = 0x0d,
    NotImplemented = 0x0e,
    Error = 0x0f,

    // report codes
    Identify = 0x10,
    Touch = 0x11,
    Delta = 0x12,
    Raw = 0x13,
    Log = 0x1d,
    Printf = 0x82,
    TouchHold = 0xd4,
    Hdl = 0xfe,

    #[num_enum(catch_all)]
    Unknown(u8),
}

impl MessageCode {
    /// First code value that belongs to the report range
    pub const REPORT_THRESHOLD: u8 = 0x10;

    pub fn is_status(&self) -> bool {
        let value: u8 = (*self).into();
        value < Self::REPORT_THRESHOLD || value == 0xff
    }

    pub fn is_report(&self) -> bool {
        !self.is_status()
    }
}

/// Commands understood by the controller firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum Command {
    None = 0x00,
    ContinueWrite = 0x01,
    Identify = 0x02,
    Reset = 0x04,
    EnableReport = 0x05,
    DisableReport = 0x06,
    GetBootInfo = 0x10,
    EraseFlash = 0x11,
    WriteFlash = 0x12,
    ReadFlash = 0x13,
    RunApplicationFirmware = 0x14,
    RunBootloaderFirmware = 0x1f,
    GetApplicationInfo = 0x20,
    GetStaticConfig = 0x21,
    SetStaticConfig = 0x22,
    GetDynamicConfig = 0x23,
    SetDynamicConfig = 0x24,
    GetTouchReportConfig = 0x25,
    SetTouchReportConfig = 0x26,
    ProductionTest = 0x2a,
    EnterDeepSleep = 0x2c,
    ExitDeepSleep = 0x2d,

    #[num_enum(catch_all)]
    Unknown(u8),
}

impl Command {
    /// Commands the firmware acknowledges by restarting and sending IDENTIFY
    pub fn restarts_device(&self) -> bool {
        matches!(
            self,
            Command::Reset | Command::RunBootloaderFirmware | Command::RunApplicationFirmware
        )
    }
}

/// A complete, validated message: header, payload and trailing padding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub header: MessageHeader,
    pub payload: Bytes,
}

impl RawMessage {
    pub fn new(code: MessageCode, payload: Bytes) -> Self {
        let header = MessageHeader::new()
            .with_marker(MESSAGE_MARKER)
            .with_code(code.into())
            .with_length(payload.len() as u16);
        RawMessage { header, payload }
    }

    pub fn code(&self) -> MessageCode {
        MessageCode::from_primitive(self.header.code())
    }

    pub fn payload(&self) -> Bytes {
        self.payload.clone()
    }

    /// Header + payload + padding byte
    pub fn total_length(&self) -> usize {
        MESSAGE_HEADER_SIZE + self.payload.len() + 1
    }
}

impl TryFrom<Bytes> for RawMessage {
    type Error = TcmError;

    fn try_from(mut bytes: Bytes) -> Result<Self, Self::Error> {
        if bytes.len() < MESSAGE_HEADER_SIZE {
            return Err(TcmError::Framing(format!(
                "Message too short for header: {} bytes",
                bytes.len()
            )));
        }
        let header_bytes: [u8; 4] = bytes.split_to(MESSAGE_HEADER_SIZE).as_ref().try_into()?;
        let header = MessageHeader::from_bytes(header_bytes);

        if header.marker() != MESSAGE_MARKER {
            return Err(TcmError::Framing(format!(
                "Incorrect header marker {:#04x}",
                header.marker()
            )));
        }

        let length = header.length() as usize;
        if bytes.len() < length + 1 {
            return Err(TcmError::Framing(format!(
                "Declared payload of {} bytes but only {} bytes follow the header",
                length,
                bytes.len()
            )));
        }

        let padding = bytes[length];
        if padding != MESSAGE_PADDING {
            return Err(TcmError::Framing(format!(
                "Incorrect message padding byte {padding:#04x}"
            )));
        }

        let payload = bytes.split_to(length);
        Ok(RawMessage { header, payload })
    }
}

impl From<RawMessage> for Bytes {
    fn from(message: RawMessage) -> Self {
        let mut buf = BytesMut::with_capacity(message.total_length());
        buf.put_slice(&message.header.into_bytes());
        buf.put_slice(&message.payload);
        buf.put_u8(MESSAGE_PADDING);
        buf.freeze()
    }
}

/// Command payload as it travels on the wire after the command byte:
/// a little-endian length followed by the payload itself.
pub fn command_body(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(COMMAND_LENGTH_SIZE + payload.len());
    buf.put_u16_le(payload.len() as u16);
    buf.put_slice(payload);
    buf.freeze()
}
