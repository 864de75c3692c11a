//! CONTROL frame payloads.
//!
//! ```text
//! ┌───────────────────┬────────────┬─────────────────────┐
//! │ Chip id           │ Command id │ Arguments           │
//! │ (4B, big-endian)  │ (1B)       │ (command-specific)  │
//! └───────────────────┴────────────┴─────────────────────┘
//! ```
//!
//! Devices acknowledge a command with a CONTROL frame that repeats the
//! command's sequence byte and carries a [`Response`]: the device chip id,
//! [`COMMON_RESPONSE`], a one-byte [`ResponseCode`] and optional text.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::command::{Command, COMMON_RESPONSE};
use crate::error::{FrameError, Result};

/// Chip id (4 bytes) + command id (1 byte).
pub const CONTROL_PAYLOAD_MIN: usize = 5;

/// Hardware-burned device identifier.
///
/// Written as eight upper-case hex digits in announcements and on screen, and
/// as its four big-endian bytes inside control payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChipId(pub u32);

impl ChipId {
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

impl FromStr for ChipId {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.trim();
        let digits = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits);
        if digits.is_empty() || digits.len() > 8 {
            return Err(FrameError::InvalidChipId(s.to_string()));
        }
        u32::from_str_radix(digits, 16)
            .map(ChipId)
            .map_err(|_| FrameError::InvalidChipId(s.to_string()))
    }
}

/// Decoded CONTROL payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPayload {
    /// Device the frame is addressed to (commands) or sent by (responses).
    pub chip_id: ChipId,
    /// Command id byte.
    pub command_id: u8,
    /// Command-specific argument bytes.
    pub args: Bytes,
}

impl ControlPayload {
    /// Payload carrying `command` for the device `chip_id`.
    pub fn new(chip_id: ChipId, command: &Command) -> Self {
        Self {
            chip_id,
            command_id: command.id(),
            args: command.args(),
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(CONTROL_PAYLOAD_MIN + self.args.len());
        dst.put_u32(self.chip_id.0);
        dst.put_u8(self.command_id);
        dst.put_slice(&self.args);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < CONTROL_PAYLOAD_MIN {
            return Err(FrameError::payload(
                "control",
                format!(
                    "{} bytes, need at least {CONTROL_PAYLOAD_MIN}",
                    payload.len()
                ),
            ));
        }
        let mut cursor = payload;
        let chip_id = ChipId(cursor.get_u32());
        let command_id = cursor.get_u8();
        Ok(Self {
            chip_id,
            command_id,
            args: Bytes::copy_from_slice(cursor),
        })
    }

    /// True when this payload is a device acknowledgement.
    pub fn is_response(&self) -> bool {
        self.command_id == COMMON_RESPONSE
    }
}

/// Outcome code carried by a device acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseCode(pub u8);

impl ResponseCode {
    pub const OK: ResponseCode = ResponseCode(0x00);
    pub const VERSION_ERROR: ResponseCode = ResponseCode(0x01);
    pub const CRC_ERROR: ResponseCode = ResponseCode(0x02);
    pub const ENCRYPTION_ERROR: ResponseCode = ResponseCode(0x03);
    pub const LENGTH_ERROR: ResponseCode = ResponseCode(0x04);
    pub const INVALID_HEADER: ResponseCode = ResponseCode(0x05);
    pub const INVALID_PACKET_TYPE: ResponseCode = ResponseCode(0x06);
    /// Generic failure; the only code that carries descriptive text.
    pub const OTHER_ERROR: ResponseCode = ResponseCode(0xFF);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::OK => "OK",
            Self::VERSION_ERROR => "VERSION_ERROR",
            Self::CRC_ERROR => "CRC_ERROR",
            Self::ENCRYPTION_ERROR => "ENCRYPTION_ERROR",
            Self::LENGTH_ERROR => "LENGTH_ERROR",
            Self::INVALID_HEADER => "INVALID_HEADER",
            Self::INVALID_PACKET_TYPE => "INVALID_PACKET_TYPE",
            Self::OTHER_ERROR => "OTHER_ERROR",
            _ => "RESERVED",
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A device acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub chip_id: ChipId,
    pub code: ResponseCode,
    /// Description attached to [`ResponseCode::OTHER_ERROR`].
    pub text: Option<String>,
}

impl Response {
    pub fn new(chip_id: ChipId, code: ResponseCode) -> Self {
        Self {
            chip_id,
            code,
            text: None,
        }
    }

    pub fn other_error(chip_id: ChipId, text: impl Into<String>) -> Self {
        Self {
            chip_id,
            code: ResponseCode::OTHER_ERROR,
            text: Some(text.into()),
        }
    }

    /// Interpret a CONTROL payload as an acknowledgement.
    pub fn from_payload(payload: &ControlPayload) -> Result<Self> {
        if !payload.is_response() {
            return Err(FrameError::payload(
                "response",
                format!("command id {:#04x} is not COMMON_RESPONSE", payload.command_id),
            ));
        }
        let (&code, text) = payload
            .args
            .split_first()
            .ok_or_else(|| FrameError::payload("response", "missing response code"))?;
        let text = (!text.is_empty()).then(|| String::from_utf8_lossy(text).into_owned());
        Ok(Self {
            chip_id: payload.chip_id,
            code: ResponseCode(code),
            text,
        })
    }

    pub fn to_payload(&self) -> ControlPayload {
        let mut args = BytesMut::with_capacity(1 + self.text.as_ref().map_or(0, String::len));
        args.put_u8(self.code.0);
        if let Some(text) = &self.text {
            args.put_slice(text.as_bytes());
        }
        ControlPayload {
            chip_id: self.chip_id,
            command_id: COMMON_RESPONSE,
            args: args.freeze(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_frame, Frame, FrameKind};
    use crate::command::{Color, FILL};

    #[test]
    fn fill_command_end_to_end() {
        let chip_id: ChipId = "ABCD1234".parse().unwrap();
        let payload = ControlPayload::new(chip_id, &Command::Fill(Color::new(3, 1, 4)));
        let wire = Frame::control(17, payload.to_bytes()).to_bytes();

        let frame = decode_frame(&wire).expect("checksum should verify");
        assert_eq!(frame.kind, FrameKind::Control { sequence: 17 });

        let decoded = ControlPayload::decode(&frame.payload).unwrap();
        assert_eq!(decoded.chip_id.to_string(), "ABCD1234");
        assert_eq!(decoded.command_id, 0x54);
        assert_eq!(decoded.command_id, FILL);
        assert_eq!(decoded.args.as_ref(), &[0x03, 0x01, 0x04]);
    }

    #[test]
    fn chip_id_is_big_endian_on_the_wire() {
        let payload = ControlPayload::new(ChipId(0xABCD1234), &Command::Reboot);
        assert_eq!(payload.to_bytes().as_ref(), &[0xAB, 0xCD, 0x12, 0x34, 0x74]);
    }

    #[test]
    fn parse_chip_ids() {
        assert_eq!("00ABCDEF".parse::<ChipId>().unwrap(), ChipId(0x00AB_CDEF));
        assert_eq!("0xabcdef".parse::<ChipId>().unwrap(), ChipId(0x00AB_CDEF));
        assert_eq!(ChipId(0xAB).to_string(), "000000AB");
        assert!("".parse::<ChipId>().is_err());
        assert!("123456789".parse::<ChipId>().is_err());
        assert!("ZZZZZZZZ".parse::<ChipId>().is_err());
    }

    #[test]
    fn decode_short_control_payload() {
        let err = ControlPayload::decode(&[0xAB, 0xCD, 0x12, 0x34]).unwrap_err();
        assert!(matches!(err, FrameError::MalformedPayload { kind: "control", .. }));
    }

    #[test]
    fn response_payload_layout() {
        let response = Response::new(ChipId(0x01020304), ResponseCode::OK);
        let payload = response.to_payload();
        assert!(payload.is_response());
        assert_eq!(payload.to_bytes().as_ref(), &[1, 2, 3, 4, 0x90, 0x00]);
        assert_eq!(Response::from_payload(&payload).unwrap(), response);
    }

    #[test]
    fn response_with_text() {
        let response = Response::other_error(ChipId(7), "strip overheated");
        let decoded =
            Response::from_payload(&ControlPayload::decode(&response.to_payload().to_bytes()).unwrap())
                .unwrap();
        assert_eq!(decoded.code, ResponseCode::OTHER_ERROR);
        assert_eq!(decoded.text.as_deref(), Some("strip overheated"));
    }

    #[test]
    fn command_is_not_a_response() {
        let payload = ControlPayload::new(ChipId(7), &Command::Reboot);
        assert!(!payload.is_response());
        assert!(Response::from_payload(&payload).is_err());

        let missing_code = ControlPayload {
            chip_id: ChipId(7),
            command_id: COMMON_RESPONSE,
            args: Bytes::new(),
        };
        assert!(Response::from_payload(&missing_code).is_err());
    }

    #[test]
    fn response_code_names() {
        assert_eq!(ResponseCode::LENGTH_ERROR.to_string(), "LENGTH_ERROR");
        assert_eq!(ResponseCode(0x42).name(), "RESERVED");
        assert!(ResponseCode::OK.is_ok());
    }
}
