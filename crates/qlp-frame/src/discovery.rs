//! DISCOVERY frame payloads.
//!
//! A client broadcasts [`ANYBODY_HERE`]; every controller answers with an
//! announcement laid out as:
//!
//! ```text
//!  0     3   4          12   13         21   22
//! ┌─────┬───┬──────────┬───┬──────────┬───┬──────────────┐
//! │ IAH │ - │ chip id  │ - │ device id│ - │ name         │
//! │     │   │ (8 hex)  │   │ (8 char) │   │ (UTF-8, rest)│
//! └─────┴───┴──────────┴───┴──────────┴───┴──────────────┘
//! ```
//!
//! The separator bytes are ignored on input and written as `-` on output.

use std::str;

use bytes::{BufMut, Bytes, BytesMut};

use crate::control::ChipId;
use crate::error::{FrameError, Result};

/// Discovery request marker.
pub const ANYBODY_HERE: &[u8; 3] = b"ABH";

/// Announcement marker.
pub const I_AM_HERE: &[u8; 3] = b"IAH";

const SEPARATOR: u8 = b'-';
const CHIP_ID: std::ops::Range<usize> = 4..12;
const DEVICE_ID: std::ops::Range<usize> = 13..21;
const NAME_OFFSET: usize = 22;

/// Fixed-width part of an announcement.
pub const ANNOUNCEMENT_MIN: usize = NAME_OFFSET;

/// Width of the device id field.
pub const DEVICE_ID_LEN: usize = DEVICE_ID.end - DEVICE_ID.start;

/// True when `payload` is a discovery request.
pub fn is_discovery_request(payload: &[u8]) -> bool {
    payload.starts_with(ANYBODY_HERE)
}

/// True when `payload` starts with the announcement marker.
pub fn is_announcement(payload: &[u8]) -> bool {
    payload.starts_with(I_AM_HERE)
}

/// A device's answer to a discovery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub chip_id: ChipId,
    /// Protocol-level id, regenerated by the firmware on some resets.
    pub device_id: String,
    pub name: String,
}

impl Announcement {
    /// Build an announcement. `device_id` must be exactly eight ASCII
    /// characters so that the fixed offsets hold.
    pub fn new(
        chip_id: ChipId,
        device_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self> {
        let device_id = device_id.into();
        if device_id.len() != DEVICE_ID_LEN || !device_id.is_ascii() {
            return Err(FrameError::payload(
                "announcement",
                format!("device id {device_id:?} must be {DEVICE_ID_LEN} ASCII characters"),
            ));
        }
        Ok(Self {
            chip_id,
            device_id,
            name: name.into(),
        })
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        if !is_announcement(payload) {
            return Err(FrameError::payload("announcement", "missing IAH marker"));
        }
        if payload.len() < ANNOUNCEMENT_MIN {
            return Err(FrameError::payload(
                "announcement",
                format!("{} bytes, need at least {ANNOUNCEMENT_MIN}", payload.len()),
            ));
        }

        let chip_text = str::from_utf8(&payload[CHIP_ID])
            .map_err(|_| FrameError::payload("announcement", "chip id is not ASCII"))?;
        if !chip_text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(FrameError::InvalidChipId(chip_text.to_string()));
        }
        let chip_id: ChipId = chip_text.parse()?;

        let device_id = str::from_utf8(&payload[DEVICE_ID])
            .ok()
            .filter(|id| id.is_ascii())
            .ok_or_else(|| FrameError::payload("announcement", "device id is not ASCII"))?
            .to_string();

        let name = String::from_utf8_lossy(&payload[NAME_OFFSET..]).into_owned();

        Ok(Self {
            chip_id,
            device_id,
            name,
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(ANNOUNCEMENT_MIN + self.name.len());
        dst.put_slice(I_AM_HERE);
        dst.put_u8(SEPARATOR);
        dst.put_slice(self.chip_id.to_string().as_bytes());
        dst.put_u8(SEPARATOR);
        dst.put_slice(self.device_id.as_bytes());
        dst.put_u8(SEPARATOR);
        dst.put_slice(self.name.as_bytes());
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_firmware_announcement() {
        let announcement = Announcement::parse(b"IAH-00ABCDEF-1A2B3C4D-Kitchen shelf").unwrap();
        assert_eq!(announcement.chip_id, ChipId(0x00AB_CDEF));
        assert_eq!(announcement.device_id, "1A2B3C4D");
        assert_eq!(announcement.name, "Kitchen shelf");
    }

    #[test]
    fn fixed_offsets_are_preserved() {
        let bytes = Announcement::new(ChipId(0xABCD1234), "0000BEEF", "desk")
            .unwrap()
            .to_bytes();
        assert_eq!(&bytes[0..3], b"IAH");
        assert_eq!(&bytes[4..12], b"ABCD1234");
        assert_eq!(&bytes[13..21], b"0000BEEF");
        assert_eq!(&bytes[22..], b"desk");
    }

    #[test]
    fn empty_name_is_allowed() {
        let announcement = Announcement::parse(b"IAH-00000001-DEADBEEF-").unwrap();
        assert_eq!(announcement.name, "");
    }

    #[test]
    fn invalid_utf8_name_is_replaced() {
        let mut payload = b"IAH-00000001-DEADBEEF-ab".to_vec();
        payload.push(0xFF);
        let announcement = Announcement::parse(&payload).unwrap();
        assert_eq!(announcement.name, "ab\u{FFFD}");
    }

    #[test]
    fn reject_malformed_announcements() {
        assert!(Announcement::parse(b"ABH").is_err());
        assert!(Announcement::parse(b"IAH-00000001-DEAD").is_err());
        assert!(matches!(
            Announcement::parse(b"IAH-0000000G-DEADBEEF-x"),
            Err(FrameError::InvalidChipId(_))
        ));
        assert!(Announcement::parse(b"IAH-0x00001F-DEADBEEF-x").is_err());
    }

    #[test]
    fn device_id_must_fit_its_field() {
        assert!(Announcement::new(ChipId(1), "short", "x").is_err());
        assert!(Announcement::new(ChipId(1), "123456789", "x").is_err());
    }

    #[test]
    fn classify_payloads() {
        assert!(is_discovery_request(b"ABH"));
        assert!(!is_discovery_request(b"IAH-..."));
        assert!(is_announcement(b"IAH-..."));
        assert!(!is_announcement(b""));
    }
}
