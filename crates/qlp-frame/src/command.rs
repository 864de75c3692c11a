//! Command ids and command argument encodings.
//!
//! Ids are grouped in categories of sixteen; unlisted ids inside a category
//! are reserved by the device firmware.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;

// Settings.
pub const LENGTH: u8 = 0x01;
pub const MAX_CURRENT: u8 = 0x02;

// Internal network.
pub const SET_MASTER: u8 = 0x11;
pub const GET_MASTER: u8 = 0x12;
pub const SYNC_PACKET: u8 = 0x13;
pub const MULTICAST_GROUP: u8 = 0x14;
pub const RESPONSE_MULTICAST_GROUP: u8 = 0x15;

// High-level control.
pub const SET_MODE: u8 = 0x31;
pub const SET_COLOR: u8 = 0x32;
pub const SET_SPEED: u8 = 0x33;
pub const SET_BRIGHTNESS: u8 = 0x34;
pub const SET_SHIFT: u8 = 0x35;
pub const SET_SHAPE: u8 = 0x36;
pub const SET_PARAM1: u8 = 0x37;
pub const SET_PARAM2: u8 = 0x38;

// Low-level control.
pub const SET_PIXEL: u8 = 0x51;
pub const SET_LINE: u8 = 0x52;
pub const SET_GRADIENT: u8 = 0x53;
pub const FILL: u8 = 0x54;
pub const SET_LINE_IMAGE: u8 = 0x55;
pub const SET_ALL_PIXELS: u8 = 0x56;

// Service.
pub const ENCRYPTION: u8 = 0x71;
pub const VERSION: u8 = 0x72;
pub const RESET_ID: u8 = 0x73;
pub const REBOOT: u8 = 0x74;
pub const FULL_RESET: u8 = 0x75;

// Time control.
pub const TIME_SERVER: u8 = 0x81;
pub const SET_TIME: u8 = 0x82;
pub const SET_TIMER: u8 = 0x83;
pub const GET_TIMER: u8 = 0x84;

/// Device acknowledgement of a previously received command.
pub const COMMON_RESPONSE: u8 = 0x90;

/// Returns a human-readable name for a command id.
pub fn command_name(id: u8) -> &'static str {
    match id {
        LENGTH => "LENGTH",
        MAX_CURRENT => "MAX_CURRENT",
        SET_MASTER => "SET_MASTER",
        GET_MASTER => "GET_MASTER",
        SYNC_PACKET => "SYNC_PACKET",
        MULTICAST_GROUP => "MULTICAST_GROUP",
        RESPONSE_MULTICAST_GROUP => "RESPONSE_MULTICAST_GROUP",
        SET_MODE => "SET_MODE",
        SET_COLOR => "SET_COLOR",
        SET_SPEED => "SET_SPEED",
        SET_BRIGHTNESS => "SET_BRIGHTNESS",
        SET_SHIFT => "SET_SHIFT",
        SET_SHAPE => "SET_SHAPE",
        SET_PARAM1 => "SET_PARAM1",
        SET_PARAM2 => "SET_PARAM2",
        SET_PIXEL => "SET_PIXEL",
        SET_LINE => "SET_LINE",
        SET_GRADIENT => "SET_GRADIENT",
        FILL => "FILL",
        SET_LINE_IMAGE => "SET_LINE_IMAGE",
        SET_ALL_PIXELS => "SET_ALL_PIXELS",
        ENCRYPTION => "ENCRYPTION",
        VERSION => "VERSION",
        RESET_ID => "RESET_ID",
        REBOOT => "REBOOT",
        FULL_RESET => "FULL_RESET",
        TIME_SERVER => "TIME_SERVER",
        SET_TIME => "SET_TIME",
        SET_TIMER => "SET_TIMER",
        GET_TIMER => "GET_TIMER",
        COMMON_RESPONSE => "COMMON_RESPONSE",
        _ => "RESERVED",
    }
}

/// 24-bit RGB color, encoded as three bytes in R, G, B order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_bytes(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Parses `"r,g,b"` (decimal) or `"#rrggbb"` (hex).
impl FromStr for Color {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FrameError::InvalidColor(s.to_string());
        let s_trim = s.trim();

        if let Some(hex) = s_trim.strip_prefix('#') {
            if hex.len() != 6 || !hex.is_ascii() {
                return Err(invalid());
            }
            let channel = |range: std::ops::Range<usize>| {
                u8::from_str_radix(&hex[range], 16).map_err(|_| invalid())
            };
            return Ok(Color::new(channel(0..2)?, channel(2..4)?, channel(4..6)?));
        }

        let parts: Vec<&str> = s_trim.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(invalid());
        }
        let channel = |part: &str| part.parse::<u8>().map_err(|_| invalid());
        Ok(Color::new(
            channel(parts[0])?,
            channel(parts[1])?,
            channel(parts[2])?,
        ))
    }
}

/// A device command with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set the strip length (1 byte).
    Length(u8),
    /// Set one pixel.
    SetPixel { index: u16, color: Color },
    /// Set pixels `start` through `end`.
    SetLine { start: u16, end: u16, color: Color },
    /// Set every pixel.
    Fill(Color),
    /// Restart the controller.
    Reboot,
    /// Any other command id with pre-encoded arguments.
    Raw { id: u8, args: Bytes },
}

impl Command {
    /// The command id byte.
    pub fn id(&self) -> u8 {
        match self {
            Command::Length(_) => LENGTH,
            Command::SetPixel { .. } => SET_PIXEL,
            Command::SetLine { .. } => SET_LINE,
            Command::Fill(_) => FILL,
            Command::Reboot => REBOOT,
            Command::Raw { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &'static str {
        command_name(self.id())
    }

    /// Append the argument bytes. Numeric fields are little-endian.
    pub fn encode_args(&self, dst: &mut BytesMut) {
        match self {
            Command::Length(length) => dst.put_u8(*length),
            Command::SetPixel { index, color } => {
                dst.put_u16_le(*index);
                dst.put_slice(&color.to_bytes());
            }
            Command::SetLine { start, end, color } => {
                dst.put_u16_le(*start);
                dst.put_u16_le(*end);
                dst.put_slice(&color.to_bytes());
            }
            Command::Fill(color) => dst.put_slice(&color.to_bytes()),
            Command::Reboot => {}
            Command::Raw { args, .. } => dst.put_slice(args),
        }
    }

    /// The encoded argument bytes.
    pub fn args(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(7);
        self.encode_args(&mut buf);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_encodings() {
        assert_eq!(Command::Length(30).args().as_ref(), &[30]);
        assert_eq!(
            Command::SetPixel {
                index: 0x0102,
                color: Color::new(5, 0, 5)
            }
            .args()
            .as_ref(),
            &[0x02, 0x01, 5, 0, 5]
        );
        assert_eq!(
            Command::SetLine {
                start: 2,
                end: 300,
                color: Color::new(1, 2, 3)
            }
            .args()
            .as_ref(),
            &[2, 0, 0x2C, 0x01, 1, 2, 3]
        );
        assert_eq!(Command::Fill(Color::new(3, 1, 4)).args().as_ref(), &[3, 1, 4]);
        assert!(Command::Reboot.args().is_empty());
    }

    #[test]
    fn ids_match_command_table() {
        assert_eq!(Command::Length(1).id(), 0x01);
        assert_eq!(Command::Fill(Color::BLACK).id(), 0x54);
        assert_eq!(Command::Reboot.id(), 0x74);
        assert_eq!(Command::Reboot.name(), "REBOOT");
        assert_eq!(command_name(0x57), "RESERVED");
    }

    #[test]
    fn parse_colors() {
        assert_eq!("3,1,4".parse::<Color>().unwrap(), Color::new(3, 1, 4));
        assert_eq!(" 255, 0 ,16 ".parse::<Color>().unwrap(), Color::new(255, 0, 16));
        assert_eq!("#0a0B0c".parse::<Color>().unwrap(), Color::new(10, 11, 12));
        assert_eq!(Color::new(10, 11, 12).to_string(), "#0a0b0c");
    }

    #[test]
    fn reject_bad_colors() {
        for input in ["", "1,2", "1,2,3,4", "256,0,0", "#12345", "#gg0000", "red"] {
            assert!(
                matches!(input.parse::<Color>(), Err(FrameError::InvalidColor(_))),
                "{input:?} should be rejected"
            );
        }
    }
}
