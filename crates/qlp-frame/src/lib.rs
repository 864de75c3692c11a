//! QLP wire frames.
//!
//! Every datagram on the QLP port is exactly one frame:
//! - A 3-byte magic header (`"QLP"`)
//! - A 1-byte protocol version and a 1-byte packet type
//! - A 1-byte sequence counter, present on CONTROL frames only
//! - A type-specific payload
//! - A 1-byte XOR checksum over everything before it
//!
//! The [`control`] and [`discovery`] modules describe the payloads carried by
//! CONTROL and DISCOVERY frames. The codec itself is stateless.

pub mod codec;
pub mod command;
pub mod control;
pub mod discovery;
pub mod error;
#[cfg(feature = "async")]
pub mod udp_codec;

pub use codec::{
    checksum, decode_frame, encode_frame, Frame, FrameKind, PacketType, CHECKSUM_SEED,
    HEADER_SIZE, MAGIC, MIN_FRAME_SIZE, PROTOCOL_VERSION,
};
pub use command::{command_name, Color, Command};
pub use control::{ChipId, ControlPayload, Response, ResponseCode};
pub use discovery::{Announcement, ANYBODY_HERE, I_AM_HERE};
pub use error::{FrameError, Result};
#[cfg(feature = "async")]
pub use udp_codec::QlpCodec;
