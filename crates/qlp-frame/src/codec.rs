use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Magic bytes: "QLP" (0x51 0x4C 0x50).
pub const MAGIC: [u8; 3] = *b"QLP";

/// Protocol revision spoken by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

/// Initial accumulator value of the frame checksum.
pub const CHECKSUM_SEED: u8 = 0x75;

/// Fixed header: magic (3) + version (1) + type (1) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

/// Smallest valid frame: header plus checksum, empty payload.
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + 1;

/// Packet type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    None = 0,
    Discovery = 1,
    Broadcast = 2,
    Control = 3,
}

impl PacketType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketType::None => "NONE",
            PacketType::Discovery => "DISCOVERY",
            PacketType::Broadcast => "BROADCAST",
            PacketType::Control => "CONTROL",
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PacketType::None),
            1 => Ok(PacketType::Discovery),
            2 => Ok(PacketType::Broadcast),
            3 => Ok(PacketType::Control),
            other => Err(FrameError::UnknownPacketType(other)),
        }
    }
}

/// Packet type together with the header fields that only some types carry.
///
/// The sequence counter exists on CONTROL frames only; modelling it inside the
/// variant keeps a sequence from being attached to any other type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    None,
    Discovery,
    Broadcast,
    Control { sequence: u8 },
}

impl FrameKind {
    pub fn packet_type(self) -> PacketType {
        match self {
            FrameKind::None => PacketType::None,
            FrameKind::Discovery => PacketType::Discovery,
            FrameKind::Broadcast => PacketType::Broadcast,
            FrameKind::Control { .. } => PacketType::Control,
        }
    }

    /// The CONTROL sequence counter, if this is a CONTROL frame.
    pub fn sequence(self) -> Option<u8> {
        match self {
            FrameKind::Control { sequence } => Some(sequence),
            _ => None,
        }
    }
}

/// One complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Protocol revision.
    pub version: u8,
    /// Packet type and CONTROL sequence.
    pub kind: FrameKind,
    /// Type-specific payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame with the current protocol version.
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            payload: payload.into(),
        }
    }

    /// A DISCOVERY frame.
    pub fn discovery(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Discovery, payload)
    }

    /// A CONTROL frame carrying `sequence`.
    pub fn control(sequence: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Control { sequence }, payload)
    }

    /// Override the protocol version.
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn packet_type(&self) -> PacketType {
        self.kind.packet_type()
    }

    pub fn sequence(&self) -> Option<u8> {
        self.kind.sequence()
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        let sequence = usize::from(self.sequence().is_some());
        HEADER_SIZE + sequence + self.payload.len() + 1
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        encode_frame(self, &mut buf);
        buf.freeze()
    }
}

/// XOR-fold of `bytes` starting from [`CHECKSUM_SEED`].
///
/// This is an integrity check against random corruption only. It is not
/// position-weighted: reordering bytes, or flipping the same bit in two
/// bytes, leaves the checksum unchanged.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(CHECKSUM_SEED, |acc, byte| acc ^ byte)
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬─────────┬──────┬──────────────┬───────────┬──────────┐
/// │ Magic    │ Version │ Type │ Sequence     │ Payload   │ Checksum │
/// │ "QLP"    │ (1B)    │ (1B) │ (1B, CONTROL │ (N bytes) │ (1B XOR) │
/// │ (3B)     │         │      │  frames only)│           │          │
/// └──────────┴─────────┴──────┴──────────────┴───────────┴──────────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) {
    dst.reserve(frame.wire_size());
    let start = dst.len();
    dst.put_slice(&MAGIC);
    dst.put_u8(frame.version);
    dst.put_u8(frame.packet_type().as_u8());
    if let Some(sequence) = frame.sequence() {
        dst.put_u8(sequence);
    }
    dst.put_slice(&frame.payload);
    let crc = checksum(&dst[start..]);
    dst.put_u8(crc);
}

/// Decode one frame from a complete datagram.
pub fn decode_frame(src: &[u8]) -> Result<Frame> {
    if src.len() < MIN_FRAME_SIZE {
        return Err(FrameError::TooShort {
            len: src.len(),
            min: MIN_FRAME_SIZE,
        });
    }

    if src[..3] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let (body, trailer) = src.split_at(src.len() - 1);
    let computed = checksum(body);
    if computed != trailer[0] {
        return Err(FrameError::ChecksumMismatch {
            computed,
            received: trailer[0],
        });
    }

    let version = body[3];
    let (kind, payload_start) = match PacketType::try_from(body[4])? {
        PacketType::None => (FrameKind::None, HEADER_SIZE),
        PacketType::Discovery => (FrameKind::Discovery, HEADER_SIZE),
        PacketType::Broadcast => (FrameKind::Broadcast, HEADER_SIZE),
        PacketType::Control => {
            if body.len() < HEADER_SIZE + 1 {
                return Err(FrameError::TooShort {
                    len: src.len(),
                    min: MIN_FRAME_SIZE + 1,
                });
            }
            (
                FrameKind::Control {
                    sequence: body[HEADER_SIZE],
                },
                HEADER_SIZE + 1,
            )
        }
    };

    Ok(Frame {
        version,
        kind,
        payload: Bytes::copy_from_slice(&body[payload_start..]),
    })
}
