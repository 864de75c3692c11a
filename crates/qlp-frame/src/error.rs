/// Errors that can occur during frame encoding/decoding.
///
/// Every variant except [`FrameError::Io`] describes a malformed datagram.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The buffer is shorter than the fixed frame header.
    #[error("frame too short ({len} bytes, need at least {min})")]
    TooShort { len: usize, min: usize },

    /// The frame does not start with the `"QLP"` magic.
    #[error("invalid frame magic (expected \"QLP\")")]
    InvalidMagic,

    /// The trailing checksum byte does not match the frame contents.
    #[error("checksum mismatch (computed {computed:#04x}, received {received:#04x})")]
    ChecksumMismatch { computed: u8, received: u8 },

    /// The packet type byte is not a known value.
    #[error("unknown packet type {0:#04x}")]
    UnknownPacketType(u8),

    /// A frame payload does not have the layout its type requires.
    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload { kind: &'static str, reason: String },

    /// Text that should hold a hexadecimal chip id does not.
    #[error("invalid chip id {0:?}")]
    InvalidChipId(String),

    /// Text that should hold a color does not.
    #[error("invalid color {0:?} (expected \"r,g,b\" or \"#rrggbb\")")]
    InvalidColor(String),

    /// An I/O error surfaced through the async codec.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub(crate) fn payload(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            kind,
            reason: reason.into(),
        }
    }

    /// True when the error describes bad input rather than an I/O failure.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
