use std::ops::Range;

/// Errors that can occur in engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] qlp_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] qlp_frame::FrameError),

    /// `start()` while the receive loop is running or still shutting down.
    #[error("engine already started")]
    AlreadyStarted,

    /// `start()` outside a Tokio runtime.
    #[error("no Tokio runtime to run the receive loop: {0}")]
    NoRuntime(#[source] tokio::runtime::TryCurrentError),

    /// `stop()` while the engine is stopped.
    #[error("engine already stopped")]
    AlreadyStopped,

    /// `stop()` while a previous stop is still in progress.
    #[error("engine already stopping")]
    AlreadyStopping,

    /// The operation needs the receive loop to be running.
    #[error("engine is not listening")]
    NotListening,

    /// A command argument failed validation. Nothing was sent.
    #[error("{field} {value} out of range {}..{}", .range.start, .range.end)]
    OutOfRange {
        field: &'static str,
        value: u16,
        range: Range<u16>,
    },

    /// No registered device has this id.
    #[error("unknown device {0:?}")]
    UnknownDevice(String),

    /// A reply names a device with no command in flight.
    #[error("unexpected reply from device {device_id:?} (sequence {sequence})")]
    UnexpectedReply { device_id: String, sequence: u8 },
}

pub type Result<T> = std::result::Result<T, EngineError>;
