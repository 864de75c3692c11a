//! `tokio_util` codec for use with `UdpFramed`.
//!
//! `UdpFramed` hands the decoder exactly one datagram at a time, so the whole
//! buffer is taken on every call. A malformed datagram produces one error and
//! is discarded; the stream keeps going.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, Frame};
use crate::error::FrameError;

/// Datagram codec for [`Frame`].
#[derive(Debug, Clone, Copy, Default)]
pub struct QlpCodec;

impl QlpCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for QlpCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.is_empty() {
            return Ok(None);
        }
        let datagram = src.split();
        match decode_frame(&datagram) {
            Ok(frame) => Ok(Some(frame)),
            Err(err) => {
                tracing::trace!(len = datagram.len(), error = %err, "discarding datagram");
                Err(err)
            }
        }
    }
}

impl Encoder<Frame> for QlpCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(&frame, dst);
        Ok(())
    }
}
