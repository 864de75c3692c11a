//! Software stand-in for an LED controller.
//!
//! Answers discovery requests and acknowledges commands addressed to its chip
//! id. Replies are broadcast, so it can share the port with a client on the
//! same host.
//!
//! Run with:
//!   cargo run --example fake-controller --features async -- desk 00ABCDEF
//!
//! In another terminal:
//!   cargo run --features cli -- discover
//!   cargo run --features cli -- send desk fill 255,0,0

use futures_util::{SinkExt, StreamExt};
use qlp::frame::{
    command, discovery, Announcement, ChipId, ControlPayload, Frame, FrameKind, QlpCodec,
    Response, ResponseCode,
};
use qlp::transport::{UdpBroadcast, UdpConfig};
use tokio_util::udp::UdpFramed;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut args = std::env::args().skip(1);
    let name = args.next().unwrap_or_else(|| "fake".to_string());
    let chip_id: ChipId = args.next().as_deref().unwrap_or("00C0FFEE").parse()?;
    let device_id = format!("{:08X}", std::process::id());
    let announcement = Announcement::new(chip_id, device_id.as_str(), name.as_str())?;

    let config = UdpConfig::default();
    let target = config.broadcast_target();
    let socket = UdpBroadcast::bind(&config)?.into_socket();
    let mut framed = UdpFramed::new(socket, QlpCodec::new());
    info!(%chip_id, %device_id, %name, "fake controller ready");

    let mut strip_length: u16 = 0;
    while let Some(next) = framed.next().await {
        let (frame, from) = match next {
            Ok(received) => received,
            Err(err) => {
                debug!(error = %err, "ignoring datagram");
                continue;
            }
        };

        match frame.kind {
            FrameKind::Discovery if discovery::is_discovery_request(&frame.payload) => {
                info!(%from, "discovery request");
                framed
                    .send((Frame::discovery(announcement.to_bytes()), target))
                    .await?;
            }
            FrameKind::Control { sequence } => {
                let Ok(control) = ControlPayload::decode(&frame.payload) else {
                    continue;
                };
                if control.chip_id != chip_id || control.is_response() {
                    continue;
                }

                let code = apply(&control, &mut strip_length);
                info!(
                    command = command::command_name(control.command_id),
                    sequence,
                    code = code.name(),
                    "command"
                );
                let reply = Response::new(chip_id, code).to_payload().to_bytes();
                framed.send((Frame::control(sequence, reply), target)).await?;
            }
            _ => {}
        }
    }

    warn!("socket closed");
    Ok(())
}

fn apply(control: &ControlPayload, strip_length: &mut u16) -> ResponseCode {
    let args = control.args.as_ref();
    let index = |at: usize| {
        args.get(at..at + 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
    };

    match control.command_id {
        command::LENGTH => match args.first() {
            Some(&length) => {
                *strip_length = u16::from(length);
                ResponseCode::OK
            }
            None => ResponseCode::LENGTH_ERROR,
        },
        command::SET_PIXEL => match index(0) {
            Some(i) if i < *strip_length => ResponseCode::OK,
            _ => ResponseCode::LENGTH_ERROR,
        },
        command::SET_LINE => match (index(0), index(2)) {
            (Some(start), Some(end)) if start < end && end < *strip_length => ResponseCode::OK,
            _ => ResponseCode::LENGTH_ERROR,
        },
        command::FILL if args.len() == 3 => ResponseCode::OK,
        command::REBOOT => ResponseCode::OK,
        _ => ResponseCode::OTHER_ERROR,
    }
}
