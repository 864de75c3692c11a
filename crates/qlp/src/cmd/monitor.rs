use futures_util::StreamExt;
use qlp_frame::{FrameError, QlpCodec};
use qlp_transport::UdpBroadcast;
use tokio_util::udp::UdpFramed;
use tracing::{debug, info};

use crate::cmd::{MonitorArgs, NetworkArgs};
use crate::exit::{io_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_frame, print_invalid, OutputFormat};

/// Passive capture: binds the port with address reuse and never transmits.
pub async fn run(args: MonitorArgs, network: &NetworkArgs, format: OutputFormat) -> CliResult<i32> {
    let socket = UdpBroadcast::bind(&network.udp_config())
        .map_err(|err| transport_error("bind failed", err))?
        .into_socket();
    let mut frames = UdpFramed::new(socket, QlpCodec::new());
    info!(port = network.port, "monitoring");

    let mut printed = 0usize;
    loop {
        let next = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|err| io_error("signal handler setup failed", err))?;
                debug!("interrupted");
                return Ok(SUCCESS);
            }
            next = frames.next() => next,
        };

        match next {
            Some(Ok((frame, from))) => print_frame(&frame, from, format),
            Some(Err(FrameError::Io(err))) => return Err(io_error("receive failed", err)),
            Some(Err(err)) if args.show_invalid => print_invalid(&err, format),
            Some(Err(err)) => {
                debug!(error = %err, "ignoring invalid datagram");
                continue;
            }
            None => return Ok(SUCCESS),
        }

        printed = printed.saturating_add(1);
        if args.count.is_some_and(|count| printed >= count) {
            return Ok(SUCCESS);
        }
    }
}
