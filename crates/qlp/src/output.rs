use std::io::IsTerminal;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use qlp_engine::{Device, Disposition};
use qlp_frame::discovery::{is_announcement, is_discovery_request};
use qlp_frame::{
    command_name, Announcement, ControlPayload, Frame, FrameError, FrameKind, Response,
};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub(crate) fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

#[derive(Serialize)]
struct DiscoverOutput<'a> {
    window_ms: u128,
    count: usize,
    devices: &'a [Device],
}

pub fn print_devices(devices: &[Device], window_ms: u128, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&DiscoverOutput {
            window_ms,
            count: devices.len(),
            devices,
        }),
        OutputFormat::Table => {
            let mut table = table(vec!["CHIP ID", "DEVICE ID", "ADDRESS", "NAME"]);
            for device in devices {
                table.add_row(vec![
                    device.chip_id.to_string(),
                    device.device_id.clone(),
                    device.address.to_string(),
                    device.name.clone(),
                ]);
            }
            println!("{table}");
            println!("{} device(s) answered within {window_ms}ms", devices.len());
        }
        OutputFormat::Pretty => {
            for device in devices {
                println!(
                    "{} id={} addr={} name={:?}",
                    device.chip_id, device.device_id, device.address, device.name
                );
            }
        }
    }
}

/// Result of `qlp send`.
#[derive(Debug, Serialize)]
pub struct SendOutput {
    pub chip_id: String,
    pub device_id: String,
    pub command: &'static str,
    pub sequence: u8,
    /// Outcome of this command: `resolved`, `timed-out` or `idle`.
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    pub waited_ms: u128,
}

impl SendOutput {
    pub fn new(
        device: &Device,
        command: &'static str,
        sequence: u8,
        outcome: Disposition,
        waited_ms: u128,
    ) -> Self {
        let code = match outcome {
            Disposition::Resolved(code) => Some(code.name()),
            Disposition::Idle | Disposition::TimedOut { .. } => None,
        };
        Self {
            chip_id: device.chip_id.to_string(),
            device_id: device.device_id.clone(),
            command,
            sequence,
            outcome: outcome.name(),
            code,
            waited_ms,
        }
    }
}

pub fn print_send(out: &SendOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = table(vec!["DEVICE", "COMMAND", "SEQ", "OUTCOME", "CODE"]);
            table.add_row(vec![
                format!("{} ({})", out.device_id, out.chip_id),
                out.command.to_string(),
                out.sequence.to_string(),
                out.outcome.to_string(),
                out.code.unwrap_or("-").to_string(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} -> {} seq={} {}{}",
                out.command,
                out.device_id,
                out.sequence,
                out.outcome,
                out.code.map(|code| format!(" ({code})")).unwrap_or_default()
            );
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    timestamp: String,
    from: String,
    version: u8,
    packet_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence: Option<u8>,
    summary: String,
    payload: String,
}

pub fn print_frame(frame: &Frame, from: SocketAddr, format: OutputFormat) {
    let sequence = frame.sequence();
    let summary = describe(frame);
    match format {
        OutputFormat::Json => print_json(&FrameOutput {
            timestamp: now_unix_seconds(),
            from: from.to_string(),
            version: frame.version,
            packet_type: frame.packet_type().name(),
            sequence,
            summary,
            payload: hex::encode(&frame.payload),
        }),
        OutputFormat::Table => {
            let mut table = table(vec!["FROM", "TYPE", "SEQ", "SUMMARY"]);
            table.add_row(vec![
                from.to_string(),
                frame.packet_type().name().to_string(),
                sequence.map_or_else(|| "-".to_string(), |seq| seq.to_string()),
                summary,
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let sequence = sequence.map(|seq| format!(" seq={seq}")).unwrap_or_default();
            println!(
                "{from} v{} {}{sequence} {summary}",
                frame.version,
                frame.packet_type().name()
            );
        }
    }
}

pub fn print_invalid(err: &FrameError, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "timestamp": now_unix_seconds(),
            "invalid": err.to_string(),
        })),
        OutputFormat::Table | OutputFormat::Pretty => println!("invalid datagram: {err}"),
    }
}

/// One-line description of a frame's payload.
pub fn describe(frame: &Frame) -> String {
    let payload = frame.payload.as_ref();
    match frame.kind {
        FrameKind::Discovery if is_discovery_request(payload) => "discovery request".to_string(),
        FrameKind::Discovery if is_announcement(payload) => match Announcement::parse(payload) {
            Ok(a) => format!(
                "announcement chip={} id={} name={:?}",
                a.chip_id, a.device_id, a.name
            ),
            Err(err) => format!("bad announcement: {err}"),
        },
        FrameKind::Control { .. } => match ControlPayload::decode(payload) {
            Ok(control) if control.is_response() => match Response::from_payload(&control) {
                Ok(response) => match response.text {
                    Some(text) => format!(
                        "response chip={} {} {text:?}",
                        response.chip_id, response.code
                    ),
                    None => format!("response chip={} {}", response.chip_id, response.code),
                },
                Err(err) => format!("bad response: {err}"),
            },
            Ok(control) => format!(
                "{} chip={} args={}",
                command_name(control.command_id),
                control.chip_id,
                hex::encode(&control.args)
            ),
            Err(err) => format!("bad control payload: {err}"),
        },
        _ => format!("{} byte payload", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
