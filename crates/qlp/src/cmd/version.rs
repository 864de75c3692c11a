use qlp_engine::EngineConfig;
use qlp_frame::{command, ANYBODY_HERE, CHECKSUM_SEED, I_AM_HERE, MAGIC, PROTOCOL_VERSION};
use qlp_transport::{BROADCAST_ADDR, QLP_PORT};
use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, table, OutputFormat};

/// Commands the `send` subcommand can issue.
const SEND_COMMANDS: [u8; 5] = [
    command::LENGTH,
    command::SET_PIXEL,
    command::SET_LINE,
    command::FILL,
    command::REBOOT,
];

/// Build and wire details for `version --extended`.
#[derive(Debug, Serialize)]
struct VersionReport {
    version: &'static str,
    protocol_version: u8,
    magic: String,
    checksum_seed: String,
    default_port: u16,
    broadcast: String,
    discovery: [String; 2],
    commands: Vec<&'static str>,
    response_timeout_ms: u128,
    discovery_window_ms: u128,
    target: String,
}

impl VersionReport {
    fn collect() -> Self {
        let defaults = EngineConfig::default();
        Self {
            version: env!("CARGO_PKG_VERSION"),
            protocol_version: PROTOCOL_VERSION,
            magic: String::from_utf8_lossy(&MAGIC).into_owned(),
            checksum_seed: format!("{CHECKSUM_SEED:#04x}"),
            default_port: QLP_PORT,
            broadcast: BROADCAST_ADDR.to_string(),
            discovery: [ANYBODY_HERE, I_AM_HERE]
                .map(|marker| String::from_utf8_lossy(marker).into_owned()),
            commands: SEND_COMMANDS.iter().map(|&id| command::command_name(id)).collect(),
            response_timeout_ms: defaults.response_timeout.as_millis(),
            discovery_window_ms: defaults.discovery_timeout.as_millis(),
            target: format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS),
        }
    }

    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("version", self.version.to_string()),
            ("protocol", format!("v{} magic {:?}", self.protocol_version, self.magic)),
            ("checksum", format!("xor seed {}", self.checksum_seed)),
            ("port", self.default_port.to_string()),
            ("broadcast", self.broadcast.clone()),
            ("discovery", self.discovery.join(" / ")),
            ("commands", self.commands.join(", ")),
            ("response timeout", format!("{}ms", self.response_timeout_ms)),
            ("discovery window", format!("{}ms", self.discovery_window_ms)),
            ("target", self.target.clone()),
        ]
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    if !args.extended {
        println!("qlp {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let report = VersionReport::collect();
    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Table => {
            let mut table = table(vec!["FIELD", "VALUE"]);
            for (field, value) in report.rows() {
                table.add_row(vec![field.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (field, value) in report.rows() {
                println!("{field}: {value}");
            }
        }
    }
    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_describes_the_wire_protocol() {
        let report = VersionReport::collect();
        assert_eq!(report.magic, "QLP");
        assert_eq!(report.checksum_seed, "0x75");
        assert_eq!(report.default_port, 52075);
        assert_eq!(report.discovery, ["ABH".to_string(), "IAH".to_string()]);
        assert_eq!(
            report.commands,
            ["LENGTH", "SET_PIXEL", "SET_LINE", "FILL", "REBOOT"]
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["protocol_version"], 1);
        assert_eq!(json["broadcast"], "255.255.255.255");
    }
}
