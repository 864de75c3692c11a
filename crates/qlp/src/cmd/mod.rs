use std::net::Ipv4Addr;
use std::time::Duration;

use clap::{Args, Subcommand};
use qlp_engine::{Engine, EngineConfig};
use qlp_frame::Color;
use qlp_transport::{UdpConfig, BROADCAST_ADDR, QLP_PORT};
use tracing::warn;

use crate::exit::{engine_error, CliResult};
use crate::output::OutputFormat;

pub mod discover;
pub mod monitor;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Broadcast a discovery request and list the devices that answer.
    Discover,
    /// Discover a device and send it one command.
    Send(SendArgs),
    /// Print every QLP frame seen on the port.
    Monitor(MonitorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, network: &NetworkArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Discover => discover::run(network, format).await,
        Command::Send(args) => send::run(args, network, format).await,
        Command::Monitor(args) => monitor::run(args, network, format).await,
        Command::Version(args) => version::run(args, format),
    }
}

/// Socket and timing options shared by every networked subcommand.
#[derive(Args, Debug, Clone)]
pub struct NetworkArgs {
    /// UDP port to bind and broadcast to.
    #[arg(long, env = "QLP_PORT", default_value_t = QLP_PORT, global = true)]
    pub port: u16,
    /// Local address to bind.
    #[arg(long, env = "QLP_BIND", default_value_t = Ipv4Addr::UNSPECIFIED, global = true)]
    pub bind: Ipv4Addr,
    /// Broadcast destination address.
    #[arg(long, env = "QLP_BROADCAST", default_value_t = BROADCAST_ADDR, global = true)]
    pub broadcast: Ipv4Addr,
    /// Discovery window (e.g. 2s, 500ms).
    #[arg(
        long,
        env = "QLP_TIMEOUT",
        default_value = "1500ms",
        value_parser = parse_duration,
        global = true
    )]
    pub timeout: Duration,
    /// How long to wait for a device to acknowledge a command.
    #[arg(
        long,
        env = "QLP_RESPONSE_TIMEOUT",
        default_value = "1500ms",
        value_parser = parse_duration,
        global = true
    )]
    pub response_timeout: Duration,
}

impl NetworkArgs {
    pub fn udp_config(&self) -> UdpConfig {
        UdpConfig {
            bind_addr: self.bind,
            port: self.port,
            broadcast_addr: self.broadcast,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            udp: self.udp_config(),
            response_timeout: self.response_timeout,
            discovery_timeout: self.timeout,
            ..EngineConfig::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Target device: device id, chip id or name.
    pub device: String,
    /// Strip length to assume for index checks, when the device was
    /// configured by another client.
    #[arg(long)]
    pub length: Option<u16>,
    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum Action {
    /// Set the number of LEDs on the strip (0-255).
    Length { length: u16 },
    /// Set one pixel.
    Pixel { index: u16, color: Color },
    /// Set pixels `start` through `end`.
    Line { start: u16, end: u16, color: Color },
    /// Set every pixel.
    Fill { color: Color },
    /// Restart the controller.
    Reboot,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Exit after printing N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// Also report datagrams that fail to decode.
    #[arg(long)]
    pub show_invalid: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show target and feature details.
    #[arg(long)]
    pub extended: bool,
}

/// Bind the engine socket and start its receive loop.
pub(crate) fn start_engine(network: &NetworkArgs) -> CliResult<Engine> {
    let engine =
        Engine::bind(network.engine_config()).map_err(|err| engine_error("bind failed", err))?;
    engine
        .start()
        .map_err(|err| engine_error("start failed", err))?;
    Ok(engine)
}

pub(crate) async fn stop_engine(engine: &Engine) {
    if let Err(err) = engine.stop() {
        warn!(error = %err, "engine stop failed");
        return;
    }
    engine.wait_stopped().await;
}

/// Parse `500ms`, `2s` or a bare number of seconds.
pub(crate) fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration value: {input}"))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-1ms").is_err());
    }

    #[test]
    fn network_args_fill_engine_config() {
        let network = NetworkArgs {
            port: 40000,
            bind: Ipv4Addr::LOCALHOST,
            broadcast: Ipv4Addr::LOCALHOST,
            timeout: Duration::from_millis(300),
            response_timeout: Duration::from_secs(2),
        };
        let config = network.engine_config();
        assert_eq!(config.udp.local_addr(), "127.0.0.1:40000".parse().unwrap());
        assert_eq!(
            config.udp.broadcast_target(),
            "127.0.0.1:40000".parse().unwrap()
        );
        assert_eq!(config.discovery_timeout, Duration::from_millis(300));
        assert_eq!(config.response_timeout, Duration::from_secs(2));
        assert_eq!(config.poll_interval, EngineConfig::default().poll_interval);
    }
}
