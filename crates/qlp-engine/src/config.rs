use std::time::Duration;

use qlp_frame::PROTOCOL_VERSION;
use qlp_transport::UdpConfig;

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Socket settings used by [`Engine::bind`](crate::Engine::bind).
    pub udp: UdpConfig,
    /// Version byte written to outbound frames. Inbound frames with a
    /// different version are dropped.
    pub protocol_version: u8,
    /// Receive timeout of the background loop. Bounds how long `stop()` takes.
    pub poll_interval: Duration,
    /// How long a command stays in flight before the next command to the same
    /// device abandons it.
    pub response_timeout: Duration,
    /// Window used by [`Engine::discover`](crate::Engine::discover).
    pub discovery_timeout: Duration,
    /// Receive buffer size. Larger datagrams are truncated and fail to decode.
    pub max_datagram: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            udp: UdpConfig::default(),
            protocol_version: PROTOCOL_VERSION,
            poll_interval: Duration::from_millis(200),
            response_timeout: Duration::from_millis(1500),
            discovery_timeout: Duration::from_millis(1500),
            max_datagram: 1024,
        }
    }
}
