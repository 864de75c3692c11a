use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{info, trace};

use crate::error::{Result, TransportError};
use crate::traits::DatagramTransport;

/// Fixed UDP port every QLP participant binds and broadcasts to.
pub const QLP_PORT: u16 = 52075;

/// Limited broadcast address used for transmission.
pub const BROADCAST_ADDR: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Socket configuration for [`UdpBroadcast`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpConfig {
    /// Local address to bind. Default: `0.0.0.0`.
    pub bind_addr: Ipv4Addr,
    /// Protocol port, used both for binding and as the broadcast target port.
    pub port: u16,
    /// Broadcast destination. Default: `255.255.255.255`.
    pub broadcast_addr: Ipv4Addr,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind_addr: Ipv4Addr::UNSPECIFIED,
            port: QLP_PORT,
            broadcast_addr: BROADCAST_ADDR,
        }
    }
}

impl UdpConfig {
    /// The local socket address to bind.
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.bind_addr, self.port))
    }

    /// The address every outbound datagram is sent to.
    pub fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.broadcast_addr, self.port))
    }
}

/// Broadcast-enabled UDP socket bound to the protocol port.
///
/// The socket is shared between listening and transmission, so every datagram
/// this socket broadcasts is also delivered back to it. Callers that care about
/// local echo must filter it themselves.
#[derive(Debug)]
pub struct UdpBroadcast {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpBroadcast {
    /// Bind the socket described by `config`.
    ///
    /// `SO_REUSEADDR` is set so several QLP clients (or a passive monitor) can
    /// share the port on one host. Must be called from within a tokio runtime.
    pub fn bind(config: &UdpConfig) -> Result<Self> {
        let addr = config.local_addr();
        let socket = open_socket(addr).map_err(|source| TransportError::Bind { addr, source })?;
        let socket = UdpSocket::from_std(socket.into())
            .map_err(|source| TransportError::Bind { addr, source })?;
        let target = config.broadcast_target();

        info!(%addr, %target, "listening for QLP datagrams");

        Ok(Self { socket, target })
    }

    /// Address the socket is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(Into::into)
    }

    /// Broadcast destination for outbound datagrams.
    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Consume the transport and return the underlying tokio socket.
    pub fn into_socket(self) -> UdpSocket {
        self.socket
    }
}

impl DatagramTransport for UdpBroadcast {
    async fn broadcast(&self, datagram: &[u8]) -> Result<usize> {
        let written = self.socket.send_to(datagram, self.target).await?;
        trace!(target_addr = %self.target, len = written, "datagram sent");
        Ok(written)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await.map_err(Into::into)
    }
}

fn open_socket(addr: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket)
}
