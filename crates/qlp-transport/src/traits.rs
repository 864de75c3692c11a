use std::future::Future;
use std::net::SocketAddr;

use crate::error::Result;

/// A broadcast datagram medium.
///
/// Implementations send every datagram to the protocol's broadcast target and
/// receive whatever arrives on the protocol port, including datagrams sent by
/// other clients sharing the medium. Both futures are `Send` so that a receive
/// loop generic over the transport can run on a spawned task.
pub trait DatagramTransport: Send + Sync + 'static {
    /// Broadcast a single datagram. Returns the number of bytes written.
    fn broadcast(&self, datagram: &[u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Receive the next datagram into `buf`.
    ///
    /// Returns the datagram length and the address it came from. Datagrams
    /// longer than `buf` are truncated, as with a plain UDP socket.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(usize, SocketAddr)>> + Send;
}
